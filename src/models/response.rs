use serde::{Deserialize, Serialize};

/// Envelope returned by every control-surface route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// HTTP status mirrored into the body; 200 means success
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 200,
            message: String::new(),
            data: Some(data),
        }
    }

    pub fn ok_with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            code: 200,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// `?page=` for shard-paged key listing
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PageParams {
    /// Kept as text so that a missing or garbled value falls back to page 0
    pub page: Option<String>,
}

impl PageParams {
    pub fn page(&self) -> i64 {
        self.page
            .as_deref()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }
}

/// `?ip=` naming a single endpoint
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EndpointParams {
    pub ip: Option<String>,
}

impl EndpointParams {
    pub fn endpoint(&self) -> &str {
        self.ip.as_deref().map(str::trim).unwrap_or("")
    }
}

/// Pool overview for `/api/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub uptime_secs: u64,
    pub stored: u64,
    pub available: usize,
    pub leased: usize,
    pub shards: usize,
}
