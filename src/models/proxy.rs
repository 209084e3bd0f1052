use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive failures a record may accumulate; one more and it is evicted
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks5" | "socks5h" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks5)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, ProxyProtocol::Http | ProxyProtocol::Https)
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted proxy record, one per distinct endpoint string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    /// Dialable address; the only identity of the record
    pub endpoint: String,
    pub kind: Option<ProxyProtocol>,
    /// Which collector or caller supplied the endpoint
    pub source: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Latency of the most recent successful validation
    pub last_latency_ms: Option<u64>,
    pub check_count: u64,
    pub fail_count: u32,
}

impl ProxyRecord {
    /// Fresh record as created on ingestion
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            kind: None,
            source: None,
            last_checked_at: None,
            last_latency_ms: None,
            check_count: 0,
            fail_count: 0,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_kind(mut self, kind: ProxyProtocol) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Apply a successful validation
    pub fn record_success(&mut self, latency: Duration, at: DateTime<Utc>) {
        self.check_count = self.check_count.saturating_add(1);
        self.fail_count = 0;
        self.last_latency_ms = Some(latency.as_millis().min(u64::MAX as u128) as u64);
        self.last_checked_at = Some(at);
    }

    /// Apply a failed validation; only successful checks are counted
    pub fn record_failure(&mut self) {
        self.fail_count = self.fail_count.saturating_add(1);
    }

    /// Whether the record has failed often enough to be deleted
    pub fn exceeds_failure_threshold(&self) -> bool {
        self.fail_count > MAX_CONSECUTIVE_FAILURES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_protocol_parsing_and_helpers() {
        assert_eq!(ProxyProtocol::from_str("HTTP"), Some(ProxyProtocol::Http));
        assert_eq!(ProxyProtocol::from_str("https"), Some(ProxyProtocol::Https));
        assert_eq!(
            ProxyProtocol::from_str("socks5h"),
            Some(ProxyProtocol::Socks5)
        );
        assert_eq!(ProxyProtocol::from_str("socks4"), None);

        assert!(ProxyProtocol::Socks5.is_socks());
        assert!(!ProxyProtocol::Https.is_socks());
        assert!(ProxyProtocol::Https.is_http());

        assert_eq!(ProxyProtocol::Socks5.to_string(), "socks5");
    }

    #[test]
    fn test_new_record_starts_clean() {
        let record = ProxyRecord::new("10.0.0.1:3128").with_source("manual");
        assert_eq!(record.endpoint, "10.0.0.1:3128");
        assert_eq!(record.source.as_deref(), Some("manual"));
        assert_eq!(record.check_count, 0);
        assert_eq!(record.fail_count, 0);
        assert!(record.last_checked_at.is_none());
        assert!(record.last_latency_ms.is_none());
    }

    #[test]
    fn test_failures_accumulate_and_success_resets() {
        let mut record = ProxyRecord::new("1.2.3.4:8080");
        let now = Utc::now();

        for expected in 1..=3 {
            record.record_failure();
            assert_eq!(record.fail_count, expected);
        }
        assert_eq!(record.check_count, 0);
        assert!(record.last_checked_at.is_none());
        assert!(record.last_latency_ms.is_none());

        record.record_success(Duration::from_millis(250), now);
        assert_eq!(record.fail_count, 0);
        assert_eq!(record.check_count, 1);
        assert_eq!(record.last_latency_ms, Some(250));
        assert_eq!(record.last_checked_at, Some(now));
    }

    #[test]
    fn test_failure_threshold_is_strictly_greater_than_five() {
        let mut record = ProxyRecord::new("1.2.3.4:8080");
        record.fail_count = MAX_CONSECUTIVE_FAILURES;
        assert!(!record.exceeds_failure_threshold());

        record.record_failure();
        assert!(record.exceeds_failure_threshold());
    }
}
