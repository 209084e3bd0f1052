//! In-memory lease tracking
//!
//! Every endpoint is Unknown (absent), Available or Leased. Both tracked
//! states live in one map so an endpoint can never be in two at once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// Tracked state of an endpoint; absence from the machine means Unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "since", rename_all = "lowercase")]
pub enum AllocationState {
    /// Validated and not lent out, since the given instant
    Available(DateTime<Utc>),
    /// Lent out at the given instant
    Leased(DateTime<Utc>),
}

impl AllocationState {
    pub fn since(&self) -> DateTime<Utc> {
        match self {
            Self::Available(at) | Self::Leased(at) => *at,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn is_leased(&self) -> bool {
        matches!(self, Self::Leased(_))
    }
}

/// Membership counts at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocationCounts {
    pub available: usize,
    pub leased: usize,
}

/// Available / Leased bookkeeping shared by the loops and the API
#[derive(Debug, Default)]
pub struct AllocationMachine {
    entries: DashMap<String, AllocationState>,
}

impl AllocationMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Promote a validated endpoint to Available
    ///
    /// Refreshes the timestamp of an already-Available endpoint. Leased
    /// endpoints are left alone and `false` is returned.
    pub fn mark_available(&self, endpoint: &str) -> bool {
        self.mark_available_at(endpoint, Utc::now())
    }

    pub fn mark_available_at(&self, endpoint: &str, at: DateTime<Utc>) -> bool {
        match self.entries.entry(endpoint.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_leased() {
                    return false;
                }
                entry.insert(AllocationState::Available(at));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(AllocationState::Available(at));
                true
            }
        }
    }

    /// Lease the first Available endpoint encountered
    ///
    /// Never blocks; `None` means the pool is exhausted.
    pub fn allocate(&self) -> Option<String> {
        self.allocate_at(Utc::now())
    }

    pub fn allocate_at(&self, at: DateTime<Utc>) -> Option<String> {
        // The shard write lock held by `iter_mut` makes the flip atomic per key
        for mut entry in self.entries.iter_mut() {
            if entry.value().is_available() {
                *entry.value_mut() = AllocationState::Leased(at);
                let endpoint = entry.key().clone();
                debug!(endpoint = %endpoint, "Leased endpoint");
                return Some(endpoint);
            }
        }
        None
    }

    /// Drop a lease early; the endpoint returns to Unknown
    pub fn release(&self, endpoint: &str) -> bool {
        self.entries
            .remove_if(endpoint, |_, state| state.is_leased())
            .is_some()
    }

    /// Drop an Available endpoint back to Unknown
    pub fn discard(&self, endpoint: &str) -> bool {
        self.entries
            .remove_if(endpoint, |_, state| state.is_available())
            .is_some()
    }

    /// Remove every lease granted at or before `now - window`
    pub fn reclaim_expired(&self, now: DateTime<Utc>, window: Duration) -> Vec<String> {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut reclaimed = Vec::new();
        self.entries.retain(|endpoint, state| match state {
            AllocationState::Leased(since) if *since <= cutoff => {
                reclaimed.push(endpoint.clone());
                false
            }
            _ => true,
        });
        reclaimed
    }

    /// Snapshot of Available endpoints
    pub fn list_available(&self) -> Vec<String> {
        self.collect(AllocationState::is_available)
    }

    /// Snapshot of Leased endpoints
    pub fn list_leased(&self) -> Vec<String> {
        self.collect(AllocationState::is_leased)
    }

    pub fn state_of(&self, endpoint: &str) -> Option<AllocationState> {
        self.entries.get(endpoint).map(|entry| *entry.value())
    }

    /// True when the endpoint is neither Available nor Leased
    pub fn is_unknown(&self, endpoint: &str) -> bool {
        !self.entries.contains_key(endpoint)
    }

    pub fn counts(&self) -> AllocationCounts {
        self.entries
            .iter()
            .fold(AllocationCounts::default(), |mut counts, entry| {
                if entry.value().is_available() {
                    counts.available += 1;
                } else {
                    counts.leased += 1;
                }
                counts
            })
    }

    fn collect(&self, keep: fn(&AllocationState) -> bool) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        endpoints.sort();
        endpoints
    }
}
