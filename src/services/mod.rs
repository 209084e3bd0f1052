//! Background services

pub mod availability_audit;
pub mod collector;
pub mod discovery;
pub mod lease_reclaim;
pub mod revalidation;

pub use availability_audit::{AuditConfig, AvailabilityAudit};
pub use collector::{CandidateSource, Collector, HttpCandidateSource};
pub use discovery::{DiscoveryConfig, DiscoveryService};
pub use lease_reclaim::{LeaseReclaimConfig, LeaseReclaimer};
pub use revalidation::{revalidate, Revalidation, RevalidationPolicy};
