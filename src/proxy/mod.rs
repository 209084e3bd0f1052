//! Proxy lifecycle core
//!
//! This module provides:
//! - Endpoint parsing and dialing through HTTP / SOCKS5 proxies
//! - Liveness probes routed through a candidate proxy
//! - The health sweep over stored records
//! - Available / Leased allocation tracking

pub mod allocation;
pub mod health;
pub mod probe;
pub mod transport;

pub use allocation::{AllocationCounts, AllocationMachine, AllocationState};
pub use health::{HealthChecker, HealthCheckerConfig};
pub use probe::{ProbeConfig, ProbeReport, Prober, TransportProber};
pub use transport::{ProxyEndpoint, ProxyTransport};
