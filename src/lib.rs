//! Freepool - free proxy pool
//!
//! Collects candidate proxy endpoints, keeps them in a sharded SQLite
//! store, validates them against a probe target and leases live ones to
//! callers over a small HTTP control surface.
//!
//! ## Features
//!
//! - 32-shard record store, one SQLite file per shard
//! - HTTP, HTTPS and SOCKS5 probing with per-probe timeouts
//! - Available / Leased allocation with lease reclaim and re-validation
//! - Optional HTTP candidate collector

pub mod api;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod services;

pub use config::Config;
pub use database::Database;
pub use engine::PoolEngine;
pub use error::{PoolError, Result};
