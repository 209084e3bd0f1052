//! API server implementation
//!
//! Provides the HTTP control surface over the pool engine.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
