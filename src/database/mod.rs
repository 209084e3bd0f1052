//! Durable, shard-partitioned storage for proxy records

pub mod migrations;
pub mod pool;
pub mod shard;

pub use pool::{Database, SHARD_COUNT};
pub use shard::Shard;
