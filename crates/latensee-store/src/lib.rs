//! Key-value store backends for latency probes.
//!
//! Provides:
//! - `DefaultConnector` - Pick a backend from the address scheme
//! - Store implementations (memory, Redis)

pub mod connector;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use connector::{Backend, DEFAULT_CONNECT_TIMEOUT, DefaultConnector};

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
