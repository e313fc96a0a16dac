//! Core abstractions for latency probe sessions.
//!
//! This crate provides the building blocks shared by the store backends,
//! the session orchestrator and the transport:
//! - `SessionConfig` / `CommandLine` - What a measurement session probes
//! - `ProbeResult` - One observation emitted by a probe
//! - `PeerRegistry` - Connected peers keyed by connection id
//! - Store and peer traits

pub mod config;
pub mod registry;
pub mod result;
pub mod traits;

pub use config::{CommandLine, ConfigError, SessionConfig};
pub use registry::PeerRegistry;
pub use result::ProbeResult;
pub use traits::{CallbackError, Peer, PeerId, StoreClient, StoreConnector, StoreError};
