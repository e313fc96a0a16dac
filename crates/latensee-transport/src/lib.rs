//! Transport layer between the backend and its controllers.
//!
//! Provides:
//! - Wire protocol (tagged JSON envelopes)
//! - `Link` - Bidirectional RPC over any text-frame transport
//! - `HeartbeatMonitor` - Liveness probing of a link
//! - `LocalService` - The functions a backend exposes
//! - WebSocket transport (feature: websocket)

pub mod config;
pub mod heartbeat;
pub mod link;
pub mod peer;
pub mod protocol;
pub mod service;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::LinkConfig;
pub use heartbeat::HeartbeatMonitor;
pub use link::{Link, LinkError, Outbound};
pub use peer::RemotePeer;
pub use protocol::{CallId, Envelope};
pub use service::{LocalService, ServiceError};
