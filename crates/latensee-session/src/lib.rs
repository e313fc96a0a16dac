//! Latency measurement session orchestration.
//!
//! Provides:
//! - `CommandProbe` - Time one command against the store, repeatedly
//! - `SessionManager` - Run at most one measurement session and route its
//!   results to the peer that started it

pub mod manager;
pub mod probe;

#[cfg(test)]
mod testing;

pub use manager::{SessionError, SessionId, SessionManager};
pub use probe::{CommandProbe, ProbeStream};
