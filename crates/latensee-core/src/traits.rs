//! Core traits for store access and peer callbacks.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Connection-scoped peer identifier, assigned when a link is established.
pub type PeerId = Uuid;

/// Store error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Invalid store address: {0}")]
    InvalidAddress(String),
    #[error("Store unreachable: {0}")]
    Unreachable(String),
    #[error("{0}")]
    Command(String),
    #[error("Store connection closed")]
    Closed,
    #[error("Store did not answer within {0:?}")]
    Timeout(Duration),
}

/// A live connection to a key-value store.
///
/// The only primitive the probes need: run an arbitrary command and report
/// whether it succeeded. Timing is measured by the caller.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Execute one command, given as its tokens (`["SET", "b", "1"]`).
    async fn execute(&self, args: &[String]) -> Result<(), StoreError>;

    /// Close the connection. Later calls to `execute` fail with `Closed`.
    async fn close(&self);
}

/// Opens store connections from an address string.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Connect to the store at `address`.
    ///
    /// Fails if the address cannot be parsed or the store is unreachable.
    async fn connect(&self, address: &str) -> Result<Arc<dyn StoreClient>, StoreError>;
}

/// Callback delivery error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Link closed")]
    LinkClosed,
    #[error("Peer unreachable: {0}")]
    Unreachable(String),
    #[error("Peer returned an error: {0}")]
    Remote(String),
}

/// A remote endpoint able to receive probe callbacks.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Deliver one successful sample.
    async fn handle_latency_measurement(
        &self,
        command: &str,
        latency_us: i64,
    ) -> Result<(), CallbackError>;

    /// Deliver a terminal probe failure.
    async fn handle_error(&self, message: &str) -> Result<(), CallbackError>;
}
