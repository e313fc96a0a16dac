//! Redis store backend (feature-gated).

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use latensee_core::{StoreClient, StoreError};
use redis::aio::MultiplexedConnection;

/// Redis-compatible store reached over RESP.
///
/// One multiplexed connection is shared by every probe of a session, the
/// same way a single client is shared by the probes of one measurement.
pub struct RedisStore {
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Connect to the store at `url`.
    ///
    /// # Errors
    /// Returns error if the URL cannot be parsed, the server is unreachable,
    /// or the connection is not established within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::InvalidAddress(format!("{url}: {e}")))?;

        let conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        tracing::debug!(%url, "Connected to store");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }
}

#[async_trait]
impl StoreClient for RedisStore {
    async fn execute(&self, args: &[String]) -> Result<(), StoreError> {
        let mut conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::Closed)?;

        let Some((name, rest)) = args.split_first() else {
            return Err(StoreError::Command("ERR empty command".to_string()));
        };

        let mut cmd = redis::cmd(name);
        for arg in rest {
            cmd.arg(arg);
        }

        let _: redis::Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        Ok(())
    }

    async fn close(&self) {
        // Dropping the last handle shuts the multiplexed connection down.
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(conn);
    }
}
