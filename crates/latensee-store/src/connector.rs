//! Address-based store selection.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use latensee_core::{StoreClient, StoreConnector, StoreError};

/// Default bound on establishing a store connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Store backend selected by an address scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Fresh in-process store (`memory://`).
    #[cfg(feature = "memory")]
    Memory,
    /// Redis-compatible server; holds the URL to dial.
    #[cfg(feature = "redis")]
    Redis(String),
}

impl Backend {
    /// Pick a backend for `address`.
    ///
    /// `store://` is the generic spelling controllers use and is dialled as
    /// `redis://`.
    ///
    /// # Errors
    /// Returns error if the scheme is missing or unsupported.
    pub fn from_address(address: &str) -> Result<Self, StoreError> {
        let address = address.trim();
        let (scheme, rest) = address
            .split_once("://")
            .ok_or_else(|| StoreError::InvalidAddress(format!("{address}: missing scheme")))?;

        match scheme.to_ascii_lowercase().as_str() {
            "memory" => memory_backend(),
            "store" => redis_backend(format!("redis://{rest}")),
            "redis" | "rediss" | "redis+unix" | "unix" => redis_backend(address.to_string()),
            other => Err(StoreError::InvalidAddress(format!(
                "{address}: unsupported scheme '{other}'"
            ))),
        }
    }
}

#[cfg(feature = "memory")]
#[allow(clippy::unnecessary_wraps)]
const fn memory_backend() -> Result<Backend, StoreError> {
    Ok(Backend::Memory)
}

#[cfg(not(feature = "memory"))]
fn memory_backend() -> Result<Backend, StoreError> {
    Err(StoreError::InvalidAddress(
        "memory store support is not enabled".to_string(),
    ))
}

#[cfg(feature = "redis")]
#[allow(clippy::unnecessary_wraps)]
const fn redis_backend(url: String) -> Result<Backend, StoreError> {
    Ok(Backend::Redis(url))
}

#[cfg(not(feature = "redis"))]
fn redis_backend(_url: String) -> Result<Backend, StoreError> {
    Err(StoreError::InvalidAddress(
        "redis store support is not enabled".to_string(),
    ))
}

/// Connector covering every compiled-in backend.
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    connect_timeout: Duration,
}

impl DefaultConnector {
    /// Create a connector with the default connect timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for DefaultConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreConnector for DefaultConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn StoreClient>, StoreError> {
        match Backend::from_address(address)? {
            #[cfg(feature = "memory")]
            Backend::Memory => Ok(Arc::new(crate::MemoryStore::new())),
            #[cfg(feature = "redis")]
            Backend::Redis(url) => Ok(Arc::new(
                crate::RedisStore::connect(&url, self.connect_timeout).await?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    #[test]
    fn test_missing_scheme_is_invalid() {
        assert!(matches!(
            Backend::from_address("localhost:6379"),
            Err(StoreError::InvalidAddress(_))
        ));
        assert!(matches!(
            Backend::from_address(""),
            Err(StoreError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_unknown_scheme_is_invalid() {
        let err = Backend::from_address("http://localhost").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme 'http'"));
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_store_scheme_is_redis_alias() {
        assert_eq!(
            Backend::from_address("store://localhost:6379/0").unwrap(),
            Backend::Redis("redis://localhost:6379/0".to_string())
        );
        assert_eq!(
            Backend::from_address(" redis://localhost:6379/0 ").unwrap(),
            Backend::Redis("redis://localhost:6379/0".to_string())
        );
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_memory_connection() {
        let store = DefaultConnector::new().connect("memory://").await.unwrap();
        assert_ok!(store.execute(&["PING".to_string()]).await);
        store.close().await;
        assert_eq!(
            store.execute(&["PING".to_string()]).await,
            Err(StoreError::Closed)
        );
    }

    #[cfg(feature = "redis")]
    #[tokio::test]
    async fn test_unreachable_redis_fails_to_connect() {
        // Nothing listens on port 1.
        let connector = DefaultConnector::new().with_connect_timeout(Duration::from_secs(2));
        let result = connector.connect("redis://127.0.0.1:1/0").await;
        assert!(matches!(
            result,
            Err(StoreError::Unreachable(_) | StoreError::Timeout(_))
        ));
    }
}
