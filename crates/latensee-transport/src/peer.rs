//! Probe callbacks delivered over a link.

use std::sync::Arc;

use async_trait::async_trait;
use latensee_core::{CallbackError, Peer};
use serde_json::json;

use crate::{
    link::{Link, LinkError},
    protocol::functions,
};

/// The controller at the far end of a link.
pub struct RemotePeer {
    link: Arc<Link>,
}

impl RemotePeer {
    #[must_use]
    pub const fn new(link: Arc<Link>) -> Self {
        Self { link }
    }
}

#[async_trait]
impl Peer for RemotePeer {
    async fn handle_latency_measurement(
        &self,
        command: &str,
        latency_us: i64,
    ) -> Result<(), CallbackError> {
        self.link
            .call(
                functions::HANDLE_LATENCY_MEASUREMENT,
                vec![json!(command), json!(latency_us)],
            )
            .await?;
        Ok(())
    }

    async fn handle_error(&self, message: &str) -> Result<(), CallbackError> {
        self.link
            .call(functions::HANDLE_ERROR, vec![json!(message)])
            .await?;
        Ok(())
    }
}

impl From<LinkError> for CallbackError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Closed => Self::LinkClosed,
            LinkError::Remote(message) => Self::Remote(message),
            other => Self::Unreachable(other.to_string()),
        }
    }
}
