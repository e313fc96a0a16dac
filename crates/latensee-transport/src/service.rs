//! Functions the backend exposes to its controller.

use async_trait::async_trait;
use latensee_core::{PeerId, SessionConfig};
use latensee_session::{SessionError, SessionManager};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::protocol::functions;

/// Error returned to a caller of a local function.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Invalid arguments for {function}: {reason}")]
    InvalidArguments { function: String, reason: String },
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Handler for requests arriving over a link.
#[async_trait]
pub trait LocalService: Send + Sync {
    /// Run `function` on behalf of `caller`.
    async fn dispatch(
        &self,
        caller: PeerId,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Value, ServiceError>;

    /// Called once the link to `peer` is gone.
    async fn on_disconnect(&self, _peer: PeerId) {}
}

fn decode_args<T: DeserializeOwned>(function: &str, args: Vec<Value>) -> Result<T, ServiceError> {
    serde_json::from_value(Value::Array(args)).map_err(|e| ServiceError::InvalidArguments {
        function: function.to_string(),
        reason: e.to_string(),
    })
}

fn expect_no_args(function: &str, args: &[Value]) -> Result<(), ServiceError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::InvalidArguments {
            function: function.to_string(),
            reason: format!("expected no arguments, got {}", args.len()),
        })
    }
}

#[async_trait]
impl LocalService for SessionManager {
    async fn dispatch(
        &self,
        caller: PeerId,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Value, ServiceError> {
        tracing::debug!(peer = %caller, function, "Dispatching call");

        match function {
            functions::SET_URL => {
                let (address,): (String,) = decode_args(function, args)?;
                self.set_address(address)?;
                Ok(Value::Null)
            }
            functions::SET_INTERVAL => {
                let (millis,): (i64,) = decode_args(function, args)?;
                self.set_interval(SessionConfig::interval_from_millis(millis))?;
                Ok(Value::Null)
            }
            functions::SET_COMMANDS => {
                let (commands,): (Vec<String>,) = decode_args(function, args)?;
                self.set_commands(commands)?;
                Ok(Value::Null)
            }
            functions::GET_IS_LATENCY_MEASURING => {
                expect_no_args(function, &args)?;
                Ok(Value::Bool(self.is_running()))
            }
            functions::START_LATENCY_MEASUREMENT => {
                expect_no_args(function, &args)?;
                self.start(caller).await?;
                Ok(Value::Null)
            }
            functions::STOP_LATENCY_MEASUREMENT => {
                expect_no_args(function, &args)?;
                self.stop().await;
                Ok(Value::Null)
            }
            other => Err(ServiceError::UnknownFunction(other.to_string())),
        }
    }

    async fn on_disconnect(&self, peer: PeerId) {
        self.peer_disconnected(peer).await;
    }
}
