//! One bidirectional RPC link to a connected peer.
//!
//! A link is independent of the socket underneath it: the transport feeds
//! inbound text frames to [`Link::handle_text`] and drains [`Outbound`]
//! frames from the receiver returned by [`Link::new`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use latensee_core::{PeerId, PeerRegistry};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::{
    config::LinkConfig,
    peer::RemotePeer,
    protocol::{CallId, Envelope, response_result},
    service::LocalService,
};

/// Frame queued for the socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Envelope(Envelope),
    /// Liveness probe; the peer answers with a pong.
    Ping,
}

/// Link error.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Link closed")]
    Closed,
    #[error("Malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Frame is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("No response to {function} within {timeout:?}")]
    CallTimeout { function: String, timeout: Duration },
    #[error("No frame from peer for {0:?}")]
    LivenessTimeout(Duration),
    #[error("Write failed: {0}")]
    Write(String),
}

type PendingCalls = HashMap<CallId, oneshot::Sender<Result<Value, String>>>;

/// Forgets a pending call when its caller stops waiting.
struct PendingGuard<'a> {
    link: &'a Link,
    id: CallId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.link.pending().remove(&self.id);
    }
}

/// RPC endpoint for one peer.
///
/// Inbound requests are dispatched to the local service, each on its own
/// task, so a long-running request never blocks responses to calls this
/// side has made.
pub struct Link {
    peer: PeerId,
    outbound: mpsc::UnboundedSender<Outbound>,
    service: Arc<dyn LocalService>,
    pending: Mutex<PendingCalls>,
    closed: CancellationToken,
    last_seen: Mutex<Instant>,
    config: LinkConfig,
}

impl Link {
    /// Create a link and the queue of frames it wants written.
    #[must_use]
    pub fn new(
        peer: PeerId,
        service: Arc<dyn LocalService>,
        config: LinkConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Self {
            peer,
            outbound,
            service,
            pending: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
            last_seen: Mutex::new(Instant::now()),
            config,
        });
        (link, rx)
    }

    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer
    }

    #[must_use]
    pub const fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn pending(&self) -> MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make this link reachable for probe callbacks.
    pub fn register(self: &Arc<Self>, registry: &PeerRegistry) {
        registry.register(self.peer, Arc::new(RemotePeer::new(Arc::clone(self))));
    }

    /// Queue an envelope for the writer.
    ///
    /// # Errors
    /// Returns error if the link is closed.
    pub fn send(&self, envelope: Envelope) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        self.outbound
            .send(Outbound::Envelope(envelope))
            .map_err(|_| LinkError::Closed)
    }

    /// Queue a liveness probe.
    ///
    /// # Errors
    /// Returns error if the link is closed.
    pub fn ping(&self) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        self.outbound.send(Outbound::Ping).map_err(|_| LinkError::Closed)
    }

    /// Record that a frame arrived from the peer.
    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the link is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Invoke `function` on the peer and wait for its response.
    ///
    /// # Errors
    /// Returns error if the link closes first, the peer reports an error,
    /// or no response arrives within the call timeout.
    pub async fn call(&self, function: &str, args: Vec<Value>) -> Result<Value, LinkError> {
        let request = Envelope::request(function, args);
        let id = request.id();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        let _guard = PendingGuard { link: self, id };

        self.send(request)?;

        let timeout = self.config.call_timeout;
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(LinkError::Closed),
            response = tokio::time::timeout(timeout, rx) => match response {
                Ok(Ok(result)) => result.map_err(LinkError::Remote),
                Ok(Err(_)) => Err(LinkError::Closed),
                Err(_) => Err(LinkError::CallTimeout {
                    function: function.to_string(),
                    timeout,
                }),
            },
        }
    }

    /// Handle one inbound text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a valid envelope. The link is
    /// unusable afterwards and should be torn down.
    pub fn handle_text(self: &Arc<Self>, text: &str) -> Result<(), LinkError> {
        let envelope = Envelope::decode(text)?;
        self.handle_envelope(envelope);
        Ok(())
    }

    /// Handle one inbound binary frame, which must carry UTF-8 text.
    ///
    /// # Errors
    /// Returns error if the frame is not UTF-8 or not a valid envelope.
    pub fn handle_binary(self: &Arc<Self>, data: &[u8]) -> Result<(), LinkError> {
        let text = std::str::from_utf8(data)?;
        self.handle_text(text)
    }

    /// Handle one inbound envelope.
    pub fn handle_envelope(self: &Arc<Self>, envelope: Envelope) {
        match envelope {
            Envelope::Request { id, function, args } => {
                let link = Arc::clone(self);
                tokio::spawn(async move {
                    let result = link
                        .service
                        .dispatch(link.peer, &function, args)
                        .await
                        .map_err(|e| {
                            tracing::debug!(peer = %link.peer, function, "Call failed: {e}");
                            e.to_string()
                        });
                    if link.send(Envelope::response(id, result)).is_err() {
                        tracing::debug!(peer = %link.peer, function, "Link closed before response");
                    }
                });
            }
            Envelope::Response { id, value, error } => {
                let Some(waiter) = self.pending().remove(&id) else {
                    tracing::debug!(peer = %self.peer, call = %id, "Response to unknown call");
                    return;
                };
                let _ = waiter.send(response_result(value, error));
            }
        }
    }

    /// Close the link. Outstanding calls fail with [`LinkError::Closed`].
    pub fn close(&self) {
        self.closed.cancel();
        self.pending().clear();
    }

    /// Close the link, forget the peer and notify the local service.
    pub async fn teardown(&self, registry: &PeerRegistry) {
        self.close();
        registry.unregister(self.peer);
        self.service.on_disconnect(self.peer).await;
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::service::ServiceError;

    struct Echo;

    #[async_trait]
    impl LocalService for Echo {
        async fn dispatch(
            &self,
            _caller: PeerId,
            function: &str,
            args: Vec<Value>,
        ) -> Result<Value, ServiceError> {
            match function {
                "Echo" => Ok(Value::Array(args)),
                other => Err(ServiceError::UnknownFunction(other.to_string())),
            }
        }
    }

    fn link(config: LinkConfig) -> (Arc<Link>, mpsc::UnboundedReceiver<Outbound>) {
        Link::new(Uuid::new_v4(), Arc::new(Echo), config)
    }

    #[tokio::test]
    async fn test_request_gets_response() {
        let (link, mut rx) = link(LinkConfig::default());
        let request = Envelope::request("Echo", vec![json!(1), json!("a")]);
        let id = request.id();
        link.handle_envelope(request);

        let Some(Outbound::Envelope(response)) = rx.recv().await else {
            panic!("Expected a response");
        };
        assert_eq!(response, Envelope::response(id, Ok(json!([1, "a"]))));
    }

    #[tokio::test]
    async fn test_unknown_function_reports_error() {
        let (link, mut rx) = link(LinkConfig::default());
        let request = Envelope::request("Nope", vec![]);
        let id = request.id();
        link.handle_envelope(request);

        let Some(Outbound::Envelope(response)) = rx.recv().await else {
            panic!("Expected a response");
        };
        assert_eq!(
            response,
            Envelope::response(id, Err("Unknown function: Nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_call_resolves_with_response() {
        let (link, mut rx) = link(LinkConfig::default());

        let caller = Arc::clone(&link);
        let call = tokio::spawn(async move { caller.call("Remote", vec![json!(7)]).await });

        let Some(Outbound::Envelope(Envelope::Request { id, function, args })) = rx.recv().await
        else {
            panic!("Expected a request");
        };
        assert_eq!(function, "Remote");
        assert_eq!(args, vec![json!(7)]);

        link.handle_envelope(Envelope::response(id, Ok(json!("done"))));
        assert_eq!(call.await.unwrap().unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn test_call_surfaces_remote_error() {
        let (link, mut rx) = link(LinkConfig::default());

        let caller = Arc::clone(&link);
        let call = tokio::spawn(async move { caller.call("Remote", vec![]).await });

        let Some(Outbound::Envelope(request)) = rx.recv().await else {
            panic!("Expected a request");
        };
        link.handle_envelope(Envelope::response(request.id(), Err("nope".to_string())));

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, LinkError::Remote(message) if message == "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let config = LinkConfig::default().with_call_timeout(Duration::from_millis(200));
        let (link, _rx) = link(config);

        let err = link.call("Remote", vec![]).await.unwrap_err();
        assert!(matches!(err, LinkError::CallTimeout { .. }));
        assert!(link.pending().is_empty());
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let (link, mut rx) = link(LinkConfig::default());

        let caller = Arc::clone(&link);
        let call = tokio::spawn(async move { caller.call("Remote", vec![]).await });
        assert!(rx.recv().await.is_some());

        link.close();
        assert!(matches!(call.await.unwrap(), Err(LinkError::Closed)));
        assert!(matches!(link.call("Remote", vec![]).await, Err(LinkError::Closed)));
        assert!(matches!(link.ping(), Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn test_malformed_frame() {
        let (link, _rx) = link(LinkConfig::default());
        assert!(matches!(link.handle_text("{"), Err(LinkError::Decode(_))));
    }

    #[tokio::test]
    async fn test_binary_frames() {
        let (link, mut rx) = link(LinkConfig::default());
        assert!(matches!(
            link.handle_binary(&[0xff, 0xfe]),
            Err(LinkError::NotUtf8(_))
        ));

        let request = Envelope::request("Echo", vec![json!(true)]);
        let id = request.id();
        link.handle_binary(request.encode().unwrap().as_bytes()).unwrap();
        let Some(Outbound::Envelope(response)) = rx.recv().await else {
            panic!("Expected a response");
        };
        assert_eq!(response, Envelope::response(id, Ok(json!([true]))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_is_forgotten() {
        let (link, _rx) = link(LinkConfig::default());
        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), link.call("Remote", vec![])).await;
        assert!(abandoned.is_err());
        assert!(link.pending().is_empty());
    }

    #[tokio::test]
    async fn test_stray_response_is_ignored() {
        let (link, _rx) = link(LinkConfig::default());
        link.handle_envelope(Envelope::response(Uuid::new_v4(), Ok(Value::Null)));
        assert!(!link.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_idle_time() {
        let (link, _rx) = link(LinkConfig::default());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(link.idle_for() >= Duration::from_secs(2));

        link.touch();
        assert_eq!(link.idle_for(), Duration::ZERO);
    }
}
