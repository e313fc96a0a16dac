//! WebSocket transport for controller links.

use std::{fmt::Display, sync::Arc};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use latensee_core::PeerRegistry;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::{
    config::LinkConfig,
    heartbeat::HeartbeatMonitor,
    link::{Link, LinkError, Outbound},
    service::LocalService,
};

/// WebSocket handler state.
#[derive(Clone)]
pub struct ServerState {
    pub service: Arc<dyn LocalService>,
    pub registry: Arc<PeerRegistry>,
    pub config: LinkConfig,
}

impl ServerState {
    /// Create handler state with default link timing.
    #[must_use]
    pub fn new(service: Arc<dyn LocalService>, registry: Arc<PeerRegistry>) -> Self {
        Self {
            service,
            registry,
            config: LinkConfig::default(),
        }
    }

    #[must_use]
    pub fn with_link_config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let (sender, receiver) = socket.split();
    serve_link(sender, receiver, state).await;
}

/// Serve one link over a split message socket until either side ends it.
///
/// The link is torn down when the peer hangs up, sends an undecodable
/// frame, stops answering pings, or can no longer be written to.
async fn serve_link<W, R, E>(mut sender: W, mut receiver: R, state: ServerState)
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let peer = Uuid::new_v4();
    let (link, mut outbound) = Link::new(peer, Arc::clone(&state.service), state.config.clone());

    // Spawn task to forward queued frames to the socket
    let writer_link = Arc::clone(&link);
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                Outbound::Envelope(envelope) => match envelope.encode() {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {e}");
                        continue;
                    }
                },
                Outbound::Ping => Message::Ping(Bytes::new()),
            };
            if let Err(e) = sender.send(message).await {
                let err = LinkError::Write(e.to_string());
                tracing::debug!(%peer, "{err}");
                break;
            }
        }
        writer_link.close();
    });

    let monitor_link = Arc::clone(&link);
    let heartbeat_task = tokio::spawn(async move {
        let reason = HeartbeatMonitor::new(Arc::clone(&monitor_link)).run().await;
        if !matches!(reason, LinkError::Closed) {
            tracing::info!(%peer, "Closing link: {reason}");
        }
        monitor_link.close();
    });

    link.register(&state.registry);

    // Handle incoming frames
    loop {
        let msg = tokio::select! {
            () = link.closed() => break,
            msg = receiver.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let handled = match msg {
            Ok(Message::Text(text)) => {
                link.touch();
                link.handle_text(text.as_str())
            }
            Ok(Message::Binary(data)) => {
                link.touch();
                link.handle_binary(&data)
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                link.touch();
                continue;
            }
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        if let Err(e) = handled {
            tracing::warn!(%peer, "Closing link: {e}");
            break;
        }
    }

    // Cleanup
    link.teardown(&state.registry).await;
    heartbeat_task.abort();
    send_task.abort();

    tracing::debug!(%peer, "WebSocket disconnected");
}

/// Create the controller router.
///
/// Links are accepted on `/` and on `/ws`.
#[must_use]
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind a listener and return it with the URL controllers should dial.
///
/// # Errors
/// Returns error if the address cannot be bound.
pub async fn bind(addr: &str) -> std::io::Result<(TcpListener, String)> {
    let listener = TcpListener::bind(addr).await?;
    let url = format!("ws://{}", listener.local_addr()?);
    Ok((listener, url))
}
