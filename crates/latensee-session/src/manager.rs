//! Session manager for orchestrating latency measurements.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::StreamExt;
use latensee_core::{
    ConfigError, PeerId, PeerRegistry, ProbeResult, SessionConfig, StoreClient, StoreConnector,
    StoreError,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::probe::{CommandProbe, ProbeStream};

/// Identifier of one measurement session, fresh on every start.
pub type SessionId = Uuid;

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not start measuring latency, a session is already in progress")]
    AlreadyRunning,
    #[error("cannot {0} while a latency measurement is running")]
    InvalidState(&'static str),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
    #[error("Could not connect to store: {0}")]
    Connection(#[source] StoreError),
}

/// Running session state.
struct ActiveSession {
    id: SessionId,
    owner: PeerId,
    cancel: CancellationToken,
    /// `None` until the store connection is established.
    store: Option<Arc<dyn StoreClient>>,
}

#[derive(Default)]
struct SessionState {
    config: SessionConfig,
    active: Option<ActiveSession>,
}

/// State shared with the delivery tasks.
struct Shared {
    state: Mutex<SessionState>,
    peers: Arc<PeerRegistry>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tear down the active session if `matches` selects it.
    ///
    /// Cancels every probe, then closes the store. Returns whether a session
    /// was torn down.
    async fn end<F>(&self, matches: F, reason: &str) -> bool
    where
        F: FnOnce(&ActiveSession) -> bool,
    {
        let active = self.state().active.take_if(|active| matches(active));
        let Some(active) = active else {
            return false;
        };

        active.cancel.cancel();
        if let Some(store) = active.store {
            store.close().await;
        }

        tracing::info!(
            session = %active.id,
            peer = %active.owner,
            reason,
            "Latency measurement stopped"
        );
        true
    }
}

/// Owns the single measurement session of a backend.
///
/// Configuration may only change while no session runs; a running session
/// reads a frozen copy of it.
pub struct SessionManager {
    connector: Arc<dyn StoreConnector>,
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Create a session manager.
    #[must_use]
    pub fn new(connector: impl StoreConnector + 'static, peers: Arc<PeerRegistry>) -> Self {
        Self {
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::default()),
                peers,
            }),
        }
    }

    /// Peers that results are delivered to.
    #[must_use]
    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.shared.peers
    }

    fn configure<F>(&self, action: &'static str, update: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut SessionConfig),
    {
        let mut state = self.shared.state();
        if state.active.is_some() {
            return Err(SessionError::InvalidState(action));
        }
        update(&mut state.config);
        Ok(())
    }

    /// Replace the store address.
    ///
    /// # Errors
    /// Returns error if a session is running.
    pub fn set_address(&self, address: impl Into<String>) -> Result<(), SessionError> {
        let address = address.into();
        self.configure("change the store address", |config| config.address = address)
    }

    /// Replace the pause between executions.
    ///
    /// # Errors
    /// Returns error if a session is running.
    pub fn set_interval(&self, interval: Duration) -> Result<(), SessionError> {
        self.configure("change the interval", |config| config.interval = interval)
    }

    /// Replace the command list.
    ///
    /// # Errors
    /// Returns error if a session is running.
    pub fn set_commands(&self, commands: Vec<String>) -> Result<(), SessionError> {
        self.configure("change the commands", |config| config.commands = commands)
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> SessionConfig {
        self.shared.state().config.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state().active.is_some()
    }

    /// Start a measurement session on behalf of `caller`.
    ///
    /// Connects to the store, then starts one probe per command in
    /// configured order, waiting for each probe's first result before
    /// starting the next. Returns once every probe is live; results keep
    /// flowing to `caller` until the session ends.
    ///
    /// # Errors
    /// Returns error if a session is already running, the configuration is
    /// unusable, or the store cannot be reached.
    pub async fn start(&self, caller: PeerId) -> Result<(), SessionError> {
        let (session, config, commands, cancel) = {
            let mut state = self.shared.state();
            if state.active.is_some() {
                return Err(SessionError::AlreadyRunning);
            }
            let commands = state.config.command_lines()?;

            let session = Uuid::new_v4();
            let cancel = CancellationToken::new();
            state.active = Some(ActiveSession {
                id: session,
                owner: caller,
                cancel: cancel.clone(),
                store: None,
            });
            (session, state.config.clone(), commands, cancel)
        };

        let store = match self.connector.connect(&config.address).await {
            Ok(store) => store,
            Err(e) => {
                self.shared.state().active.take_if(|active| active.id == session);
                tracing::warn!(address = %config.address, "Could not connect to store: {e}");
                return Err(SessionError::Connection(e));
            }
        };

        if !self.attach_store(session, &store) {
            // Stopped while connecting.
            store.close().await;
            return Ok(());
        }

        tracing::info!(
            %session,
            peer = %caller,
            address = %config.address,
            interval = ?config.interval,
            commands = commands.len(),
            "Latency measurement started"
        );

        for command in commands {
            let label = command.to_string();
            let results = CommandProbe::new(Arc::clone(&store), command, config.interval)
                .spawn(cancel.clone());
            let (ready_tx, ready_rx) = oneshot::channel();

            tokio::spawn(deliver(
                Arc::clone(&self.shared),
                session,
                caller,
                results,
                ready_tx,
                cancel.clone(),
            ));

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                ready = ready_rx => {
                    if ready.is_err() {
                        break;
                    }
                    tracing::debug!(%session, command = %label, "Probe live");
                }
            }
        }

        Ok(())
    }

    fn attach_store(&self, session: SessionId, store: &Arc<dyn StoreClient>) -> bool {
        let mut state = self.shared.state();
        match state.active.as_mut() {
            Some(active) if active.id == session && !active.cancel.is_cancelled() => {
                active.store = Some(Arc::clone(store));
                true
            }
            _ => false,
        }
    }

    /// Stop the running session, if any.
    pub async fn stop(&self) {
        if !self.shared.end(|_| true, "stopped").await {
            tracing::debug!("Stop requested with no latency measurement running");
        }
    }

    /// Stop the running session if `peer` started it.
    pub async fn peer_disconnected(&self, peer: PeerId) {
        self.shared
            .end(|active| active.owner == peer, "peer disconnected")
            .await;
    }
}

/// Forward one probe's results to the peer that started the session.
///
/// Fires `ready` on the first result. Any failure to deliver, and any probe
/// failure, ends the whole session.
async fn deliver(
    shared: Arc<Shared>,
    session: SessionId,
    owner: PeerId,
    mut results: ProbeStream,
    ready: oneshot::Sender<()>,
    cancel: CancellationToken,
) {
    let mut ready = Some(ready);

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = results.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        if let Some(ready) = ready.take() {
            let _ = ready.send(());
        }

        if let ProbeResult::Failure { command, message } = result {
            tracing::warn!(%session, %command, error = %message, "Probe failed");
            // Torn down before the peer hears of it.
            if shared.end(|active| active.id == session, "probe failed").await {
                report_failure(&shared, owner, &message).await;
            }
            return;
        }

        if cancel.is_cancelled() {
            break;
        }

        let Some(peer) = shared.peers.lookup(owner) else {
            tracing::warn!(peer = %owner, "Could not find peer to write to, stopping");
            break;
        };

        let latency_us = result.latency_us().unwrap_or_default();
        let delivered = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            delivered = peer.handle_latency_measurement(result.command(), latency_us) => {
                delivered
            }
        };

        if let Err(e) = delivered {
            tracing::warn!(peer = %owner, "Could not deliver probe result, stopping: {e}");
            break;
        }
    }

    shared.end(|active| active.id == session, "probe ended").await;
}

async fn report_failure(shared: &Shared, owner: PeerId, message: &str) {
    let Some(peer) = shared.peers.lookup(owner) else {
        tracing::warn!(peer = %owner, "Could not find peer to report probe failure to");
        return;
    };
    if let Err(e) = peer.handle_error(message).await {
        tracing::warn!(peer = %owner, "Could not deliver probe failure: {e}");
    }
}
