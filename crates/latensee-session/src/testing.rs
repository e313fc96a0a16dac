//! Fakes shared by the session tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use latensee_core::{CallbackError, Peer, StoreClient, StoreConnector, StoreError};
use tokio::time::Instant;

/// Address the fake connector refuses.
pub const UNREACHABLE: &str = "unreachable://nowhere";

/// Store whose behaviour is scripted per command line.
#[derive(Default)]
pub struct FakeStore {
    latency: Duration,
    block: Option<String>,
    fail: Option<(String, usize)>,
    calls: Mutex<HashMap<String, usize>>,
    closes: AtomicUsize,
}

impl FakeStore {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Never answer `command`.
    pub fn blocking_on(mut self, command: &str) -> Self {
        self.block = Some(command.to_string());
        self
    }

    /// Fail the `nth` (1-based) and later executions of `command`.
    pub fn failing_on(mut self, command: &str, nth: usize) -> Self {
        self.fail = Some((command.to_string(), nth));
        self
    }

    pub fn calls(&self, command: &str) -> usize {
        self.calls.lock().unwrap().get(command).copied().unwrap_or(0)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreClient for FakeStore {
    async fn execute(&self, args: &[String]) -> Result<(), StoreError> {
        let line = args.join(" ");
        let nth = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(line.clone()).or_default();
            *count += 1;
            *count
        };

        if self.block.as_deref() == Some(line.as_str()) {
            std::future::pending::<()>().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some((command, from)) = &self.fail {
            if *command == line && nth >= *from {
                return Err(StoreError::Command("ERR injected failure".to_string()));
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the same fake store for every address but [`UNREACHABLE`].
pub struct FakeConnector {
    store: Arc<FakeStore>,
    connects: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(store: Arc<FakeStore>) -> (Self, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        (
            Self {
                store,
                connects: Arc::clone(&connects),
            },
            connects,
        )
    }
}

#[async_trait]
impl StoreConnector for FakeConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn StoreClient>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if address == UNREACHABLE {
            return Err(StoreError::Unreachable(format!("{address}: connection refused")));
        }
        Ok(Arc::clone(&self.store) as Arc<dyn StoreClient>)
    }
}

#[derive(Debug, Clone)]
pub enum Callback {
    Latency {
        command: String,
        latency_us: i64,
        at: Instant,
    },
    Error(String),
}

/// Peer that records every callback it receives.
#[derive(Default)]
pub struct RecordingPeer {
    events: Mutex<Vec<Callback>>,
    fail: AtomicBool,
    sample_delay: Duration,
    error_ack_delay: Duration,
}

impl RecordingPeer {
    /// Take `delay` to receive each sample.
    pub fn with_sample_delay(mut self, delay: Duration) -> Self {
        self.sample_delay = delay;
        self
    }

    /// Record errors at once but acknowledge them only after `delay`.
    pub fn with_error_ack_delay(mut self, delay: Duration) -> Self {
        self.error_ack_delay = delay;
        self
    }

    /// Make every later callback fail as if the link had dropped.
    pub fn fail_callbacks(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Callback> {
        self.events.lock().unwrap().clone()
    }

    pub fn latencies(&self, command: &str) -> Vec<(i64, Instant)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Callback::Latency {
                    command: c,
                    latency_us,
                    at,
                } if c == command => Some((latency_us, at)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Callback::Error(message) => Some(message),
                Callback::Latency { .. } => None,
            })
            .collect()
    }

    fn record(&self, event: Callback) -> Result<(), CallbackError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallbackError::LinkClosed);
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[async_trait]
impl Peer for RecordingPeer {
    async fn handle_latency_measurement(
        &self,
        command: &str,
        latency_us: i64,
    ) -> Result<(), CallbackError> {
        if !self.sample_delay.is_zero() {
            tokio::time::sleep(self.sample_delay).await;
        }
        self.record(Callback::Latency {
            command: command.to_string(),
            latency_us,
            at: Instant::now(),
        })
    }

    async fn handle_error(&self, message: &str) -> Result<(), CallbackError> {
        self.record(Callback::Error(message.to_string()))?;
        if !self.error_ack_delay.is_zero() {
            tokio::time::sleep(self.error_ack_delay).await;
        }
        Ok(())
    }
}
