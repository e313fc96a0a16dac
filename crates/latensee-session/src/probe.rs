//! Repeated execution of one command against the store.

use std::{sync::Arc, time::Duration};

use latensee_core::{CommandLine, ProbeResult, StoreClient};
use tokio::{sync::mpsc, time::Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Results of a running probe.
///
/// Ends after a failure, on cancellation, or when dropped.
pub type ProbeStream = ReceiverStream<ProbeResult>;

/// Times one command in a loop.
///
/// The probe runs as its own task and produces results lazily: the channel
/// holds a single result, so the probe never runs more than one execution
/// ahead of its consumer.
pub struct CommandProbe {
    store: Arc<dyn StoreClient>,
    command: CommandLine,
    interval: Duration,
}

impl CommandProbe {
    /// Create a probe. A zero interval probes back to back.
    #[must_use]
    pub fn new(store: Arc<dyn StoreClient>, command: CommandLine, interval: Duration) -> Self {
        Self {
            store,
            command,
            interval,
        }
    }

    /// Start probing until `cancel` fires or a command fails.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> ProbeStream {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(self.run(tx, cancel));
        ReceiverStream::new(rx)
    }

    async fn run(self, tx: mpsc::Sender<ProbeResult>, cancel: CancellationToken) {
        loop {
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                outcome = self.store.execute(self.command.args()) => outcome,
            };
            let latency = started.elapsed();

            let result = match outcome {
                Ok(()) => ProbeResult::Sample {
                    command: self.command.to_string(),
                    latency,
                },
                Err(e) => ProbeResult::Failure {
                    command: self.command.to_string(),
                    message: e.to_string(),
                },
            };
            let failed = result.is_failure();

            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                sent = tx.send(result) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }

            if failed {
                tracing::debug!(command = %self.command, "Probe stopped after failure");
                return;
            }

            if self.interval.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
