//! Link timing configuration.

use std::time::Duration;

/// Default period between liveness probes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Default silence after which a link is considered dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a callback waits for the peer's response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing of one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Period between liveness probes.
    pub heartbeat_interval: Duration,
    /// A link with no inbound frame for this long is torn down.
    pub idle_timeout: Duration,
    /// Upper bound on waiting for the response to an outgoing call.
    pub call_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl LinkConfig {
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}
