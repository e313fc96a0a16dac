//! Probe observations.

use std::time::Duration;

/// One observation emitted by a command probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The command completed after `latency`.
    Sample { command: String, latency: Duration },
    /// The command failed. Always the last result of its probe.
    Failure { command: String, message: String },
}

impl ProbeResult {
    /// The configured command line this result belongs to.
    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            Self::Sample { command, .. } | Self::Failure { command, .. } => command,
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Latency in whole microseconds, saturating at `i64::MAX`.
    #[must_use]
    pub fn latency_us(&self) -> Option<i64> {
        match self {
            Self::Sample { latency, .. } => {
                Some(i64::try_from(latency.as_micros()).unwrap_or(i64::MAX))
            }
            Self::Failure { .. } => None,
        }
    }
}
