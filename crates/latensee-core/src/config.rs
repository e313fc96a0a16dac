//! Measurement session configuration.

use std::time::Duration;

use thiserror::Error;

/// Configuration error, surfaced when a session is started.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No commands configured")]
    NoCommands,
    #[error("Command {index} is empty")]
    EmptyCommand { index: usize },
    #[error("Command cannot be parsed: {0}")]
    InvalidCommand(String),
}

/// What a measurement session probes.
///
/// Replaced field by field through the setters, never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Connection target for the key-value store.
    pub address: String,

    /// Pause between successive executions of one command.
    pub interval: Duration,

    /// Command lines to probe, in the order they are started.
    pub commands: Vec<String>,
}

impl SessionConfig {
    /// Create a configuration.
    #[must_use]
    pub fn new(address: impl Into<String>, interval: Duration, commands: Vec<String>) -> Self {
        Self {
            address: address.into(),
            interval,
            commands,
        }
    }

    /// Convert an interval given in milliseconds.
    ///
    /// Zero or negative values mean "no pause" rather than an error.
    #[must_use]
    pub fn interval_from_millis(millis: i64) -> Duration {
        u64::try_from(millis).map_or(Duration::ZERO, Duration::from_millis)
    }

    /// Tokenise every configured command.
    ///
    /// # Errors
    /// Returns error if the list is empty or any command has no tokens.
    pub fn command_lines(&self) -> Result<Vec<CommandLine>, ConfigError> {
        if self.commands.is_empty() {
            return Err(ConfigError::NoCommands);
        }

        self.commands
            .iter()
            .enumerate()
            .map(|(index, raw)| match CommandLine::parse(raw) {
                Err(ConfigError::EmptyCommand { .. }) => Err(ConfigError::EmptyCommand { index }),
                other => other,
            })
            .collect()
    }
}

/// A command line split into the tokens sent to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    raw: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Split a command line using POSIX shell quoting rules.
    ///
    /// # Errors
    /// Returns error if quoting is unbalanced or there are no tokens.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let args =
            shlex::split(raw).ok_or_else(|| ConfigError::InvalidCommand(raw.to_string()))?;
        if args.is_empty() {
            return Err(ConfigError::EmptyCommand { index: 0 });
        }

        Ok(Self {
            raw: raw.to_string(),
            args,
        })
    }

    /// The command line as configured; used to label results.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
