//! Shared domain enumerations.

use std::{fmt, str::FromStr};

use super::error::DomainError;

/// Where a fresh subscription begins reading a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Only messages published after the subscription is established.
    #[default]
    Newest,
    /// Every message the broker still retains for the partition.
    Oldest,
}

impl StartPosition {
    pub fn as_str(self) -> &'static str {
        match self {
            StartPosition::Newest => "newest",
            StartPosition::Oldest => "oldest",
        }
    }
}

impl FromStr for StartPosition {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "newest" | "latest" | "end" => Ok(StartPosition::Newest),
            "oldest" | "earliest" | "beginning" => Ok(StartPosition::Oldest),
            other => Err(DomainError::validation(format!(
                "unknown start position `{other}` (expected newest|oldest)"
            ))),
        }
    }
}

/// Lifecycle of the relay task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Starting,
    Subscribing,
    Consuming,
    WritingCache,
    Stopped,
    Failed,
}

impl RelayState {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayState::Starting => "starting",
            RelayState::Subscribing => "subscribing",
            RelayState::Consuming => "consuming",
            RelayState::WritingCache => "writing_cache",
            RelayState::Stopped => "stopped",
            RelayState::Failed => "failed",
        }
    }

    /// True once the relay has a live subscription.
    pub fn is_live(self) -> bool {
        matches!(self, RelayState::Consuming | RelayState::WritingCache)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RelayState::Stopped | RelayState::Failed)
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
