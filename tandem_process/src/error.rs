//! Process layer errors.

use std::time::Duration;
use tandem_common::fault::FaultKind;
use thiserror::Error;

/// Cycling process errors (both sides of the channel).
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The worker process could not be started.
    #[error("process '{name}': failed to spawn: {source}")]
    Spawn {
        /// Process name.
        name: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The peer closed its end of the message channel.
    #[error("process '{name}': remote side is gone")]
    RemoteGone {
        /// Process name.
        name: String,
    },

    /// The peer did not take a message within the send timeout; it was not
    /// delivered.
    #[error("process '{name}': message not taken within {timeout:?}")]
    SendTimeout {
        /// Process name.
        name: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// No `AcknProcessStarted` within the start timeout.
    #[error("process '{name}': no start acknowledgement within {timeout:?}")]
    StartTimeout {
        /// Process name.
        name: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// A message could not be encoded or decoded.
    #[error("process '{name}': message codec: {source}")]
    Codec {
        /// Process name.
        name: String,
        /// Serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// Niceness could not be applied.
    #[error("setpriority({nice}) failed: {source}")]
    Priority {
        /// Requested niceness.
        nice: i32,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Unknown priority class name.
    #[error("unknown priority class '{0}' (expected low, normal, high or highest)")]
    UnknownPriority(String),

    /// Cycle time must be positive.
    #[error("process '{name}': cycle time must be > 0")]
    InvalidCycleTime {
        /// Process name.
        name: String,
    },

    /// A thread-hosted worker panicked.
    #[error("process '{name}': worker thread panicked")]
    WorkerPanicked {
        /// Process name.
        name: String,
    },

    /// Waiting for the worker failed.
    #[error("process '{name}': {source}")]
    Io {
        /// Process name.
        name: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Fault classification.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            Self::RemoteGone { .. } | Self::StartTimeout { .. } => FaultKind::RemoteProcessGone,
            Self::SendTimeout { .. } => FaultKind::MessageOverflow,
            _ => FaultKind::ProgrammingError,
        }
    }
}

/// Result alias for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;
