//! Runtime fault taxonomy.
//!
//! Faults are never swallowed: workers publish them on their error channel
//! and keep cycling unless the fault is fatal to the operation that raised it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of runtime fault and its recovery class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// API misuse (type mismatch, duplicate subscriber, bad job period).
    ProgrammingError,
    /// Effective cycle exceeded nominal beyond tolerance.
    CycleOverrun,
    /// A PLC job exceeded its own period.
    SenderCycleOverrun,
    /// Illegal PLC operation-mode edge.
    InvalidOpModeTransition,
    /// Controller traversal did not reach the sentinel.
    SentinelMissing,
    /// Worker process channel is broken.
    RemoteProcessGone,
    /// A process message was dropped because the peer did not take it in time.
    MessageOverflow,
    /// A port adapter failed to read or write.
    AdapterFailure,
    /// A user payload returned an error.
    PayloadFailure,
}

impl FaultKind {
    /// Fatal faults terminate the offending operation.
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::ProgrammingError | Self::SentinelMissing)
    }

    /// Stable short name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProgrammingError => "programming_error",
            Self::CycleOverrun => "cycle_overrun",
            Self::SenderCycleOverrun => "sender_cycle_overrun",
            Self::InvalidOpModeTransition => "invalid_opmode_transition",
            Self::SentinelMissing => "sentinel_missing",
            Self::RemoteProcessGone => "remote_process_gone",
            Self::MessageOverflow => "message_overflow",
            Self::AdapterFailure => "adapter_failure",
            Self::PayloadFailure => "payload_failure",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault report published on an error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Classification.
    pub kind: FaultKind,
    /// Worker, port, or job that raised it.
    pub origin: String,
    /// Human-readable detail.
    pub message: String,
}

impl Fault {
    /// Build a fault from any displayable cause.
    pub fn new(kind: FaultKind, origin: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            kind,
            origin: origin.into(),
            message: cause.to_string(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.origin, self.message)
    }
}
