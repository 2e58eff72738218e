//! Error types for the in-process runtime.
//!
//! Every error maps onto the runtime fault taxonomy through `fault_kind()`,
//! so workers can report it on their `on_error` channel.

use std::time::Duration;
use tandem_common::fault::FaultKind;
use tandem_image::{BoxError, ImageError};
use thiserror::Error;

/// Boxed error returned by cycle payloads and PLC jobs.
pub type PayloadError = Box<dyn std::error::Error + Send + Sync>;

/// Cycler construction and control errors.
#[derive(Debug, Error)]
pub enum CyclerError {
    /// Cycle time must be positive.
    #[error("cycler '{name}': cycle time must be > 0")]
    InvalidCycleTime {
        /// Cycler name.
        name: String,
    },

    /// Worker thread could not be spawned.
    #[error("cycler '{name}': failed to spawn worker thread: {source}")]
    Spawn {
        /// Cycler name.
        name: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The worker has exited; requests can no longer be delivered.
    #[error("cycler '{name}' is terminated")]
    Terminated {
        /// Cycler name.
        name: String,
    },

    /// A synchronous request was issued from the worker's own thread.
    #[error("cycler '{name}': synchronous request from the worker thread would deadlock")]
    SyncFromWorker {
        /// Cycler name.
        name: String,
    },

    /// The worker thread panicked.
    #[error("cycler '{name}': worker thread panicked")]
    WorkerPanicked {
        /// Cycler name.
        name: String,
    },
}

/// PLC construction and operation errors.
#[derive(Debug, Error)]
pub enum PlcError {
    /// Job period shorter than the PLC cycle.
    #[error("job '{job}': period {period:?} is shorter than the PLC cycle {cycle:?}")]
    JobPeriodTooShort {
        /// Job id.
        job: String,
        /// Requested period.
        period: Duration,
        /// PLC cycle time.
        cycle: Duration,
    },

    /// Two jobs with the same id.
    #[error("duplicate job id '{0}'")]
    DuplicateJob(String),

    /// Illegal operation-mode edge; the mode is unchanged.
    #[error("invalid operation mode transition {from} -> {to}: {reason}")]
    InvalidTransition {
        /// Current mode.
        from: String,
        /// Requested mode.
        to: String,
        /// Rejection reason.
        reason: &'static str,
    },

    /// Cycler failure.
    #[error(transparent)]
    Cycler(#[from] CyclerError),

    /// Box failure.
    #[error(transparent)]
    Box(#[from] BoxError),

    /// Image failure.
    #[error(transparent)]
    Image(#[from] ImageError),
}

impl PlcError {
    /// Fault classification.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            Self::InvalidTransition { .. } => FaultKind::InvalidOpModeTransition,
            _ => FaultKind::ProgrammingError,
        }
    }
}

/// Controller pipeline errors.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Traversal stopped before reaching the sentinel.
    #[error("controller '{controller}': sentinel not reached (traversal stopped at '{stopped_at}')")]
    SentinelMissing {
        /// Controller name.
        controller: String,
        /// Node that cut the traversal short.
        stopped_at: String,
    },

    /// Sampling time box holds a non-positive value.
    #[error("invalid sampling time {0} s")]
    InvalidSamplingTime(f64),

    /// A parameter is out of its valid domain.
    #[error("parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Constraint that failed.
        reason: String,
    },

    /// Box failure.
    #[error(transparent)]
    Box(#[from] BoxError),

    /// Actuator adapter failure.
    #[error("actuator: {0}")]
    Adapter(#[from] AdapterError),
}

impl ControlError {
    /// Fault classification.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            Self::SentinelMissing { .. } => FaultKind::SentinelMissing,
            Self::Adapter(_) => FaultKind::AdapterFailure,
            _ => FaultKind::ProgrammingError,
        }
    }
}

/// State machine construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsmError {
    /// Two different state factories share one name.
    #[error("state machine '{machine}': state name '{state}' is bound to two different states")]
    ConflictingState {
        /// Machine name.
        machine: String,
        /// Offending state name.
        state: &'static str,
    },
}

/// Device adapter failures.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Device is not ready or not connected.
    #[error("device not ready: {0}")]
    NotReady(String),

    /// Value outside the device's accepted range.
    #[error("value {value} outside [{min}, {max}]")]
    OutOfRange {
        /// Offending value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// Value kind the adapter cannot handle.
    #[error("unsupported value: {0}")]
    Unsupported(String),

    /// OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other device failure.
    #[error("{0}")]
    Device(String),
}

/// Direction of an IO port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    /// Hardware → box.
    In,
    /// Box → hardware.
    Out,
}

/// Port read/write failure.
#[derive(Debug, Error)]
pub enum PortError {
    /// Adapter raised.
    #[error("port '{port}' ({direction:?}): {source}")]
    Adapter {
        /// Port name.
        port: String,
        /// Port direction.
        direction: PortDirection,
        /// Adapter error.
        #[source]
        source: AdapterError,
    },

    /// Box rejected the value read from the adapter.
    #[error("port '{port}': {source}")]
    Box {
        /// Port name.
        port: String,
        /// Box error.
        #[source]
        source: BoxError,
    },

    /// Two ports share a name.
    #[error("duplicate port '{0}'")]
    Duplicate(String),
}

impl PortError {
    /// Fault classification.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            Self::Adapter { .. } => FaultKind::AdapterFailure,
            _ => FaultKind::ProgrammingError,
        }
    }

    /// Port name.
    pub fn port(&self) -> &str {
        match self {
            Self::Adapter { port, .. } | Self::Box { port, .. } => port,
            Self::Duplicate(port) => port,
        }
    }
}

/// Runtime context assembly errors.
#[derive(Debug, Error)]
pub enum ContextError {
    /// No image collection is owned by the named unit.
    #[error("no image collection for sender '{0}'")]
    UnknownImage(String),

    /// The unit already owns an image collection.
    #[error("unit '{0}' already owns an image collection")]
    DuplicateImage(String),

    /// Image failure.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Port registration failure.
    #[error(transparent)]
    Port(#[from] PortError),
}
