//! PLC operation modes.
//!
//! ```text
//!   off ──► on ──► started ◄──► stopped
//!    ▲                                │
//!    └────────── any ─────────────────┘
//! ```
//!
//! The mode lives in an enum box named `operationmode`. A validating plugin
//! on that box rejects illegal edges, so every writer (local code, image
//! exchange, remote process) goes through the same table.

use crate::cycle::CycleTopics;
use std::fmt;
use std::sync::Arc;
use tandem_common::fault::{Fault, FaultKind};
use tandem_image::{BoxResult, Plugin, Value, ValueBox};
use tracing::{info, warn};

/// Box id of the operation mode.
pub const OPERATION_MODE_BOX: &str = "operationmode";

/// PLC lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OperationMode {
    /// Nothing runs; ports are not touched.
    Off = 0,
    /// Ports and images are serviced; jobs do not run.
    On = 1,
    /// Jobs run.
    Started = 2,
    /// Jobs are suspended; ports and images are serviced.
    Stopped = 3,
}

impl OperationMode {
    /// Decode the enum discriminant stored in the box.
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Off),
            1 => Some(Self::On),
            2 => Some(Self::Started),
            3 => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }

    /// Ports and images are serviced in this mode.
    pub const fn services_io(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Jobs run in this mode.
    pub const fn runs_jobs(self) -> bool {
        matches!(self, Self::Started)
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OperationMode> for Value {
    fn from(mode: OperationMode) -> Self {
        Value::Enum(mode as u32)
    }
}

/// Result of an operation mode transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition allowed; new mode.
    Ok(OperationMode),
    /// Transition rejected; reason.
    Rejected(&'static str),
}

/// Evaluate the edge `from → to`.
pub fn transition(from: OperationMode, to: OperationMode) -> TransitionResult {
    use OperationMode::*;

    match (from, to) {
        // any → Off
        (_, Off) => TransitionResult::Ok(Off),
        (current, next) if current == next => TransitionResult::Ok(next),
        (Off, On) => TransitionResult::Ok(On),
        (On, Started) | (Stopped, Started) => TransitionResult::Ok(Started),
        (Started, Stopped) => TransitionResult::Ok(Stopped),
        _ => TransitionResult::Rejected(rejection_reason(from, to)),
    }
}

fn rejection_reason(from: OperationMode, to: OperationMode) -> &'static str {
    use OperationMode::*;

    match (from, to) {
        (Off, _) => "PLC is off; switch it on first",
        (On, Stopped) => "PLC was never started",
        (_, On) => "PLC is already on; switch it off first",
        _ => "transition not allowed",
    }
}

/// Create the operation mode box (initially off) with its validating plugin.
///
/// Rejected writes fail with `BoxError::Plugin` and publish an
/// `InvalidOpModeTransition` fault on `topics.on_error`.
pub fn operation_mode_box(plc: &str, topics: Arc<CycleTopics>) -> BoxResult<ValueBox> {
    let mode = ValueBox::with_meta(
        OPERATION_MODE_BOX,
        OperationMode::Off,
        "operation mode",
        "",
    );
    let plc = plc.to_owned();
    let mut current = OperationMode::Off;
    mode.attach(Plugin::custom("opmode_transition", move |value: Value| {
        let requested = match value {
            Value::Enum(raw) => OperationMode::from_u32(raw)
                .ok_or_else(|| format!("unknown operation mode {raw}"))?,
            other => return Err(format!("operation mode must be an enum, got {other}")),
        };
        match transition(current, requested) {
            TransitionResult::Ok(next) => {
                if next != current {
                    info!(plc = %plc, from = %current, to = %next, "operation mode changed");
                }
                current = next;
                Ok(value)
            }
            TransitionResult::Rejected(reason) => {
                warn!(plc = %plc, from = %current, to = %requested, reason, "invalid operation mode transition");
                let message = format!("{current} -> {requested}: {reason}");
                topics.on_error.publish_or_log(&Fault::new(
                    FaultKind::InvalidOpModeTransition,
                    plc.as_str(),
                    &message,
                ));
                Err(message)
            }
        }
    }))?;
    Ok(mode)
}

/// Current mode stored in `mode`; unreadable values count as off.
pub fn read_mode(mode: &ValueBox) -> OperationMode {
    mode.get::<u32>()
        .ok()
        .and_then(OperationMode::from_u32)
        .unwrap_or(OperationMode::Off)
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationMode::*;

    #[test]
    fn legal_edges() {
        assert_eq!(transition(Off, On), TransitionResult::Ok(On));
        assert_eq!(transition(On, Started), TransitionResult::Ok(Started));
        assert_eq!(transition(Started, Stopped), TransitionResult::Ok(Stopped));
        assert_eq!(transition(Stopped, Started), TransitionResult::Ok(Started));
        for m in [Off, On, Started, Stopped] {
            assert_eq!(transition(m, Off), TransitionResult::Ok(Off));
        }
        assert_eq!(transition(On, On), TransitionResult::Ok(On));
    }

    #[test]
    fn illegal_edges() {
        assert!(matches!(transition(Off, Started), TransitionResult::Rejected(_)));
        assert!(matches!(transition(On, Stopped), TransitionResult::Rejected(_)));
        assert!(matches!(transition(Started, On), TransitionResult::Rejected(_)));
    }

    #[test]
    fn box_rejects_and_reports() {
        let topics = CycleTopics::new("plc");
        let faults = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let faults = Arc::clone(&faults);
            topics
                .on_error
                .subscribe(Arc::new(move |f: &Fault| faults.lock().push(f.kind)))
                .unwrap();
        }
        let mode = operation_mode_box("plc", Arc::clone(&topics)).unwrap();
        assert!(mode.write(Started).is_err());
        assert_eq!(read_mode(&mode), Off);
        mode.write(On).unwrap();
        mode.write(Started).unwrap();
        assert_eq!(read_mode(&mode), Started);
        assert_eq!(*faults.lock(), vec![FaultKind::InvalidOpModeTransition]);
    }
}
