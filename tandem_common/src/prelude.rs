//! Prelude module for common re-exports.
//!
//! ```rust
//! use tandem_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;
pub use crate::logging::init_tracing;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig, Validate};
pub use crate::setup::{SetupError, SetupFile, SyncOutcome};

// ─── Channels & faults ──────────────────────────────────────────────
pub use crate::fault::{Fault, FaultKind};
pub use crate::pubsub::{Callback, PublishError, Publisher, SubscriptionId};

// ─── Defaults ───────────────────────────────────────────────────────
pub use crate::consts::{CYCLE_TOLERANCE, DEFAULT_CYCLE_TIME, MONITOR_WINDOW};
