//! # Tandem Runtime
//!
//! In-process execution core for soft-realtime control units: cyclic
//! workers, a PLC, discrete SISO controllers and state machines, all
//! communicating through boxes and tandem images.
//!
//! ## Building Blocks
//!
//! | Module | Provides |
//! |--------|----------|
//! | [`cycle`] | [`Cycler`]: one OS thread running a payload at a fixed cadence, with cycle monitoring |
//! | [`plc`] | [`Plc`]: inputs → images → jobs → outputs → publish, governed by an operation mode |
//! | [`control`] | [`SisoController`]: reconfigurator → nodes → sentinel |
//! | [`state`] | [`StateMachine`]: named states with guarded exit points |
//! | [`io`] | ports binding boxes to device adapters |
//! | [`context`] | [`RuntimeContext`]: ports and images shared by all units |
//!
//! ## Setup vs. Runtime
//!
//! Everything is registered while building the [`RuntimeContext`]. Once
//! built it is immutable and shared as `Arc<RuntimeContext>`; cyclers are
//! spawned afterwards and only look things up.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tandem_image::LockPolicy;
//! use tandem_runtime::plc::{OperationMode, PlcBuilder};
//! use tandem_runtime::{CycleInfo, PayloadError, RuntimeContext};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut ctx = RuntimeContext::builder();
//! let images = ctx.image("plc", LockPolicy::default())?;
//! let counter = images.add("counter", 0i64)?;
//! let ctx = ctx.build();
//!
//! let mut plc = PlcBuilder::new("plc", Duration::from_millis(10));
//! plc.add_job("count", Duration::from_millis(100), move |_: &CycleInfo| -> Result<(), PayloadError> {
//!     counter.write(counter.get::<i64>()? + 1)?;
//!     Ok(())
//! })?;
//! let plc = plc.spawn(&ctx)?;
//! plc.set_mode(OperationMode::On)?;
//! plc.set_mode(OperationMode::Started)?;
//! plc.cycler().start(true)?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod control;
pub mod cycle;
pub mod error;
pub mod io;
pub mod plc;
pub mod state;

pub use config::RuntimeConfig;
pub use context::{RuntimeContext, RuntimeContextBuilder};
pub use control::SisoController;
pub use cycle::{CycleInfo, CyclePayload, CycleTopics, Cycler, CyclerOptions};
pub use error::{
    AdapterError, ContextError, ControlError, CyclerError, FsmError, PayloadError, PlcError,
    PortError,
};
pub use plc::{Plc, PlcBuilder};
pub use state::StateMachine;

static_assertions::assert_impl_all!(Cycler: Send, Sync);
static_assertions::assert_impl_all!(RuntimeContext: Send, Sync);
static_assertions::assert_impl_all!(SisoController: Send);
