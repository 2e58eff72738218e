//! # Tandem Process
//!
//! Cycling workers in their own address space.
//!
//! A worker process runs the cycle of an in-process cycler, but all
//! communication with the application goes through typed [`Message`]s on
//! two one-slot channels (app → worker, worker → app).
//!
//! | Module | Role |
//! |--------|------|
//! | [`message`] | wire messages (`command` + `payload` JSON) |
//! | [`transport`] | in-memory and JSON-lines transports |
//! | [`worker`] | worker-side cycle loop and payload trait |
//! | [`process`] | app-side handle: spawn, message, shutdown |
//! | [`priority`] | priority classes mapped to nice levels |
//!
//! ## Example
//!
//! ```no_run
//! use std::process::Command;
//! use std::time::Duration;
//! use tandem_process::{CyclingProcess, ProcessOptions, UserMessage};
//!
//! let mut cmd = Command::new("tandem_echo_worker");
//! cmd.args(["--cycle-time-ms", "10"]);
//! let mut worker = CyclingProcess::spawn("echo", cmd, ProcessOptions::default())?;
//! worker.message(UserMessage::new("ping", &1)?)?;
//! let _reply = worker.recv_timeout(Duration::from_secs(1))?;
//! worker.shutdown(true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod message;
pub mod priority;
pub mod process;
pub mod transport;
pub mod worker;

pub use error::{ProcessError, ProcessResult};
pub use message::{BoxEntry, Message, UserMessage};
pub use priority::Priority;
pub use process::{CyclingProcess, ProcessOptions};
pub use transport::{ChannelTransport, LineTransport, Transport};
pub use worker::{Outbox, ProcessPayload, ProcessWorker};

static_assertions::assert_impl_all!(CyclingProcess: Send);
static_assertions::assert_impl_all!(Message: Send, Sync);
