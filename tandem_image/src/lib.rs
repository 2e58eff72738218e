//! # Tandem Image
//!
//! Reactive value cells and consistent-snapshot exchange between control
//! units.
//!
//! ## Features
//!
//! - **Typed boxes**: [`ValueBox`] holds one [`Value`] whose kind is fixed at
//!   construction; mismatched writes fail.
//! - **Plugin chain**: monitor, clipper, guard, mapper and custom transforms
//!   run on every write before subscribers are notified.
//! - **Synchronous subscribers**: callbacks run on the writing thread in
//!   registration order, with a re-entrancy guard.
//! - **Tandem images**: a sender's `publish()` and each receiver's `commit()`
//!   exchange all values of an image atomically.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐  publish()   ┌─────────────────┐  commit()   ┌─────────────────┐
//! │ sender inboxes  ├─────────────►│ sender outboxes │────────────►│ receiver        │
//! │ (unit writes)   │  write lock  │ = receiver      │  read lock  │ outboxes        │
//! └─────────────────┘              │   inboxes       │             │ (unit reads)    │
//!                                  └─────────────────┘             └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use tandem_image::{BoxId, ImageCollection, LockPolicy, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let images = ImageCollection::new("plc", LockPolicy::ReadPreferring);
//! let speed = images.add("speed", 1.0)?;
//! let hmi = images.attach_receiver("hmi")?;
//!
//! speed.write(42.0)?;
//! images.publish()?;
//! hmi.commit()?;
//! assert_eq!(hmi.read(&BoxId::from("speed")), Some(Value::Float(42.0)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - **ValueBox**: `Send + Sync`; writes are serialized per box.
//! - **ImageCollection**: shared through `Arc`; one sender, many receivers.
//!   Receivers never take the write lock and the sender never takes the
//!   read lock.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod error;
pub mod generation;
pub mod image;
pub mod lock;
pub mod plugin;
pub mod value;

pub use cell::ValueBox;
pub use error::{BoxError, BoxResult, ImageError, ImageResult};
pub use generation::PublishGeneration;
pub use image::{ImageCollection, ReceiverHandle, ReceiverImage, SenderImage, TandemBox};
pub use lock::{ImageLock, LockPolicy};
pub use plugin::{Clipper, CustomFn, Guard, Mapper, Monitor, Plugin, RangeEvent};
pub use value::{BoxId, FromValue, Value, ValueKind};

static_assertions::assert_impl_all!(ValueBox: Send, Sync, Clone);
static_assertions::assert_impl_all!(Value: Send, Sync);
static_assertions::assert_impl_all!(ImageCollection: Send, Sync);
static_assertions::assert_impl_all!(ReceiverHandle: Send, Sync);
