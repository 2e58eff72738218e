//! Tandem Common Library
//!
//! Shared building blocks for all tandem workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - TOML configuration loading traits and types
//! - [`setup`] - Persistent application setup file (path-addressed tree)
//! - [`logging`] - `tracing` subscriber initialization
//! - [`pubsub`] - Synchronous typed publisher channels
//! - [`fault`] - Runtime fault taxonomy reported on error channels
//! - [`consts`] - Runtime-wide defaults
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use tandem_common::prelude::*;
//!
//! let channel: Publisher<u32> = Publisher::new("counter");
//! let _id = channel.subscribe(std::sync::Arc::new(|v: &u32| assert_eq!(*v, 7))).unwrap();
//! channel.publish(&7).unwrap();
//! ```

pub mod config;
pub mod consts;
pub mod fault;
pub mod logging;
pub mod prelude;
pub mod pubsub;
pub mod setup;
