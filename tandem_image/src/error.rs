//! Error types for box and image operations

use crate::value::{BoxId, ValueKind};
use tandem_common::fault::FaultKind;
use tandem_common::pubsub::SubscriptionId;
use thiserror::Error;

/// Errors raised by [`ValueBox`](crate::ValueBox) operations.
///
/// All variants are programming errors: the call fails and the box state is
/// unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoxError {
    /// Written value has a different kind than the box was created with
    #[error("box {id}: type mismatch (expected {expected}, found {found})")]
    TypeMismatch {
        /// Box id
        id: BoxId,
        /// Declared kind
        expected: ValueKind,
        /// Offending kind
        found: ValueKind,
    },

    /// A subscriber or plugin callback wrote to the box being written
    #[error("box {id}: re-entrant write from a callback")]
    Reentrant {
        /// Box id
        id: BoxId,
    },

    /// Callback is already subscribed
    #[error("box {id}: callback already subscribed")]
    DuplicateSubscriber {
        /// Box id
        id: BoxId,
    },

    /// Unsubscribe of an id that is not subscribed
    #[error("box {id}: unknown subscription {subscription}")]
    UnknownSubscriber {
        /// Box id
        id: BoxId,
        /// Offending subscription
        subscription: SubscriptionId,
    },

    /// Numeric plugin attached to a non-numeric box
    #[error("box {id}: plugin '{plugin}' needs a numeric box, box is {kind}")]
    NotNumeric {
        /// Box id
        id: BoxId,
        /// Plugin kind
        plugin: &'static str,
        /// Box kind
        kind: ValueKind,
    },

    /// Plugin constructed with inconsistent parameters
    #[error("invalid plugin parameters: {0}")]
    InvalidPlugin(String),

    /// A plugin failed while processing a write; the write was aborted
    #[error("box {id}: plugin '{plugin}' failed: {message}")]
    Plugin {
        /// Box id
        id: BoxId,
        /// Plugin name
        plugin: String,
        /// Failure detail
        message: String,
    },
}

impl BoxError {
    /// Fault classification.
    pub fn fault_kind(&self) -> FaultKind {
        FaultKind::ProgrammingError
    }
}

/// Errors raised by image collections.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    /// Tandem box id already present in the image
    #[error("image '{image}': duplicate box {id}")]
    DuplicateBox {
        /// Sender name
        image: String,
        /// Box id
        id: BoxId,
    },

    /// Receiver already attached
    #[error("image '{sender}': receiver '{receiver}' already attached")]
    DuplicateReceiver {
        /// Sender name
        sender: String,
        /// Receiver name
        receiver: String,
    },

    /// A unit cannot receive its own image
    #[error("image '{0}': sender cannot receive its own image")]
    SelfReceiver(String),

    /// Box operation failed during publish or commit
    #[error(transparent)]
    Box(#[from] BoxError),
}

/// Result type for box operations
pub type BoxResult<T> = Result<T, BoxError>;

/// Result type for image operations
pub type ImageResult<T> = Result<T, ImageError>;
