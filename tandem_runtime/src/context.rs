//! Runtime context: the one place to look up shared infrastructure.
//!
//! Assembled during setup by [`RuntimeContextBuilder`], then frozen and
//! handed to every PLC and controller as `Arc<RuntimeContext>`. After
//! `build()` nothing is registered any more, so lookups need no locks.

use crate::config::RuntimeConfig;
use crate::error::ContextError;
use crate::io::{InputPort, IoSystem, IoSystemBuilder, OutputPort};
use std::collections::BTreeMap;
use std::sync::Arc;
use tandem_image::{ImageCollection, LockPolicy, ReceiverHandle};
use tracing::{debug, info};

/// Frozen registry of ports and images.
#[derive(Debug, Default)]
pub struct RuntimeContext {
    io: IoSystem,
    images: BTreeMap<String, Arc<ImageCollection>>,
    receivers: BTreeMap<String, Vec<ReceiverHandle>>,
}

impl RuntimeContext {
    /// Start assembling a context.
    pub fn builder() -> RuntimeContextBuilder {
        RuntimeContextBuilder::default()
    }

    /// Port registry.
    pub fn io(&self) -> &IoSystem {
        &self.io
    }

    /// Image collection owned by `sender`.
    pub fn image(&self, sender: &str) -> Option<&Arc<ImageCollection>> {
        self.images.get(sender)
    }

    /// Images `unit` receives, in subscription order.
    pub fn receivers_of(&self, unit: &str) -> &[ReceiverHandle] {
        self.receivers.get(unit).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Receiver handle of `unit` on `sender`'s image.
    pub fn receiver(&self, unit: &str, sender: &str) -> Option<&ReceiverHandle> {
        self.receivers_of(unit).iter().find(|r| r.sender() == sender)
    }

    /// Units owning an image collection.
    pub fn senders(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }
}

/// Mutable setup phase of a [`RuntimeContext`].
#[derive(Debug, Default)]
pub struct RuntimeContextBuilder {
    io: IoSystemBuilder,
    images: BTreeMap<String, Arc<ImageCollection>>,
    receivers: BTreeMap<String, Vec<ReceiverHandle>>,
}

impl RuntimeContextBuilder {
    /// Create one image collection per configured unit.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ContextError> {
        let mut builder = Self::default();
        for unit in &config.units {
            builder.image(&unit.name, unit.lock_policy)?;
        }
        Ok(builder)
    }

    /// Create the image collection owned by `sender`.
    pub fn image(
        &mut self,
        sender: &str,
        policy: LockPolicy,
    ) -> Result<Arc<ImageCollection>, ContextError> {
        if self.images.contains_key(sender) {
            return Err(ContextError::DuplicateImage(sender.to_owned()));
        }
        let collection = ImageCollection::new(sender, policy);
        self.images
            .insert(sender.to_owned(), Arc::clone(&collection));
        debug!(sender, ?policy, "image collection created");
        Ok(collection)
    }

    /// Image collection created earlier for `sender`.
    pub fn image_of(&self, sender: &str) -> Option<&Arc<ImageCollection>> {
        self.images.get(sender)
    }

    /// Let `receiver` commit `sender`'s image every cycle.
    pub fn subscribe_image(
        &mut self,
        sender: &str,
        receiver: &str,
    ) -> Result<ReceiverHandle, ContextError> {
        let collection = self
            .images
            .get(sender)
            .ok_or_else(|| ContextError::UnknownImage(sender.to_owned()))?;
        let handle = collection.attach_receiver(receiver)?;
        self.receivers
            .entry(receiver.to_owned())
            .or_default()
            .push(handle.clone());
        Ok(handle)
    }

    /// Register an input port.
    pub fn input(&mut self, port: InputPort) -> Result<&mut Self, ContextError> {
        self.io.input(port)?;
        Ok(self)
    }

    /// Register an output port.
    pub fn output(&mut self, port: OutputPort) -> Result<&mut Self, ContextError> {
        self.io.output(port)?;
        Ok(self)
    }

    /// Freeze the context.
    pub fn build(self) -> Arc<RuntimeContext> {
        info!(
            images = self.images.len(),
            receiving_units = self.receivers.len(),
            "runtime context built"
        );
        Arc::new(RuntimeContext {
            io: self.io.build(),
            images: self.images,
            receivers: self.receivers,
        })
    }
}
