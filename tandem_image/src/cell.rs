//! Reactive value cell.
//!
//! [`ValueBox`] is a cheaply cloneable handle; clones refer to the same
//! cell. Tandem images rely on this identity: a receiver's inbox *is* the
//! sender's outbox.
//!
//! ## Write path
//!
//! ```text
//! write(v) ─► kind check ─► plugin chain (left→right) ─► store ─► notify
//!                              │ edge events                       │
//!                              ▼                                   ▼
//!                          plugin channels                   box subscribers
//! ```
//!
//! Writes from different threads are serialized. Subscribers run on the
//! writing thread, in registration order, after the value is stored.
//! Without plugins every write notifies; with plugins only writes where at
//! least one plugin produced a changed output notify.

use crate::error::{BoxError, BoxResult};
use crate::plugin::Plugin;
use crate::value::{BoxId, FromValue, Value, ValueKind};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use tandem_common::pubsub::{Callback, PublishError, Publisher, SubscriptionId};
use tracing::trace;

struct Stage {
    plugin: Plugin,
    last: Option<Value>,
}

struct Inner {
    id: BoxId,
    label: String,
    dimension: String,
    kind: ValueKind,
    value: RwLock<Value>,
    writer: ReentrantMutex<Cell<bool>>,
    plugins: Mutex<Vec<Stage>>,
    subscribers: Publisher<Value>,
}

/// Shared handle to a typed, observable value cell.
#[derive(Clone)]
pub struct ValueBox {
    inner: Arc<Inner>,
}

/// Clears the in-write flag even if a callback panics.
struct WriteFlag<'a>(&'a Cell<bool>);

impl Drop for WriteFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl ValueBox {
    /// Create a box; its kind is fixed to the kind of `initial`.
    pub fn new(id: impl Into<BoxId>, initial: impl Into<Value>) -> Self {
        Self::with_meta(id, initial, "", "")
    }

    /// Create a box with a display label and physical dimension.
    pub fn with_meta(
        id: impl Into<BoxId>,
        initial: impl Into<Value>,
        label: impl Into<String>,
        dimension: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let initial = initial.into();
        Self {
            inner: Arc::new(Inner {
                subscribers: Publisher::new(id.to_string()),
                kind: initial.kind(),
                value: RwLock::new(initial),
                writer: ReentrantMutex::new(Cell::new(false)),
                plugins: Mutex::new(Vec::new()),
                label: label.into(),
                dimension: dimension.into(),
                id,
            }),
        }
    }

    /// Fresh box with the same id, metadata and current value, but no
    /// plugins or subscribers.
    pub fn detached_copy(&self) -> Self {
        Self::with_meta(
            self.inner.id.clone(),
            self.read(),
            self.inner.label.clone(),
            self.inner.dimension.clone(),
        )
    }

    /// Identifier.
    pub fn id(&self) -> &BoxId {
        &self.inner.id
    }

    /// Display label.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Physical dimension, e.g. `"m/s"`.
    pub fn dimension(&self) -> &str {
        &self.inner.dimension
    }

    /// Declared value kind.
    pub fn kind(&self) -> ValueKind {
        self.inner.kind
    }

    /// True if both handles refer to the same cell.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Current value.
    pub fn read(&self) -> Value {
        self.inner.value.read().clone()
    }

    /// Current value as `T`.
    ///
    /// # Errors
    /// `TypeMismatch` if the box kind does not convert to `T`.
    pub fn get<T: FromValue>(&self) -> BoxResult<T> {
        let value = self.inner.value.read();
        T::from_value(&value).ok_or_else(|| BoxError::TypeMismatch {
            id: self.inner.id.clone(),
            expected: T::KIND,
            found: value.kind(),
        })
    }

    /// Run the plugin chain, store the result, notify subscribers.
    ///
    /// Integers written to a float box are widened to float.
    ///
    /// # Errors
    /// - `TypeMismatch`: value kind differs from the box kind.
    /// - `Reentrant`: called from a callback of this box's own write.
    /// - `Plugin`: a plugin failed; nothing was stored or notified.
    pub fn write(&self, value: impl Into<Value>) -> BoxResult<()> {
        let value = self.coerce(value.into())?;
        self.exclusive(|| match self.store(value)? {
            Some(stored) => self.publish_change(&stored),
            None => Ok(()),
        })
    }

    /// Like [`write`](Self::write), but leave notification to the caller.
    ///
    /// Returns the value subscribers must be told about, if any. Image
    /// exchange stores under its lock and notifies after releasing it.
    pub(crate) fn write_silent(&self, value: Value) -> BoxResult<Option<Value>> {
        let value = self.coerce(value)?;
        self.exclusive(|| self.store(value))
    }

    /// Deliver a change returned by [`write_silent`](Self::write_silent).
    pub(crate) fn notify(&self, value: &Value) -> BoxResult<()> {
        self.exclusive(|| self.publish_change(value))
    }

    /// Copy `source`'s current value into this box through [`write`](Self::write).
    pub fn copy_from(&self, source: &ValueBox) -> BoxResult<()> {
        self.write(source.read())
    }

    /// Append a plugin to the chain.
    ///
    /// # Errors
    /// `NotNumeric` for a numeric plugin on a non-numeric box.
    pub fn attach(&self, plugin: Plugin) -> BoxResult<()> {
        if plugin.requires_numeric() && !self.inner.kind.is_numeric() {
            return Err(BoxError::NotNumeric {
                id: self.inner.id.clone(),
                plugin: match plugin {
                    Plugin::Clipper(_) => "clipper",
                    Plugin::Guard(_) => "guard",
                    _ => "mapper",
                },
                kind: self.inner.kind,
            });
        }
        self.inner.plugins.lock().push(Stage { plugin, last: None });
        Ok(())
    }

    /// Number of plugins in the chain.
    pub fn plugin_count(&self) -> usize {
        self.inner.plugins.lock().len()
    }

    /// Register a write subscriber.
    ///
    /// # Errors
    /// `DuplicateSubscriber` if this exact callback is already registered.
    pub fn subscribe(&self, callback: Callback<Value>) -> BoxResult<SubscriptionId> {
        self.inner
            .subscribers
            .subscribe(callback)
            .map_err(|_| BoxError::DuplicateSubscriber {
                id: self.inner.id.clone(),
            })
    }

    /// Closure convenience for [`subscribe`](Self::subscribe).
    pub fn on_change<F>(&self, f: F) -> BoxResult<SubscriptionId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(f))
    }

    /// Remove a write subscriber.
    ///
    /// # Errors
    /// `UnknownSubscriber` if `subscription` is not registered.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> BoxResult<()> {
        self.inner
            .subscribers
            .unsubscribe(subscription)
            .map_err(|_| BoxError::UnknownSubscriber {
                id: self.inner.id.clone(),
                subscription,
            })
    }

    /// Number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Run `f` as this box's single writer.
    fn exclusive<R>(&self, f: impl FnOnce() -> BoxResult<R>) -> BoxResult<R> {
        let writer = self.inner.writer.lock();
        if writer.get() {
            return Err(BoxError::Reentrant {
                id: self.inner.id.clone(),
            });
        }
        writer.set(true);
        let _flag = WriteFlag(&writer);
        f()
    }

    fn store(&self, value: Value) -> BoxResult<Option<Value>> {
        let (stored, notify) = self.run_plugins(value)?;
        *self.inner.value.write() = stored.clone();
        trace!(box_id = %self.inner.id, value = %stored, notify, "box write");
        Ok(notify.then_some(stored))
    }

    fn publish_change(&self, value: &Value) -> BoxResult<()> {
        self.inner.subscribers.publish(value).map_err(|e| match e {
            PublishError::Reentrant { .. } => BoxError::Reentrant {
                id: self.inner.id.clone(),
            },
            other => BoxError::Plugin {
                id: self.inner.id.clone(),
                plugin: "subscribers".into(),
                message: other.to_string(),
            },
        })
    }

    fn coerce(&self, value: Value) -> BoxResult<Value> {
        match (self.inner.kind, value) {
            (ValueKind::Float, Value::Int(n)) => Ok(Value::Float(n as f64)),
            (kind, value) if value.kind() == kind => Ok(value),
            (kind, value) => Err(BoxError::TypeMismatch {
                id: self.inner.id.clone(),
                expected: kind,
                found: value.kind(),
            }),
        }
    }

    fn run_plugins(&self, value: Value) -> BoxResult<(Value, bool)> {
        let mut stages = self.inner.plugins.lock();
        if stages.is_empty() {
            return Ok((value, true));
        }
        // Nothing is committed until the whole chain and the final kind
        // check succeeded.
        let mut current = value;
        let mut steps = Vec::with_capacity(stages.len());
        for stage in stages.iter_mut() {
            let output = stage
                .plugin
                .process(current.clone())
                .map_err(|message| BoxError::Plugin {
                    id: self.inner.id.clone(),
                    plugin: stage.plugin.name().to_owned(),
                    message,
                })?;
            steps.push((current, output.clone()));
            current = output;
        }
        let current = self.coerce(current)?;

        let mut changed = false;
        for (stage, (input, output)) in stages.iter_mut().zip(steps) {
            stage.plugin.commit(&input, &output);
            if stage.last.as_ref() != Some(&output) {
                changed = true;
                stage.last = Some(output);
            }
        }
        Ok((current, changed))
    }
}

impl fmt::Debug for ValueBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueBox")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("value", &*self.inner.value.read())
            .finish()
    }
}
