//! Synchronous typed publisher channels.
//!
//! A [`Publisher`] owns an ordered subscriber list and invokes every
//! subscriber on the publishing thread before `publish` returns.
//!
//! ## Rules
//! - Subscribers run in registration order.
//! - The subscriber list is copy-on-write: subscribing or unsubscribing from
//!   inside a callback is allowed and takes effect on the next publish.
//! - Publishing on a channel from one of its own subscribers is rejected
//!   with [`PublishError::Reentrant`] instead of recursing.
//! - Concurrent publishes from different threads are serialized.

use parking_lot::{ReentrantMutex, RwLock};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Subscriber callback.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`Publisher::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Publisher channel errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The same callback is already subscribed.
    #[error("channel '{channel}': callback already subscribed")]
    DuplicateSubscriber {
        /// Channel name.
        channel: String,
    },

    /// Unsubscribe with an id this channel never issued (or already removed).
    #[error("channel '{channel}': unknown subscription {id}")]
    UnknownSubscriber {
        /// Channel name.
        channel: String,
        /// Offending id.
        id: SubscriptionId,
    },

    /// A subscriber published on the channel that is dispatching to it.
    #[error("channel '{channel}': re-entrant publish from a subscriber")]
    Reentrant {
        /// Channel name.
        channel: String,
    },
}

type Entry<E> = (SubscriptionId, Callback<E>);

/// Named, typed, synchronous event channel.
pub struct Publisher<E> {
    name: String,
    next_id: AtomicU64,
    subscribers: RwLock<Arc<Vec<Entry<E>>>>,
    dispatch: ReentrantMutex<Cell<bool>>,
}

/// Clears the dispatching flag even if a subscriber panics.
struct DispatchFlag<'a>(&'a Cell<bool>);

impl Drop for DispatchFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<E> Publisher<E> {
    /// Create an empty channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Arc::new(Vec::new())),
            dispatch: ReentrantMutex::new(Cell::new(false)),
        }
    }

    /// Channel name (used in errors and logs).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// True when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a subscriber.
    ///
    /// # Errors
    /// `DuplicateSubscriber` if this exact callback (same `Arc`) is subscribed.
    pub fn subscribe(&self, callback: Callback<E>) -> Result<SubscriptionId, PublishError> {
        let mut list = self.subscribers.write();
        if list.iter().any(|(_, cb)| same_callback(cb, &callback)) {
            return Err(PublishError::DuplicateSubscriber {
                channel: self.name.clone(),
            });
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut next = Vec::with_capacity(list.len() + 1);
        next.extend(list.iter().cloned());
        next.push((id, callback));
        *list = Arc::new(next);
        Ok(id)
    }

    /// Remove a subscriber.
    ///
    /// # Errors
    /// `UnknownSubscriber` if `id` is not currently subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), PublishError> {
        let mut list = self.subscribers.write();
        if !list.iter().any(|(sid, _)| *sid == id) {
            return Err(PublishError::UnknownSubscriber {
                channel: self.name.clone(),
                id,
            });
        }
        let next: Vec<Entry<E>> = list.iter().filter(|(sid, _)| *sid != id).cloned().collect();
        *list = Arc::new(next);
        Ok(())
    }

    /// Invoke every subscriber with `event`, in registration order.
    ///
    /// # Errors
    /// `Reentrant` when called from inside one of this channel's subscribers.
    pub fn publish(&self, event: &E) -> Result<(), PublishError> {
        let guard = self.dispatch.lock();
        if guard.get() {
            return Err(PublishError::Reentrant {
                channel: self.name.clone(),
            });
        }
        guard.set(true);
        let _flag = DispatchFlag(&guard);

        let snapshot = Arc::clone(&self.subscribers.read());
        for (_, callback) in snapshot.iter() {
            callback(event);
        }
        Ok(())
    }

    /// Publish and log a re-entrancy error instead of returning it.
    ///
    /// Used by worker loops whose notifications have no caller to report to.
    pub fn publish_or_log(&self, event: &E) {
        if let Err(e) = self.publish(event) {
            tracing::error!(channel = %self.name, "{e}");
        }
    }
}

impl<E> fmt::Debug for Publisher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.name)
            .field("subscribers", &self.len())
            .finish()
    }
}

fn same_callback<E>(a: &Callback<E>, b: &Callback<E>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
