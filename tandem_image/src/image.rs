//! Tandem boxes, images and image collections.
//!
//! ```text
//!            sender unit                               receiver unit
//!  ┌──────────────────────────────┐          ┌──────────────────────────────┐
//!  │ SenderImage                  │          │ ReceiverImage                │
//!  │  inbox ──publish()──► outbox ├══════════┤ inbox ──commit()──► outbox   │
//!  │         (write lock)         │  same    │        (read lock)           │
//!  └──────────────────────────────┘  object  └──────────────────────────────┘
//! ```
//!
//! The sender writes into its inboxes at any time. `publish()` copies every
//! inbox to its outbox under the exchange write lock. A receiver's inboxes
//! are the sender's outboxes; `commit()` copies them into receiver-private
//! outboxes under the read lock. A receiver therefore always reads one
//! consistent publish, and never sees inbox writes made after that publish.

use crate::cell::ValueBox;
use crate::error::{ImageError, ImageResult};
use crate::generation::PublishGeneration;
use crate::lock::{ImageLock, LockPolicy};
use crate::value::{BoxId, Value};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// An `(inbox, outbox)` pair keyed by a box id.
#[derive(Debug, Clone)]
pub struct TandemBox {
    id: BoxId,
    inbox: ValueBox,
    outbox: ValueBox,
}

impl TandemBox {
    /// Sender-side pair; both boxes start at `initial`.
    pub fn new(id: impl Into<BoxId>, initial: impl Into<Value>) -> Self {
        let id = id.into();
        let initial = initial.into();
        Self {
            inbox: ValueBox::new(id.clone(), initial.clone()),
            outbox: ValueBox::new(id.clone(), initial),
            id,
        }
    }

    /// Sender-side pair built around an existing inbox (e.g. a port box).
    pub fn from_inbox(inbox: ValueBox) -> Self {
        Self {
            id: inbox.id().clone(),
            outbox: inbox.detached_copy(),
            inbox,
        }
    }

    /// Receiver-side mirror of `sender`: the inbox is the sender's outbox.
    pub fn mirror(sender: &TandemBox) -> Self {
        Self {
            id: sender.id.clone(),
            inbox: sender.outbox.clone(),
            outbox: sender.outbox.detached_copy(),
        }
    }

    /// Box id.
    pub fn id(&self) -> &BoxId {
        &self.id
    }

    /// Write side.
    pub fn inbox(&self) -> &ValueBox {
        &self.inbox
    }

    /// Read side.
    pub fn outbox(&self) -> &ValueBox {
        &self.outbox
    }

    /// Copy inbox to outbox; returns the change to announce afterwards.
    fn transfer(&self) -> ImageResult<Option<(ValueBox, Value)>> {
        let change = self.outbox.write_silent(self.inbox.read())?;
        Ok(change.map(|value| (self.outbox.clone(), value)))
    }
}

/// Ordered tandem boxes owned by the sending unit.
#[derive(Debug, Default)]
pub struct SenderImage {
    boxes: RwLock<Vec<TandemBox>>,
}

impl SenderImage {
    /// Number of tandem boxes.
    pub fn len(&self) -> usize {
        self.boxes.read().len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tandem box by id.
    pub fn get(&self, id: &BoxId) -> Option<TandemBox> {
        self.boxes.read().iter().find(|tb| tb.id() == id).cloned()
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> Vec<BoxId> {
        self.boxes.read().iter().map(|tb| tb.id().clone()).collect()
    }
}

/// One receiver's mirror of a sender image.
pub struct ReceiverImage {
    name: String,
    boxes: RwLock<Vec<TandemBox>>,
    committed: AtomicU64,
}

impl ReceiverImage {
    /// Receiving unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tandem box by id.
    pub fn get(&self, id: &BoxId) -> Option<TandemBox> {
        self.boxes.read().iter().find(|tb| tb.id() == id).cloned()
    }

    /// Number of tandem boxes.
    pub fn len(&self) -> usize {
        self.boxes.read().len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ReceiverImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverImage")
            .field("name", &self.name)
            .field("boxes", &self.len())
            .field("committed", &self.committed.load(Ordering::Relaxed))
            .finish()
    }
}

/// A sender's master image plus one receiver image per consuming unit.
#[derive(Debug)]
pub struct ImageCollection {
    sender: String,
    lock: ImageLock,
    generation: PublishGeneration,
    master: SenderImage,
    receivers: RwLock<Vec<Arc<ReceiverImage>>>,
}

impl ImageCollection {
    /// Empty collection owned by unit `sender`.
    pub fn new(sender: impl Into<String>, policy: LockPolicy) -> Arc<Self> {
        Arc::new(Self {
            sender: sender.into(),
            lock: ImageLock::new(policy),
            generation: PublishGeneration::new(),
            master: SenderImage::default(),
            receivers: RwLock::new(Vec::new()),
        })
    }

    /// Sending unit name.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Master image.
    pub fn sender_image(&self) -> &SenderImage {
        &self.master
    }

    /// Exchange lock policy.
    pub fn policy(&self) -> LockPolicy {
        self.lock.policy()
    }

    /// Number of completed publishes.
    pub fn generation(&self) -> u64 {
        self.generation.load()
    }

    /// Add a tandem box and return its inbox (the sender's write target).
    ///
    /// The new outbox is mirrored into every attached receiver.
    pub fn add(&self, id: impl Into<BoxId>, initial: impl Into<Value>) -> ImageResult<ValueBox> {
        self.insert(TandemBox::new(id, initial))
    }

    /// Add a tandem box whose inbox is an existing box.
    pub fn add_box(&self, inbox: ValueBox) -> ImageResult<ValueBox> {
        self.insert(TandemBox::from_inbox(inbox))
    }

    fn insert(&self, tandem: TandemBox) -> ImageResult<ValueBox> {
        let mut boxes = self.master.boxes.write();
        if boxes.iter().any(|tb| tb.id() == tandem.id()) {
            return Err(ImageError::DuplicateBox {
                image: self.sender.clone(),
                id: tandem.id().clone(),
            });
        }
        for receiver in self.receivers.read().iter() {
            receiver.boxes.write().push(TandemBox::mirror(&tandem));
        }
        debug!(image = %self.sender, box_id = %tandem.id(), "tandem box added");
        let inbox = tandem.inbox().clone();
        boxes.push(tandem);
        Ok(inbox)
    }

    /// Sender-side write target for `id`.
    pub fn inbox(&self, id: &BoxId) -> Option<ValueBox> {
        self.master.get(id).map(|tb| tb.inbox().clone())
    }

    /// Attach a consuming unit; existing tandem boxes are mirrored.
    pub fn attach_receiver(self: &Arc<Self>, receiver: &str) -> ImageResult<ReceiverHandle> {
        if receiver == self.sender {
            return Err(ImageError::SelfReceiver(self.sender.clone()));
        }
        let boxes = self.master.boxes.read();
        let mut receivers = self.receivers.write();
        if receivers.iter().any(|r| r.name == receiver) {
            return Err(ImageError::DuplicateReceiver {
                sender: self.sender.clone(),
                receiver: receiver.to_owned(),
            });
        }
        let image = Arc::new(ReceiverImage {
            name: receiver.to_owned(),
            boxes: RwLock::new(boxes.iter().map(TandemBox::mirror).collect()),
            committed: AtomicU64::new(0),
        });
        receivers.push(Arc::clone(&image));
        debug!(image = %self.sender, receiver, "receiver attached");
        Ok(ReceiverHandle {
            collection: Arc::clone(self),
            image,
        })
    }

    /// Handle for an already attached receiver.
    pub fn receiver(self: &Arc<Self>, receiver: &str) -> Option<ReceiverHandle> {
        let image = self
            .receivers
            .read()
            .iter()
            .find(|r| r.name == receiver)
            .cloned()?;
        Some(ReceiverHandle {
            collection: Arc::clone(self),
            image,
        })
    }

    /// Names of attached receivers.
    pub fn receiver_names(&self) -> Vec<String> {
        self.receivers.read().iter().map(|r| r.name.clone()).collect()
    }

    /// Copy every inbox to its outbox under the write lock.
    ///
    /// Outbox subscribers run after the lock is released and the generation
    /// advanced, so they may commit or publish on this collection.
    ///
    /// Returns the new publish generation.
    pub fn publish(&self) -> ImageResult<u64> {
        let (generation, changes) = {
            let boxes = self.master.boxes.read();
            let _exclusive = self.lock.write();
            let changes = transfer_all(&boxes)?;
            (self.generation.advance(), changes)
        };
        trace!(image = %self.sender, generation, changed = changes.len(), "image published");
        announce(changes)?;
        Ok(generation)
    }

    fn commit(&self, image: &ReceiverImage) -> ImageResult<u64> {
        let (generation, changes) = {
            let boxes = image.boxes.read();
            let _shared = self.lock.read();
            let changes = transfer_all(&boxes)?;
            let generation = self.generation.load();
            image.committed.store(generation, Ordering::Release);
            (generation, changes)
        };
        trace!(image = %self.sender, receiver = %image.name, generation, "image committed");
        announce(changes)?;
        Ok(generation)
    }
}

fn transfer_all(boxes: &[TandemBox]) -> ImageResult<Vec<(ValueBox, Value)>> {
    let mut changes = Vec::new();
    for tandem in boxes {
        changes.extend(tandem.transfer()?);
    }
    Ok(changes)
}

fn announce(changes: Vec<(ValueBox, Value)>) -> ImageResult<()> {
    for (outbox, value) in changes {
        outbox.notify(&value)?;
    }
    Ok(())
}

/// A receiving unit's access to one sender's image collection.
#[derive(Debug, Clone)]
pub struct ReceiverHandle {
    collection: Arc<ImageCollection>,
    image: Arc<ReceiverImage>,
}

impl ReceiverHandle {
    /// Sending unit name.
    pub fn sender(&self) -> &str {
        self.collection.sender()
    }

    /// Receiving unit name.
    pub fn name(&self) -> &str {
        self.image.name()
    }

    /// Receiver image.
    pub fn image(&self) -> &ReceiverImage {
        &self.image
    }

    /// Copy the last published snapshot into the receiver's outboxes.
    ///
    /// Returns the generation of the publish the snapshot came from.
    pub fn commit(&self) -> ImageResult<u64> {
        self.collection.commit(&self.image)
    }

    /// Generation observed by the last commit (0 before any publish).
    pub fn committed_generation(&self) -> u64 {
        self.image.committed.load(Ordering::Acquire)
    }

    /// Receiver-local box for `id`.
    pub fn outbox(&self, id: &BoxId) -> Option<ValueBox> {
        self.image.get(id).map(|tb| tb.outbox().clone())
    }

    /// Receiver-local value for `id`.
    pub fn read(&self, id: &BoxId) -> Option<Value> {
        self.outbox(id).map(|b| b.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_shares_outbox() {
        let sender = TandemBox::new("v", 1.0);
        let receiver = TandemBox::mirror(&sender);
        assert!(ValueBox::ptr_eq(sender.outbox(), receiver.inbox()));
        assert!(!ValueBox::ptr_eq(sender.outbox(), receiver.outbox()));
    }

    #[test]
    fn duplicate_box_rejected() {
        let images = ImageCollection::new("plc", LockPolicy::ReadPreferring);
        images.add("v", 1.0).unwrap();
        assert!(matches!(
            images.add("v", 2.0),
            Err(ImageError::DuplicateBox { .. })
        ));
    }

    #[test]
    fn receiver_rules() {
        let images = ImageCollection::new("plc", LockPolicy::ReadPreferring);
        assert!(matches!(
            images.attach_receiver("plc"),
            Err(ImageError::SelfReceiver(_))
        ));
        images.attach_receiver("hmi").unwrap();
        assert!(matches!(
            images.attach_receiver("hmi"),
            Err(ImageError::DuplicateReceiver { .. })
        ));
        assert!(images.receiver("hmi").is_some());
        assert!(images.receiver("other").is_none());
        assert_eq!(images.receiver_names(), vec!["hmi".to_string()]);
    }

    #[test]
    fn outbox_subscriber_may_commit_during_publish() {
        let images = ImageCollection::new("plc", LockPolicy::WritePreferring);
        let speed = images.add("speed", 0.0).unwrap();
        let rx = images.attach_receiver("hmi").unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let rx = rx.clone();
            let seen = Arc::clone(&seen);
            let id = BoxId::from("speed");
            images
                .sender_image()
                .get(&id)
                .unwrap()
                .outbox()
                .on_change(move |_| {
                    let generation = rx.commit().unwrap();
                    seen.lock().push((generation, rx.read(&id)));
                })
                .unwrap();
        }
        speed.write(2.5).unwrap();
        assert_eq!(images.publish().unwrap(), 1);
        assert_eq!(*seen.lock(), vec![(1, Some(Value::Float(2.5)))]);
    }

    #[test]
    fn publish_advances_generation() {
        let images = ImageCollection::new("plc", LockPolicy::WritePreferring);
        let rx = images.attach_receiver("hmi").unwrap();
        assert_eq!(rx.commit().unwrap(), 0);
        assert_eq!(images.publish().unwrap(), 1);
        assert_eq!(rx.commit().unwrap(), 1);
        assert_eq!(rx.committed_generation(), 1);
    }
}
