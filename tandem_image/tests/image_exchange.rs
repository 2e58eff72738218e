//! Tandem image exchange between a sender and its receivers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tandem_image::{BoxId, ImageCollection, ImageResult, LockPolicy, Value, ValueBox};

#[test]
fn test_two_unit_exchange() -> ImageResult<()> {
    let images = ImageCollection::new("sender", LockPolicy::ReadPreferring);
    let v = images.add("v", 1.0)?;
    let rx = images.attach_receiver("receiver")?;
    let id = BoxId::from("v");

    rx.commit()?;
    assert_eq!(rx.read(&id), Some(Value::Float(1.0)));

    v.write(42.0)?;
    images.publish()?;
    assert_eq!(rx.read(&id), Some(Value::Float(1.0)));
    rx.commit()?;
    assert_eq!(rx.read(&id), Some(Value::Float(42.0)));
    Ok(())
}

#[test]
fn test_unpublished_write_is_invisible() -> ImageResult<()> {
    let images = ImageCollection::new("sender", LockPolicy::ReadPreferring);
    let v = images.add("v", 0.0)?;
    let rx = images.attach_receiver("receiver")?;
    let id = BoxId::from("v");

    v.write(5.0)?;
    rx.commit()?;
    assert_eq!(rx.read(&id), Some(Value::Float(0.0)));
    Ok(())
}

#[test]
fn test_late_box_propagates_to_receivers() -> ImageResult<()> {
    let images = ImageCollection::new("sender", LockPolicy::ReadPreferring);
    let early = images.attach_receiver("early")?;
    images.add("a", 1i64)?;
    let late = images.attach_receiver("late")?;
    let b = images.add("b", 2i64)?;

    let id_b = BoxId::from("b");
    let sender_outbox = images.sender_image().get(&id_b).map(|tb| tb.outbox().clone());
    for rx in [&early, &late] {
        assert_eq!(rx.image().len(), 2);
        let inbox = rx.image().get(&id_b).map(|tb| tb.inbox().clone());
        assert!(ValueBox::ptr_eq(
            sender_outbox.as_ref().unwrap(),
            inbox.as_ref().unwrap()
        ));
    }

    b.write(7i64)?;
    images.publish()?;
    late.commit()?;
    early.commit()?;
    assert_eq!(late.read(&id_b), Some(Value::Int(7)));
    assert_eq!(early.read(&id_b), Some(Value::Int(7)));
    Ok(())
}

/// Every committed snapshot must come from a single publish: the sender
/// writes the same counter to all boxes before each publish.
fn snapshot_atomicity(policy: LockPolicy) {
    const BOXES: usize = 32;
    let images = ImageCollection::new("sender", policy);
    let inboxes: Vec<ValueBox> = (0..BOXES)
        .map(|i| images.add(format!("v{i}"), 0i64).unwrap())
        .collect();
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|r| {
            let rx = images.attach_receiver(&format!("rx{r}")).unwrap();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let ids: Vec<BoxId> = (0..BOXES).map(|i| BoxId::from(format!("v{i}"))).collect();
                let mut commits = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let generation = rx.commit().unwrap();
                    let values: Vec<i64> = ids
                        .iter()
                        .map(|id| rx.outbox(id).unwrap().get::<i64>().unwrap())
                        .collect();
                    assert!(values.iter().all(|v| *v == values[0]), "torn snapshot {values:?}");
                    assert_eq!(values[0] as u64, generation);
                    commits += 1;
                }
                commits
            })
        })
        .collect();

    for round in 1..=500i64 {
        for inbox in &inboxes {
            inbox.write(round).unwrap();
        }
        assert_eq!(images.publish().unwrap(), round as u64);
    }
    stop.store(true, Ordering::Relaxed);
    for r in readers {
        assert!(r.join().unwrap() > 0);
    }
}

#[test]
fn test_snapshot_atomicity_read_preferring() {
    snapshot_atomicity(LockPolicy::ReadPreferring);
}

#[test]
fn test_snapshot_atomicity_write_preferring() {
    snapshot_atomicity(LockPolicy::WritePreferring);
}
