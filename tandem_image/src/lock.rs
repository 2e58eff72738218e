//! Exchange lock for image collections.
//!
//! A readers/writer lock whose fairness policy is chosen at construction.
//! The sender takes the write side for `publish()`, receivers take the read
//! side for `commit()`. Neither side ever takes the other's lock, so the
//! exchange cannot deadlock.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// Fairness policy of an [`ImageLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// New readers block only while a writer holds the lock.
    #[default]
    ReadPreferring,
    /// New readers also block while a writer is waiting.
    WritePreferring,
}

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

/// Readers/writer lock with a selectable policy.
#[derive(Debug)]
pub struct ImageLock {
    policy: LockPolicy,
    state: Mutex<LockState>,
    changed: Condvar,
}

impl ImageLock {
    /// Create an unlocked lock.
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(LockState::default()),
            changed: Condvar::new(),
        }
    }

    /// Configured policy.
    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Acquire shared access.
    pub fn read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock();
        while state.writer
            || (self.policy == LockPolicy::WritePreferring && state.waiting_writers > 0)
        {
            self.changed.wait(&mut state);
        }
        state.readers += 1;
        ReadGuard { lock: self }
    }

    /// Acquire exclusive access.
    pub fn write(&self) -> WriteGuard<'_> {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            self.changed.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = true;
        WriteGuard { lock: self }
    }

    /// Number of active readers (diagnostics).
    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }
}

/// Shared access; released on drop.
#[must_use]
pub struct ReadGuard<'a> {
    lock: &'a ImageLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            self.lock.changed.notify_all();
        }
    }
}

/// Exclusive access; released on drop.
#[must_use]
pub struct WriteGuard<'a> {
    lock: &'a ImageLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.lock().writer = false;
        self.lock.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_share() {
        let lock = ImageLock::new(LockPolicy::ReadPreferring);
        let _a = lock.read();
        let _b = lock.read();
        assert_eq!(lock.readers(), 2);
    }

    #[test]
    fn writer_waits_for_readers() {
        let lock = Arc::new(ImageLock::new(LockPolicy::ReadPreferring));
        let done = Arc::new(AtomicBool::new(false));
        let guard = lock.read();
        let handle = {
            let lock = Arc::clone(&lock);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let _w = lock.write();
                done.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn write_preferring_blocks_new_readers() {
        let lock = Arc::new(ImageLock::new(LockPolicy::WritePreferring));
        let first = lock.read();
        let writer = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let _w = lock.write();
                thread::sleep(Duration::from_millis(20));
            })
        };
        // Give the writer time to queue.
        thread::sleep(Duration::from_millis(50));
        let reader_in = Arc::new(AtomicBool::new(false));
        let reader = {
            let lock = Arc::clone(&lock);
            let reader_in = Arc::clone(&reader_in);
            thread::spawn(move || {
                let _r = lock.read();
                reader_in.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!reader_in.load(Ordering::SeqCst));
        drop(first);
        writer.join().unwrap();
        reader.join().unwrap();
        assert!(reader_in.load(Ordering::SeqCst));
    }
}
