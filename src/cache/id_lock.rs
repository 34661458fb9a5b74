//! Per-id exclusive lock
//!
//! Serializes work keyed by the same id (e.g. loading one block) without
//! serializing work on different ids.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};

/// Set of currently held ids plus a wakeup signal
#[derive(Debug, Default)]
pub struct IdLock {
    held: Mutex<HashSet<u64>>,
    released: Condvar,
}

impl IdLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `id` is free, then hold it until the guard drops
    pub fn lock(&self, id: u64) -> IdLockGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(&id) {
            self.released.wait(&mut held);
        }
        held.insert(id);
        IdLockGuard { lock: self, id }
    }

    /// Number of ids currently held
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

/// Releases its id on drop
#[derive(Debug)]
pub struct IdLockGuard<'a> {
    lock: &'a IdLock,
    id: u64,
}

impl Drop for IdLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.lock.held.lock();
        held.remove(&self.id);
        self.lock.released.notify_all();
    }
}
