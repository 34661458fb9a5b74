//! MVCC Module
//!
//! Multi-version read consistency via write sequence numbers.
//!
//! ## Model
//! - Two monotonic counters: the next write number to issue and the read
//!   point (highest write number below which every write has completed)
//! - Writers reserve a number before inserting and complete it afterwards
//! - A scan captures the read point once and skips cells stamped above it
//!
//! Writes may complete out of order; the read point only advances over a
//! contiguous prefix of completed writes, so a reader never sees a write
//! whose predecessor is still in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

/// Handle for one in-flight write
#[derive(Debug, PartialEq, Eq)]
pub struct WriteEntry {
    write_number: u64,
}

impl WriteEntry {
    /// Sequence number to stamp on the write's cells
    pub fn write_number(&self) -> u64 {
        self.write_number
    }
}

#[derive(Debug)]
struct Pending {
    write_number: u64,
    completed: bool,
}

/// Issues write numbers and tracks the read point
#[derive(Debug)]
pub struct MvccController {
    /// Writes in issue order; the front is the oldest still pending
    queue: Mutex<VecDeque<Pending>>,
    next_write: AtomicU64,
    read_point: AtomicU64,
    advanced: Condvar,
}

impl MvccController {
    /// Start with every write up to `initial` already visible
    pub fn new(initial: u64) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            next_write: AtomicU64::new(initial + 1),
            read_point: AtomicU64::new(initial),
            advanced: Condvar::new(),
        }
    }

    /// Reserve the next write number
    pub fn begin_write(&self) -> WriteEntry {
        let mut queue = self.queue.lock();
        // Issue under the queue lock so the queue stays in number order
        let write_number = self.next_write.fetch_add(1, Ordering::SeqCst);
        queue.push_back(Pending {
            write_number,
            completed: false,
        });
        WriteEntry { write_number }
    }

    /// Mark a write complete and advance the read point as far as possible
    ///
    /// Returns `true` if this call moved the read point past `entry`.
    pub fn complete(&self, entry: WriteEntry) -> bool {
        let mut queue = self.queue.lock();
        if let Some(pending) = queue
            .iter_mut()
            .find(|p| p.write_number == entry.write_number)
        {
            pending.completed = true;
        }

        let mut highest = None;
        while queue.front().is_some_and(|p| p.completed) {
            highest = queue.pop_front().map(|p| p.write_number);
        }

        if let Some(highest) = highest {
            self.read_point.store(highest, Ordering::SeqCst);
            self.advanced.notify_all();
        }
        self.read_point.load(Ordering::SeqCst) >= entry.write_number
    }

    /// Complete a write and block until it is visible to new readers
    pub fn complete_and_wait(&self, entry: WriteEntry) {
        let write_number = entry.write_number;
        if self.complete(entry) {
            return;
        }
        let mut queue = self.queue.lock();
        while self.read_point.load(Ordering::SeqCst) < write_number {
            self.advanced.wait(&mut queue);
        }
    }

    /// Highest write number whose predecessors have all completed
    pub fn read_point(&self) -> u64 {
        self.read_point.load(Ordering::SeqCst)
    }

    /// Writes reserved but not yet visible
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Move both counters past `seq` (used after log replay)
    pub fn advance_to(&self, seq: u64) {
        let _queue = self.queue.lock();
        if self.next_write.load(Ordering::SeqCst) <= seq {
            self.next_write.store(seq + 1, Ordering::SeqCst);
        }
        if self.read_point.load(Ordering::SeqCst) < seq {
            self.read_point.store(seq, Ordering::SeqCst);
        }
    }
}

impl Default for MvccController {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_point_waits_for_oldest_write() {
        let mvcc = MvccController::default();
        let first = mvcc.begin_write();
        let second = mvcc.begin_write();
        assert_eq!(first.write_number(), 1);
        assert_eq!(second.write_number(), 2);

        // Completing out of order does not expose the second write
        assert!(!mvcc.complete(second));
        assert_eq!(mvcc.read_point(), 0);

        assert!(mvcc.complete(first));
        assert_eq!(mvcc.read_point(), 2);
        assert_eq!(mvcc.pending_count(), 0);
    }

    #[test]
    fn test_complete_and_wait_from_other_thread() {
        let mvcc = std::sync::Arc::new(MvccController::default());
        let first = mvcc.begin_write();
        let second = mvcc.begin_write();

        let waiter = {
            let mvcc = mvcc.clone();
            std::thread::spawn(move || mvcc.complete_and_wait(second))
        };
        mvcc.complete(first);
        waiter.join().unwrap();
        assert_eq!(mvcc.read_point(), 2);
    }

    #[test]
    fn test_advance_to() {
        let mvcc = MvccController::new(5);
        mvcc.advance_to(10);
        assert_eq!(mvcc.read_point(), 10);
        assert_eq!(mvcc.begin_write().write_number(), 11);
    }
}
