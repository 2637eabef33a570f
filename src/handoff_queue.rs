// SPDX-License-Identifier: GPL-3.0-only

//! Thread-safe FIFO used to hand payloads between threads
//!
//! Producers on real-time threads (GPU completion, audio capture) call
//! [`HandoffQueue::enqueue`] and never block on a consumer; the encoder's
//! pull callbacks call [`HandoffQueue::dequeue`] and get `None` when there
//! is nothing to write. There is no capacity limit and no backpressure
//! signal to the producer.
//!
//! Every operation runs inside a single short critical section. The lock is
//! private, so no caller can hold it across another call, and the queue can
//! only be dropped once every borrow (and thus every guard) has ended.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// The queue and session state stay structurally valid across a panic in
/// an unrelated caller, so poisoning is not treated as fatal.
pub fn lock_recovering<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutex-protected FIFO
#[derive(Debug)]
pub struct HandoffQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an item at the tail
    pub fn enqueue(&self, item: T) {
        lock_recovering(&self.items).push_back(item);
    }

    /// Remove the head item, or `None` if the queue is empty
    pub fn dequeue(&self) -> Option<T> {
        lock_recovering(&self.items).pop_front()
    }

    /// Empty the queue in one critical section, returning how many items were discarded
    ///
    /// Items are dropped after the lock is released so their destructors
    /// (e.g. returning pixel buffers to a pool) never run under the queue lock.
    pub fn drain(&self) -> usize {
        let discarded = std::mem::take(&mut *lock_recovering(&self.items));
        let count = discarded.len();
        drop(discarded);
        count
    }

    pub fn len(&self) -> usize {
        lock_recovering(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_recovering(&self.items).is_empty()
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = HandoffQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = HandoffQueue::new();
        for i in 0..5 {
            queue.enqueue(i);
        }

        assert_eq!(queue.drain(), 5);
        assert!(queue.is_empty());
        assert_eq!(queue.drain(), 0);
    }

    #[test]
    fn test_dequeue_empty_does_not_block() {
        let queue: HandoffQueue<String> = HandoffQueue::default();
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.len(), 0);
    }
}
