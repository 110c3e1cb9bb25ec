// src/core/concurrent/blocking_queue.rs

//! An unbounded FIFO queue whose consumers can block until an item arrives or
//! an exit condition becomes true.
//!
//! The exit condition is always evaluated while the queue lock is held. A
//! thread that flips the condition and then calls [`BlockingQueue::wake_all`]
//! therefore cannot race past a waiter: either the waiter sees the new state
//! before it sleeps, or it is already parked and gets the notification.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Appends an item and wakes one waiting consumer.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        items.push_back(item);
        self.not_empty.notify_one();
    }

    /// Appends an item unless `reject` returns true. `reject` runs under the
    /// queue lock, so it pairs with the exit condition of
    /// [`take_or_exit`](Self::take_or_exit). A rejected item is handed back.
    pub fn push_unless(
        &self,
        item: T,
        reject: impl FnOnce(&VecDeque<T>) -> bool,
    ) -> Result<(), T> {
        let mut items = self.items.lock();
        if reject(&items) {
            return Err(item);
        }
        items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the head of the queue without blocking.
    pub fn try_take(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Blocks until an item is available or `exit` returns true.
    ///
    /// `exit` is checked before every dequeue attempt, so a true exit condition
    /// wins over queued items. Callers that want to drain first can inspect the
    /// queue passed to the closure.
    pub fn take_or_exit(&self, exit: impl Fn(&VecDeque<T>) -> bool) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if exit(&items) {
                return None;
            }
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            self.not_empty.wait(&mut items);
        }
    }

    /// Like [`take_or_exit`](Self::take_or_exit) but gives up after `timeout`.
    pub fn take_timeout(
        &self,
        timeout: Duration,
        exit: impl Fn(&VecDeque<T>) -> bool,
    ) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if exit(&items) {
                return None;
            }
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if self.not_empty.wait_until(&mut items, deadline).timed_out() {
                if exit(&items) {
                    return None;
                }
                return items.pop_front();
            }
        }
    }

    /// Wakes every waiting consumer so it re-evaluates its exit condition.
    pub fn wake_all(&self) {
        let _items = self.items.lock();
        self.not_empty.notify_all();
    }

    /// Removes and returns every queued item.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
