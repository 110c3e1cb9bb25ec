// src/core/concurrent/atomic.rs

//! Lock-free boolean and integer cells used for session flags and counters.
//!
//! `get_and_set` is written as an explicit compare-and-set retry loop: read the
//! current value, try to swap it for the new one, and retry if another thread
//! got there first. The loop is lock-free; it only guarantees eventual success
//! under contention.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

/// A boolean value that may be updated atomically.
#[derive(Default)]
pub struct AtomicBoolean {
    value: AtomicU8,
}

impl AtomicBoolean {
    pub const fn new(initial: bool) -> Self {
        Self {
            value: AtomicU8::new(initial as u8),
        }
    }

    pub fn get(&self) -> bool {
        self.value.load(Ordering::SeqCst) != 0
    }

    pub fn set(&self, new_value: bool) {
        self.value.store(new_value as u8, Ordering::SeqCst);
    }

    /// Sets the value to `update` iff the current value equals `expect`.
    /// Returns whether the swap took place.
    pub fn compare_and_set(&self, expect: bool, update: bool) -> bool {
        self.value
            .compare_exchange(
                expect as u8,
                update as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Atomically sets `new_value` and returns the previous value.
    pub fn get_and_set(&self, new_value: bool) -> bool {
        loop {
            let current = self.get();
            if self.compare_and_set(current, new_value) {
                return current;
            }
        }
    }
}

impl fmt::Debug for AtomicBoolean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicBoolean").field(&self.get()).finish()
    }
}

impl fmt::Display for AtomicBoolean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// An `i32` that may be updated atomically.
#[derive(Default)]
pub struct AtomicInteger {
    value: AtomicI32,
}

impl AtomicInteger {
    pub const fn new(initial: i32) -> Self {
        Self {
            value: AtomicI32::new(initial),
        }
    }

    pub fn get(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn set(&self, new_value: i32) {
        self.value.store(new_value, Ordering::SeqCst);
    }

    pub fn compare_and_set(&self, expect: i32, update: i32) -> bool {
        self.value
            .compare_exchange(expect, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Atomically sets `new_value` and returns the previous value.
    pub fn get_and_set(&self, new_value: i32) -> i32 {
        loop {
            let current = self.get();
            if self.compare_and_set(current, new_value) {
                return current;
            }
        }
    }

    /// Adds `delta` (wrapping) and returns the previous value.
    pub fn get_and_add(&self, delta: i32) -> i32 {
        self.value.fetch_add(delta, Ordering::SeqCst)
    }

    /// Adds `delta` (wrapping) and returns the updated value.
    pub fn add_and_get(&self, delta: i32) -> i32 {
        self.get_and_add(delta).wrapping_add(delta)
    }

    pub fn get_and_increment(&self) -> i32 {
        self.get_and_add(1)
    }

    pub fn increment_and_get(&self) -> i32 {
        self.add_and_get(1)
    }

    pub fn get_and_decrement(&self) -> i32 {
        self.get_and_add(-1)
    }

    pub fn decrement_and_get(&self) -> i32 {
        self.add_and_get(-1)
    }
}

impl fmt::Debug for AtomicInteger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicInteger").field(&self.get()).finish()
    }
}

impl fmt::Display for AtomicInteger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}
