// src/core/concurrent/mod.rs

//! Concurrency building blocks shared by sessions and connections: atomic
//! cells, a blocking FIFO queue, and fixed-size thread pools.

pub mod atomic;
pub mod blocking_queue;
pub mod executors;

pub use atomic::{AtomicBoolean, AtomicInteger};
pub use blocking_queue::BlockingQueue;
pub use executors::{
    DefaultThreadFactory, ExecutorService, Task, ThreadFactory, ThreadPoolExecutor,
};
