//! # Kiln Concurrency
//!
//! The two primitives the core leans on for backpressure: a
//! [`Semaphore`] with cooperative cancellation and lifecycle events, and a
//! [`Queue`] that serializes jobs and can detect a job trying to enqueue
//! (and wait on) further work behind itself.

mod queue;
mod semaphore;

pub use queue::{Queue, QueueEvent};
pub use semaphore::{AcquireOptions, Semaphore, SemaphoreEvent, SemaphorePermit};
