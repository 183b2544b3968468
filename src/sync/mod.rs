//! Synchronization primitives
//!
//! Contains semaphores (counting, binary, mutex) and fixed-size message
//! queues.

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "queue")]
pub mod queue;
