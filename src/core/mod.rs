//! Core kernel modules
//!
//! Contains the kernel state, scheduler, task management, and time
//! management.

pub mod config;
pub mod critical;
pub mod cs_cell;
pub mod error;
pub mod kernel;
pub mod types;
pub mod task;
pub mod sched;
pub mod time;
