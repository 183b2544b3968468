//! Critical section protected cell
//!
//! Zero-overhead wrapper for state that may only be touched inside a
//! critical section. Access requires a [`CriticalSection`] guard
//! reference, so the borrow cannot outlive the section.

use crate::critical::CriticalSection;
use core::cell::UnsafeCell;

/// A cell that can only be accessed within a critical section.
pub struct CsCell<T>(UnsafeCell<T>);

unsafe impl<T> Sync for CsCell<T> {}

impl<T> CsCell<T> {
    /// Create a new CsCell
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Get a mutable reference to the inner value
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub fn get<'cs>(&'cs self, _cs: &'cs CriticalSection) -> &'cs mut T {
        unsafe { &mut *self.0.get() }
    }
}
