// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::UnsafeCell;

/// Holds the Machine, shared between the main loop and the step interrupts.
/// The main loop locks it with interrupts masked. Interrupt handlers already
/// run with the lower priorities masked, and go straight in.
pub struct SharedWithInterrupt<T>(UnsafeCell<T>);
impl<T> SharedWithInterrupt<T> {
    pub const fn new(v: T) -> Self {
        Self(UnsafeCell::new(v))
    }

    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|_| {
            let mut_self = unsafe { &mut *self.0.get() };
            f(mut_self)
        })
    }

    /// # Safety
    /// Only callable from the highest priority handler touching `T`.
    pub unsafe fn lock_from_interrupt<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut_self = &mut *self.0.get();
        f(mut_self)
    }
}

unsafe impl<T: Send> Sync for SharedWithInterrupt<T> {}
unsafe impl<T: Send> Send for SharedWithInterrupt<T> {}
