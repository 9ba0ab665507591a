//! Interrupt-safe spin lock
//!
//! Bank map registers are updated from both thread context (driver probe
//! enabling a line) and interrupt context. A plain spin lock taken in thread
//! context could be re-entered by an interrupt on the same CPU and spin
//! forever, so the lock masks local interrupts while held.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

#[cfg(all(feature = "runtime", target_arch = "aarch64", target_os = "none"))]
mod arch {
    use core::arch::asm;

    /// Read DAIF and mask IRQs
    #[inline(always)]
    pub fn local_irq_save() -> u64 {
        let flags: u64;
        unsafe {
            asm!("mrs {}, daif", out(reg) flags, options(nomem, nostack, preserves_flags));
            asm!("msr daifset, #2", options(nomem, nostack, preserves_flags));
        }
        flags
    }

    /// Restore the DAIF value returned by `local_irq_save`
    #[inline(always)]
    pub fn local_irq_restore(flags: u64) {
        unsafe {
            asm!("msr daif, {}", in(reg) flags, options(nomem, nostack, preserves_flags));
        }
    }
}

#[cfg(not(all(feature = "runtime", target_arch = "aarch64", target_os = "none")))]
mod arch {
    // Hosted targets have no local interrupts to mask

    #[inline(always)]
    pub fn local_irq_save() -> u64 {
        0
    }

    #[inline(always)]
    pub fn local_irq_restore(_flags: u64) {}
}

/// Spin lock that keeps local interrupts masked while held
pub struct IrqSafeLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSafeLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Mask local interrupts, then acquire the lock
    pub fn lock(&self) -> IrqSafeLockGuard<'_, T> {
        let flags = arch::local_irq_save();
        IrqSafeLockGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            flags,
        }
    }

    /// Acquire the lock if it is free
    pub fn try_lock(&self) -> Option<IrqSafeLockGuard<'_, T>> {
        let flags = arch::local_irq_save();
        match self.inner.try_lock() {
            Some(guard) => Some(IrqSafeLockGuard {
                guard: ManuallyDrop::new(guard),
                flags,
            }),
            None => {
                arch::local_irq_restore(flags);
                None
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Guard returned by [`IrqSafeLock::lock`]
///
/// Releases the lock before restoring the saved interrupt state.
pub struct IrqSafeLockGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    flags: u64,
}

impl<T> Deref for IrqSafeLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSafeLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqSafeLockGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the guard is dropped exactly once, here
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        arch::local_irq_restore(self.flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_guards_value() {
        let lock = IrqSafeLock::new(0u32);
        {
            let mut map = lock.lock();
            *map |= 1 << 4;
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 0x10);
    }

    #[test]
    fn test_try_lock_while_held() {
        let lock = IrqSafeLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_into_inner() {
        let lock = IrqSafeLock::new(7u8);
        *lock.lock() += 1;
        assert_eq!(lock.into_inner(), 8);
    }
}
