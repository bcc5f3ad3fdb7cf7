//! The mutual-exclusion primitive the whole kernel is built on.
//!
//! `SpinLock<T>` disables interrupts on the current CPU for as long as it (or any nested lock) is
//! held, and counts the nesting depth in `Cpu::num_off` so that releasing an inner lock does not
//! re-enable interrupts out from under an outer one. This is the `push_off`/`pop_off` dance
//! described in the spec: acquiring any spinlock increments the nesting counter, releasing
//! decrements it, and interrupts are only actually re-enabled once the count reaches zero (and
//! only if they were enabled before the first `acquire`).

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::proc::{Cpu, CpuTable, InterruptLock};

/// A spinlock guarding `T`. Acquiring it disables interrupts on the current CPU; releasing it
/// (dropping the guard) re-enables them once every nested lock has been released.
#[derive(Debug)]
pub struct SpinLock<T> {
    name: &'static str,
    cpu: AtomicPtr<Cpu>,
    data: UnsafeCell<T>,
}

// Safety: `UnsafeCell` is not `Sync`, but `SpinLock` only ever exposes its contents through a
// guard that enforces exclusive access, so `SpinLock<T>` is safe to share as long as `T: Send`.
unsafe impl<T> Sync for SpinLock<T> where T: Send {}

pub struct SpinLockGuard<'a, T: 'a> {
    lock: &'a SpinLock<T>,
    _intr_lock: InterruptLock,
}

unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<T> SpinLock<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        Self {
            name,
            cpu: AtomicPtr::new(ptr::null_mut()),
            data: UnsafeCell::new(value),
        }
    }

    /// # Safety
    /// Must be called with interrupts disabled (i.e. while already holding some lock on this CPU).
    unsafe fn holding(&self) -> bool {
        self.cpu.load(Ordering::Relaxed) == unsafe { CpuTable::current() }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let _intr_lock = CpuTable::lock_current();

        unsafe {
            assert!(!self.holding(), "acquire {}: already held", self.name);

            loop {
                if self
                    .cpu
                    .compare_exchange(
                        ptr::null_mut(),
                        CpuTable::current(),
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break SpinLockGuard { lock: self, _intr_lock };
                }

                hint::spin_loop();
            }
        }
    }

    /// Releases `guard`'s hold on this lock early and returns a reference to the lock so that it
    /// can be re-acquired later. Used by `sleep()`, which must drop the caller's condition lock
    /// before blocking and reacquire the very same lock on wakeup, even when that lock happens to
    /// be the process's own slot lock.
    pub fn unlock(guard: SpinLockGuard<'_, T>) -> &'_ SpinLock<T> {
        let lock = guard.lock;
        drop(guard);
        lock
    }

    /// Releases the lock without a guard, for the one legitimate case where a guard was inherited
    /// across a context switch and must be dropped from a different calling context (`fork_ret`).
    ///
    /// # Safety
    /// The caller must actually be holding this lock.
    pub unsafe fn force_unlock(&self) {
        unsafe {
            assert!(self.holding(), "force_unlock {}: not held", self.name);
            self.cpu.store(ptr::null_mut(), Ordering::Release);
            CpuTable::unlock_current();
        }
    }

    /// Bypasses the lock entirely. Used only by the debug dumper, which must never block or
    /// deadlock while the system may be in an inconsistent state.
    ///
    /// # Safety
    /// The caller must not race a real writer; this is for best-effort debug output only.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        unsafe {
            assert!(self.lock.holding(), "release {}: not held", self.lock.name);
        }
        self.lock.cpu.store(ptr::null_mut(), Ordering::Release);
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}
