//! The sliver of RISC-V-specific machinery the core needs: reading/writing the supervisor
//! interrupt-enable bit and reading this hart's id. Everything else architecture-specific (trap
//! vectors, the MMU, the trampoline) is out of scope and lives in the stand-in modules instead.

/// number of bits to offset within a page
pub const PGSHIFT: usize = 12;
/// number of bytes per page
pub const PGSIZE: usize = 1 << PGSHIFT;

pub mod registers {
    /// Supervisor Status register, sstatus
    pub mod sstatus {
        /// Supervisor Interrupt Enable
        pub const SIE: usize = 1 << 1;

        #[cfg(not(test))]
        #[inline]
        pub unsafe fn read() -> usize {
            unsafe {
                let bits: usize;
                core::arch::asm!("csrr {}, sstatus", out(reg) bits);
                bits
            }
        }

        #[cfg(not(test))]
        #[inline]
        pub unsafe fn write(bits: usize) {
            unsafe { core::arch::asm!("csrw sstatus, {}", in(reg) bits) };
        }
    }

    /// Thread pointer, used to hold this hart's id in the real kernel (`tp` is reserved for it by
    /// convention in `start.rs`). Under `cfg(test)` each OS thread is assigned a stable id the
    /// first time it asks, so that the process table's per-CPU slots map onto real host threads.
    pub mod tp {
        #[cfg(not(test))]
        pub unsafe fn read() -> usize {
            let id: usize;
            unsafe { core::arch::asm!("mv {}, tp", out(reg) id) };
            id
        }

        // Under test, the scheduler OS thread and every "process" OS thread it dispatches all
        // represent turns taken on the same single simulated hart — `swtch` just hands control
        // from one parked thread to another, never runs two at once (see
        // `crate::swtch::test_support`). They must therefore agree on which `Cpu` slot they are,
        // or the interrupt-disable nesting counter handed off across a context switch would land
        // on the wrong `Cpu`. Always reporting hart 0 keeps that single-hart model.
        #[cfg(test)]
        pub unsafe fn read() -> usize {
            0
        }
    }
}

#[cfg(not(test))]
pub mod interrupts {
    use super::registers::sstatus;

    #[inline]
    pub fn enable() {
        unsafe { sstatus::write(sstatus::read() | sstatus::SIE) };
    }

    #[inline]
    pub fn disable() {
        unsafe { sstatus::write(sstatus::read() & !sstatus::SIE) };
    }

    #[inline]
    pub fn get() -> bool {
        unsafe { (sstatus::read() & sstatus::SIE) != 0 }
    }
}
