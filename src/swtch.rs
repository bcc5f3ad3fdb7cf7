//! The lowest-level primitive in the scheduler: handing the CPU from one saved register context to
//! another. This is explicitly out of scope for this core (it is pure assembly on the real
//! target — save callee-saved registers and the stack pointer, restore the other set, `ret`). Only
//! its contract matters here: `swtch(old, new)` saves the running context into `*old`, restores
//! `*new`, and does not return to its caller until some other thread of control calls
//! `swtch(new, old)` again.
//!
//! On the real target that contract is implemented by `switch.S`, assembled in by `global_asm!`
//! exactly as the teacher's `asm/mod.rs` pulls in its own `switch.S`/`trampoline.S`/`kernelvec.S`.
//! Under `cfg(test)` there is no stack to swap (tests run on the host, not bare metal), so the
//! same contract is met with OS-thread parking instead: the caller's OS thread *is* the context,
//! and "switching to" a context means unparking the thread that owns it and parking this one.

use crate::proc::Context;

#[cfg(not(test))]
unsafe extern "C" {
    /// Saves the current callee-saved registers and stack pointer into `old`, then loads them from
    /// `new` and returns into whatever called `swtch` to produce `new` in the first place.
    pub fn swtch(old: *mut Context, new: *const Context);
}

#[cfg(test)]
pub use test_support::swtch;

#[cfg(test)]
pub(crate) mod test_support {
    use super::Context;
    use std::collections::HashMap;
    use std::sync::{Condvar, Mutex, OnceLock};
    use std::thread::{self, ThreadId};

    /// One parking pad per logical context address, keyed by the address of the `Context` struct
    /// embedded in its owning `Proc`/`Cpu`. `running` names which context currently "owns" the CPU;
    /// a thread parks until it sees its own address there.
    struct Pad {
        running: Mutex<usize>,
        cv: Condvar,
    }

    fn registry() -> &'static Mutex<HashMap<usize, &'static Pad>> {
        static REGISTRY: OnceLock<Mutex<HashMap<usize, &'static Pad>>> = OnceLock::new();
        REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
    }

    fn pad_for(addr: usize) -> &'static Pad {
        let mut reg = registry().lock().unwrap();
        reg.entry(addr)
            .or_insert_with(|| {
                Box::leak(Box::new(Pad {
                    running: Mutex::new(0),
                    cv: Condvar::new(),
                }))
            })
    }

    thread_local! {
        static THREAD_ID: ThreadId = thread::current().id();
    }

    /// Parks the calling OS thread until `addr` is marked runnable, then clears the mark.
    ///
    /// Exposed to `proc::test_support` so a freshly "forked" process's OS thread can block here
    /// the first time, waiting for the scheduler to dispatch it for the first time — mirroring
    /// what would otherwise be the very first `swtch` into a brand new context.
    pub(crate) fn park_until_runnable(addr: usize) {
        let pad = pad_for(addr);
        let mut running = pad.running.lock().unwrap();
        while *running != addr {
            running = pad.cv.wait(running).unwrap();
        }
        *running = 0;
    }

    /// Marks `addr` runnable and wakes whoever is parked waiting for it.
    fn make_runnable(addr: usize) {
        let pad = pad_for(addr);
        let mut running = pad.running.lock().unwrap();
        *running = addr;
        pad.cv.notify_all();
    }

    /// Test-mode stand-in for `swtch`: hands control to `new`'s owner and then blocks until someone
    /// hands control back to `old`'s owner.
    ///
    /// # Safety
    /// `old` and `new` must be the addresses of `Context`s embedded in live `Proc`/`Cpu` structures
    /// for the lifetime of the park.
    pub unsafe fn swtch(old: *mut Context, new: *const Context) {
        let old_addr = old as usize;
        let new_addr = new as usize;

        make_runnable(new_addr);
        park_until_runnable(old_addr);
    }
}
