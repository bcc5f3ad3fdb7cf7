//! Boot entry point. Real hart bring-up (clearing `.bss`, setting up the initial stack, parking
//! secondary harts until released) is architecture boilerplate out of scope for this core; on the
//! real target it lives in `start.rs`/`entry.S`, neither of which this crate implements. This
//! binary exists so the crate has a runnable target at all.
#![no_std]
#![no_main]

#[unsafe(no_mangle)]
pub unsafe extern "C" fn kmain() -> ! {
    unsafe { kernel::main() }
}
