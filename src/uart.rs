//! The single byte-at-a-time UART write primitive `printf.rs` needs. Real UART register
//! addresses, FIFOs and receive interrupts are out of scope; this core only ever needs to push
//! bytes out for diagnostic printing.

const UART_BASE: usize = 0x1000_0000;
const THR: usize = 0;
const LSR: usize = 5;
const LSR_TX_IDLE: u8 = 1 << 5;

/// # Safety
/// Must only be called on the real target, where `UART_BASE` is mapped.
pub unsafe fn putc(byte: u8) {
    unsafe {
        while core::ptr::read_volatile((UART_BASE + LSR) as *const u8) & LSR_TX_IDLE == 0 {}
        core::ptr::write_volatile((UART_BASE + THR) as *mut u8, byte);
    }
}
