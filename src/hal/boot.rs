//! Interrupt vector placement and the hand-off to the application

use avr_device::atmega128a::CPU;
use core::arch::asm;

const IVCE: u8 = 1 << 0;
const IVSEL: u8 = 1 << 1;

/// Moves the interrupt vectors to the boot section so the bootloader's own
/// handlers run.
pub fn use_boot_vectors() {
    avr_device::interrupt::free(|_| unsafe {
        let mcucr = &(*CPU::ptr()).mcucr;
        let bits = mcucr.read().bits();
        // IVSEL must be written within four cycles of IVCE
        mcucr.write(|w| w.bits(bits | IVCE));
        mcucr.write(|w| w.bits((bits & !IVCE) | IVSEL));
    });
}

/// Returns the vectors to the application section and jumps to its reset
/// vector. Interrupts stay disabled; the application enables what it needs.
pub fn start_application() -> ! {
    avr_device::interrupt::disable();
    unsafe {
        let mcucr = &(*CPU::ptr()).mcucr;
        let bits = mcucr.read().bits();
        mcucr.write(|w| w.bits(bits | IVCE));
        mcucr.write(|w| w.bits(bits & !(IVCE | IVSEL)));

        asm!("jmp 0", options(noreturn));
    }
}
