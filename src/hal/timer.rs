//! Timer0 as the 1 ms system tick

use crate::config::{CPU_FREQ_HZ, TICK_HZ};
use avr_device::atmega128a::TC0;
use core::ptr::{read_volatile, write_volatile};

#[derive(Clone, Copy)]
#[repr(u8)]
pub enum Prescaler {
    Stop = 0,
    Direct = 1,
    Div8 = 2,
    Div32 = 3,
    Div64 = 4,
    Div128 = 5,
    Div256 = 6,
    Div1024 = 7,
}

impl Prescaler {
    const fn divisor(self) -> u32 {
        match self {
            Prescaler::Stop => 0,
            Prescaler::Direct => 1,
            Prescaler::Div8 => 8,
            Prescaler::Div32 => 32,
            Prescaler::Div64 => 64,
            Prescaler::Div128 => 128,
            Prescaler::Div256 => 256,
            Prescaler::Div1024 => 1024,
        }
    }
}

const WGM01: u8 = 1 << 3;
const OCIE0: u8 = 1 << 1;

// TIMSK is shared by Timers 0-2; addressed directly in data space
const TIMSK: *mut u8 = 0x57 as *mut u8;

unsafe fn update_timsk(f: impl FnOnce(u8) -> u8) {
    write_volatile(TIMSK, f(read_volatile(TIMSK)));
}

const TICK_PRESCALER: Prescaler = Prescaler::Div64;
// 16MHz / 64 = 250kHz, 250 counts per tick
const TICK_COMPARE: u8 = (CPU_FREQ_HZ / TICK_PRESCALER.divisor() / TICK_HZ - 1) as u8;

/// Starts Timer0 in CTC mode with the compare interrupt firing once per
/// millisecond. The `TIMER0_COMP` handler advances `os::SYSTEM_TICKS`.
pub fn start_system_tick() {
    unsafe {
        let p = TC0::ptr();
        (*p).tccr0.write(|w| w.bits(0));
        (*p).tcnt0.write(|w| w.bits(0));
        (*p).ocr0.write(|w| w.bits(TICK_COMPARE));
        update_timsk(|bits| bits | OCIE0);
        (*p).tccr0.write(|w| w.bits(WGM01 | TICK_PRESCALER as u8));
    }
}

pub fn stop_system_tick() {
    unsafe {
        let p = TC0::ptr();
        (*p).tccr0.write(|w| w.bits(0));
        update_timsk(|bits| bits & !OCIE0);
    }
}
