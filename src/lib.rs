//! Serial firmware-update bootloader for the ATmega128
//!
//! The protocol core (framing, state machine, flash bookkeeping) is portable
//! and host-tested; `hal` adds the register-level drivers when built for AVR.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

pub mod bootloader;
pub mod config;
pub mod drivers;
pub mod hal;
pub mod logger;
pub mod os;
pub mod protocol;
pub mod ring_buffer;

pub use bootloader::{AbortReason, Bootloader, Outcome, Step};
pub use config::BootloaderConfig;
