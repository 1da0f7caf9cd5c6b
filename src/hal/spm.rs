//! Self-programming (SPM) driver for the ATmega128 boot section
//!
//! The part erases and writes 256-byte pages through a temporary page
//! buffer. Writes of arbitrary length are done read-modify-write per page,
//! so chunks smaller than a page can be appended into an erased region.

use crate::drivers::flash::{FlashError, FlashProgrammer, Sector};
use core::arch::asm;
use core::ptr::{read_volatile, write_volatile};

pub const SPM_PAGE_SIZE: usize = 256;

/// First byte of the boot section; SPM refuses to touch it from here on.
pub const BOOT_SECTION_START: u32 = 0x1E000;

// Data-space addresses
const SPMCSR: *mut u8 = 0x68 as *mut u8;
const RAMPZ: *mut u8 = 0x5B as *mut u8;

const SPMEN: u8 = 1 << 0;
const PGERS: u8 = 1 << 1;
const PGWRT: u8 = 1 << 2;
const RWWSRE: u8 = 1 << 4;

// Page erase takes ~4.5ms; this leaves plenty of margin at 16MHz
const SPIN_LIMIT: u32 = 400_000;

pub struct SpmProgrammer {
    page: [u8; SPM_PAGE_SIZE],
}

impl SpmProgrammer {
    pub const fn new() -> Self {
        Self {
            page: [0xFF; SPM_PAGE_SIZE],
        }
    }

    fn wait_idle() -> Result<(), FlashError> {
        for _ in 0..SPIN_LIMIT {
            if unsafe { read_volatile(SPMCSR) } & SPMEN == 0 {
                return Ok(());
            }
        }
        Err(FlashError::TimeoutError)
    }

    fn command(address: u32, command: u8) -> Result<(), FlashError> {
        Self::wait_idle()?;
        avr_device::interrupt::free(|_| unsafe {
            write_volatile(RAMPZ, (address >> 16) as u8);
            asm!(
                "sts 0x68, {cmd}",
                "spm",
                cmd = in(reg) command,
                in("Z") address as u16,
            );
        });
        Self::wait_idle()
    }

    /// Loads one little-endian word into the temporary page buffer.
    fn fill_word(offset: u16, low: u8, high: u8) {
        avr_device::interrupt::free(|_| unsafe {
            asm!(
                "mov r0, {low}",
                "mov r1, {high}",
                "sts 0x68, {cmd}",
                "spm",
                "clr r1",
                low = in(reg) low,
                high = in(reg) high,
                cmd = in(reg) SPMEN,
                in("Z") offset,
            );
        });
    }

    fn read_byte(address: u32) -> u8 {
        let byte: u8;
        unsafe {
            write_volatile(RAMPZ, (address >> 16) as u8);
            asm!(
                "elpm {byte}, Z",
                byte = out(reg) byte,
                in("Z") address as u16,
            );
        }
        byte
    }

    fn enable_rww() -> Result<(), FlashError> {
        Self::command(0, RWWSRE | SPMEN)
    }

    fn load_page(&mut self, page_address: u32) {
        for (i, byte) in self.page.iter_mut().enumerate() {
            *byte = Self::read_byte(page_address + i as u32);
        }
    }

    fn write_page(&mut self, page_address: u32) -> Result<(), FlashError> {
        Self::wait_idle()?;
        for (i, pair) in self.page.chunks_exact(2).enumerate() {
            Self::fill_word((i * 2) as u16, pair[0], pair[1]);
        }
        Self::command(page_address, PGWRT | SPMEN)?;
        Self::enable_rww()?;

        for (i, &expected) in self.page.iter().enumerate() {
            if Self::read_byte(page_address + i as u32) != expected {
                return Err(FlashError::WriteError);
            }
        }
        Ok(())
    }
}

impl Default for SpmProgrammer {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashProgrammer for SpmProgrammer {
    fn unlock(&mut self) {}

    fn lock(&mut self) {
        // Leaves the application section readable again
        Self::enable_rww().ok();
    }

    fn erase_sector(&mut self, sector: &Sector) -> Result<(), FlashError> {
        if sector.address + sector.size > BOOT_SECTION_START {
            return Err(FlashError::EraseError);
        }
        for page in (sector.address..sector.address + sector.size).step_by(SPM_PAGE_SIZE) {
            Self::command(page, PGERS | SPMEN)?;
        }
        Self::enable_rww()
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        if address + data.len() as u32 > BOOT_SECTION_START {
            return Err(FlashError::WriteError);
        }

        let mut written = 0;
        while written < data.len() {
            let target = address + written as u32;
            let page_address = target & !(SPM_PAGE_SIZE as u32 - 1);
            let start = (target - page_address) as usize;
            let count = (SPM_PAGE_SIZE - start).min(data.len() - written);

            self.load_page(page_address);
            self.page[start..start + count].copy_from_slice(&data[written..written + count]);
            self.write_page(page_address)?;
            written += count;
        }
        Ok(())
    }

    fn dual_bank_enabled(&self) -> bool {
        false
    }
}
