#![allow(dead_code)]

use atmega128_bootloader::config::BootloaderConfig;
use atmega128_bootloader::drivers::flash::{AppFlash, FlashError, FlashProgrammer, Sector, SectorLayout};
use atmega128_bootloader::os::Clock;
use atmega128_bootloader::protocol::{self, Packet, PacketType, Transport, PACKET_LEN};
use atmega128_bootloader::{AbortReason, Bootloader};
use std::cell::Cell;
use std::collections::VecDeque;

/// Four 1 KiB sectors; the first is the bootloader, the rest (2 KiB at
/// 0x0800_0400) the application.
pub const FLASH_BASE: u32 = 0x0800_0000;
pub const SECTOR_SIZES: [u32; 4] = [1024; 4];
pub const LAYOUT: SectorLayout = SectorLayout::new(FLASH_BASE, &SECTOR_SIZES, 1, 3);
pub const APP_BASE: u32 = FLASH_BASE + 1024;
pub const APP_SIZE: u32 = 2048;

/// Host side of the serial link.
#[derive(Default)]
pub struct Link {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl Link {
    pub fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn feed_packet(&mut self, packet: &Packet) {
        self.feed(&packet.to_bytes());
    }

    /// Everything the device sent since the last call, as frames.
    pub fn take_sent(&mut self) -> Vec<Packet> {
        let bytes = std::mem::take(&mut self.tx);
        assert_eq!(bytes.len() % PACKET_LEN, 0, "partial frame on the wire");
        bytes
            .chunks(PACKET_LEN)
            .map(|chunk| Packet::parse(chunk.try_into().unwrap()).unwrap())
            .collect()
    }

    pub fn take_sent_types(&mut self) -> Vec<PacketType> {
        self.take_sent()
            .iter()
            .map(|packet| packet.kind().unwrap())
            .collect()
    }
}

impl Transport for Link {
    fn data_available(&self) -> bool {
        !self.rx.is_empty()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write_byte(&mut self, byte: u8) -> protocol::Result<()> {
        self.tx.push(byte);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockClock(Cell<u32>);

impl MockClock {
    pub fn advance(&self, ms: u32) {
        self.0.set(self.0.get().wrapping_add(ms));
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

/// Flash array backed by a `Vec`, starting out fully programmed with zeros
/// so erased regions are easy to tell apart.
pub struct MemProgrammer {
    pub memory: Vec<u8>,
    pub erased: Vec<usize>,
    pub unlocked: bool,
    pub dual_bank: bool,
    pub fail_writes: bool,
}

impl Default for MemProgrammer {
    fn default() -> Self {
        Self {
            memory: vec![0; SECTOR_SIZES.iter().sum::<u32>() as usize],
            erased: Vec::new(),
            unlocked: false,
            dual_bank: false,
            fail_writes: false,
        }
    }
}

impl MemProgrammer {
    pub fn app_bytes(&self, len: usize) -> &[u8] {
        let start = (APP_BASE - FLASH_BASE) as usize;
        &self.memory[start..start + len]
    }
}

impl FlashProgrammer for MemProgrammer {
    fn unlock(&mut self) {
        self.unlocked = true;
    }

    fn lock(&mut self) {
        self.unlocked = false;
    }

    fn erase_sector(&mut self, sector: &Sector) -> Result<(), FlashError> {
        if !self.unlocked {
            return Err(FlashError::EraseError);
        }
        let start = (sector.address - FLASH_BASE) as usize;
        self.memory[start..start + sector.size as usize].fill(0xFF);
        self.erased.push(sector.index);
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        if !self.unlocked || self.fail_writes {
            return Err(FlashError::WriteError);
        }
        let start = (address - FLASH_BASE) as usize;
        self.memory[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn dual_bank_enabled(&self) -> bool {
        self.dual_bank
    }
}

pub type TestBootloader<'c> = Bootloader<Link, AppFlash<MemProgrammer>, &'c MockClock, String>;

pub fn bootloader_with(
    clock: &MockClock,
    programmer: MemProgrammer,
) -> Result<TestBootloader<'_>, AbortReason> {
    Bootloader::new(
        Link::default(),
        AppFlash::new(programmer, LAYOUT),
        clock,
        String::new(),
        BootloaderConfig::default(),
    )
}

pub fn bootloader(clock: &MockClock) -> TestBootloader<'_> {
    bootloader_with(clock, MemProgrammer::default()).unwrap()
}

pub fn link<'a>(bl: &'a mut TestBootloader<'_>) -> &'a mut Link {
    bl.comms_mut().transport()
}

pub fn control(packet_type: PacketType) -> Packet {
    Packet::control(packet_type)
}

pub fn packet(packet_type: PacketType, payload: &[u8]) -> Packet {
    Packet::new(packet_type, payload).unwrap()
}
