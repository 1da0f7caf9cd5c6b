//! CRC-8 frame check (poly 0x07, init 0x00, no reflection, no final xor)

use ::crc::{Crc, CRC_8_SMBUS};

pub const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

#[inline]
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}
