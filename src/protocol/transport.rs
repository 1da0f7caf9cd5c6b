//! Byte transport the framing layer runs on

use super::Result;

/// A point-to-point byte link. Reads never block; writes block until the
/// bytes have been handed to the wire.
pub trait Transport {
    fn data_available(&self) -> bool;

    fn read_byte(&mut self) -> Option<u8>;

    fn write_byte(&mut self, byte: u8) -> Result<()>;

    fn write(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            self.write_byte(byte)?;
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn data_available(&self) -> bool {
        (**self).data_available()
    }

    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        (**self).write_byte(byte)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }
}
