//! Diagnostic log sinks for `ufmt`

use core::convert::Infallible;
use embedded_hal::serial;
use ufmt::uWrite;

const HEX_CHARS: [u8; 16] = *b"0123456789ABCDEF";

/// Writes log text to a serial TX line, turning `\n` into `\n\r` for terminals.
pub struct SerialLog<W> {
    serial: W,
}

impl<W: serial::Write<u8>> SerialLog<W> {
    pub fn new(serial: W) -> Self {
        Self { serial }
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<(), W::Error> {
        nb::block!(self.serial.write(byte))
    }

    pub fn release(self) -> W {
        self.serial
    }
}

impl<W: serial::Write<u8>> uWrite for SerialLog<W> {
    type Error = W::Error;

    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        for byte in s.bytes() {
            self.write_byte(byte)?;
            if byte == b'\n' {
                self.write_byte(b'\r')?;
            }
        }
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl uWrite for NullLog {
    type Error = Infallible;

    fn write_str(&mut self, _: &str) -> Result<(), Infallible> {
        Ok(())
    }
}

/// Two uppercase hex digits.
pub fn write_hex<W>(w: &mut W, byte: u8) -> Result<(), W::Error>
where
    W: uWrite + ?Sized,
{
    w.write_char(HEX_CHARS[(byte >> 4) as usize] as char)?;
    w.write_char(HEX_CHARS[(byte & 0xF) as usize] as char)
}
