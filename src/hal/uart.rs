//! Interrupt-fed serial byte transport
//!
//! The receive interrupt pushes each byte into a ring buffer through
//! [`receive_interrupt`]; the main loop drains it through [`Uart`]. Transmit
//! is blocking on whatever `embedded_hal` serial writer the board provides.

use crate::protocol::{ProtocolError, Result, Transport};
use crate::ring_buffer::{Consumer, Producer};
use embedded_hal::serial;

/// Receive interrupt body. Never blocks; when the ring is full the byte is
/// dropped and the loss shows up later as a CRC failure on the frame.
#[inline]
pub fn receive_interrupt<const N: usize>(rx: &mut Producer<'_, N>, byte: u8) -> bool {
    rx.write(byte).is_ok()
}

pub struct Uart<'a, TX, const N: usize> {
    tx: TX,
    rx: Consumer<'a, N>,
}

impl<'a, TX, const N: usize> Uart<'a, TX, N>
where
    TX: serial::Write<u8>,
{
    pub fn new(tx: TX, rx: Consumer<'a, N>) -> Self {
        Self { tx, rx }
    }

    /// Bytes waiting in the receive ring.
    pub fn pending(&self) -> usize {
        self.rx.data_len()
    }

    pub fn flush(&mut self) -> Result<()> {
        nb::block!(self.tx.flush()).map_err(|_| ProtocolError::TransportError)
    }

    pub fn release(self) -> (TX, Consumer<'a, N>) {
        (self.tx, self.rx)
    }
}

impl<TX, const N: usize> Transport for Uart<'_, TX, N>
where
    TX: serial::Write<u8>,
{
    fn data_available(&self) -> bool {
        !self.rx.is_empty()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.read()
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        nb::block!(self.tx.write(byte)).map_err(|_| ProtocolError::TransportError)
    }
}
