//! ATmega128 USART register drivers
//!
//! USART0 carries the firmware link, USART1 the diagnostic log.

use crate::config::CPU_FREQ_HZ;
use avr_device::atmega128a::{USART0, USART1};
use core::convert::Infallible;
use embedded_hal::serial;

// UCSRnA
const UDRE: u8 = 1 << 5;
const TXC: u8 = 1 << 6;
const U2X: u8 = 1 << 1;
// UCSRnB
const RXCIE: u8 = 1 << 7;
const RXEN: u8 = 1 << 4;
const TXEN: u8 = 1 << 3;
// UCSRnC: asynchronous, 8 data bits, no parity, 1 stop bit
const FRAME_8N1: u8 = (1 << 2) | (1 << 1);

/// Double-speed divisor; 16 for 115200 baud at 16MHz
pub const fn ubrr_u2x(baud: u32) -> u16 {
    ((CPU_FREQ_HZ + 4 * baud) / (8 * baud) - 1) as u16
}

macro_rules! usart {
    ($Name:ident, $USART:ident, $udr:ident, $ucsra:ident, $ucsrb:ident, $ucsrc:ident, $ubrrh:ident, $ubrrl:ident) => {
        pub struct $Name {
            _private: (),
        }

        impl $Name {
            /// Configures 8N1 at `baud`. With `rx_interrupt` the receiver is
            /// enabled and raises its RX-complete interrupt per byte.
            pub fn init(baud: u32, rx_interrupt: bool) -> Self {
                let ubrr = ubrr_u2x(baud);
                let mut ucsrb = TXEN;
                if rx_interrupt {
                    ucsrb |= RXEN | RXCIE;
                }

                unsafe {
                    let p = $USART::ptr();
                    (*p).$ubrrh.write(|w| w.bits((ubrr >> 8) as u8));
                    (*p).$ubrrl.write(|w| w.bits(ubrr as u8));
                    (*p).$ucsra.write(|w| w.bits(U2X));
                    (*p).$ucsrc.write(|w| w.bits(FRAME_8N1));
                    (*p).$ucsrb.write(|w| w.bits(ucsrb));
                }

                Self { _private: () }
            }

            /// Data register read for the RX-complete handler.
            #[inline]
            pub fn read_data() -> u8 {
                unsafe { (*$USART::ptr()).$udr.read().bits() }
            }
        }

        impl serial::Write<u8> for $Name {
            type Error = Infallible;

            fn write(&mut self, byte: u8) -> nb::Result<(), Infallible> {
                unsafe {
                    let p = $USART::ptr();
                    if (*p).$ucsra.read().bits() & UDRE == 0 {
                        return Err(nb::Error::WouldBlock);
                    }
                    // Writing TXC clears it so flush() sees this byte
                    (*p).$ucsra.write(|w| w.bits(U2X | TXC));
                    (*p).$udr.write(|w| w.bits(byte));
                }
                Ok(())
            }

            fn flush(&mut self) -> nb::Result<(), Infallible> {
                unsafe {
                    let ucsra = (*$USART::ptr()).$ucsra.read().bits();
                    if ucsra & UDRE == 0 || ucsra & TXC == 0 {
                        return Err(nb::Error::WouldBlock);
                    }
                }
                Ok(())
            }
        }
    };
}

usart!(Usart0, USART0, udr0, ucsr0a, ucsr0b, ucsr0c, ubrr0h, ubrr0l);
usart!(Usart1, USART1, udr1, ucsr1a, ucsr1b, ucsr1c, ubrr1h, ubrr1l);
