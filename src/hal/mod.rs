pub mod uart;

#[cfg(all(target_arch = "avr", feature = "atmega128"))]
pub mod boot;
#[cfg(all(target_arch = "avr", feature = "atmega128"))]
pub mod spm;
#[cfg(all(target_arch = "avr", feature = "atmega128"))]
pub mod timer;
#[cfg(all(target_arch = "avr", feature = "atmega128"))]
pub mod usart;

// Re-export commonly used types
pub use uart::{receive_interrupt, Uart};

#[cfg(all(target_arch = "avr", feature = "atmega128"))]
pub use boot::{start_application, use_boot_vectors};
#[cfg(all(target_arch = "avr", feature = "atmega128"))]
pub use spm::SpmProgrammer;
#[cfg(all(target_arch = "avr", feature = "atmega128"))]
pub use usart::{Usart0, Usart1};
