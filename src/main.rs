#![cfg_attr(target_arch = "avr", no_std)]
#![cfg_attr(target_arch = "avr", no_main)]
#![cfg_attr(target_arch = "avr", feature(abi_avr_interrupt))]

#[cfg(all(target_arch = "avr", not(feature = "atmega128")))]
compile_error!("the firmware image needs a chip feature; enable `atmega128`");

#[cfg(all(target_arch = "avr", feature = "atmega128"))]
mod firmware {
    use panic_halt as _;

    use atmega128_bootloader::config::{BootloaderConfig, RX_BUFFER_LEN, UART_BAUD};
    use atmega128_bootloader::drivers::flash::{AppFlash, ATMEGA128_LAYOUT};
    use atmega128_bootloader::hal::{self, receive_interrupt, timer, SpmProgrammer, Uart, Usart0, Usart1};
    use atmega128_bootloader::logger::SerialLog;
    use atmega128_bootloader::os::SYSTEM_TICKS;
    use atmega128_bootloader::ring_buffer::{Producer, RingBuffer};
    use atmega128_bootloader::Bootloader;
    use core::cell::RefCell;
    use critical_section::Mutex;
    use ufmt::uwriteln;

    static mut RX_RING: RingBuffer<RX_BUFFER_LEN> = RingBuffer::new();

    // Global state for interrupt handling
    static RX_PRODUCER: Mutex<RefCell<Option<Producer<'static, RX_BUFFER_LEN>>>> =
        Mutex::new(RefCell::new(None));

    #[avr_device::entry]
    fn main() -> ! {
        hal::use_boot_vectors();

        let link_tx = Usart0::init(UART_BAUD, true);
        let mut log = SerialLog::new(Usart1::init(UART_BAUD, false));
        timer::start_system_tick();

        // Only place the ring is borrowed; the ISR gets the producer half
        let ring: &'static mut RingBuffer<RX_BUFFER_LEN> =
            unsafe { &mut *core::ptr::addr_of_mut!(RX_RING) };
        let (producer, consumer) = ring.split();
        critical_section::with(|cs| {
            RX_PRODUCER.borrow(cs).replace(Some(producer));
        });

        unsafe { avr_device::interrupt::enable() };

        uwriteln!(log, "Booting device...").ok();

        let uart = Uart::new(link_tx, consumer);
        let flash = AppFlash::new(SpmProgrammer::new(), ATMEGA128_LAYOUT);

        if let Ok(mut bootloader) =
            Bootloader::new(uart, flash, &SYSTEM_TICKS, log, BootloaderConfig::default())
        {
            bootloader.run();
        }

        timer::stop_system_tick();
        hal::start_application()
    }

    #[avr_device::interrupt(atmega128a)]
    fn USART0_RX() {
        let byte = Usart0::read_data();
        critical_section::with(|cs| {
            if let Some(producer) = RX_PRODUCER.borrow(cs).borrow_mut().as_mut() {
                receive_interrupt(producer, byte);
            }
        });
    }

    #[avr_device::interrupt(atmega128a)]
    fn TIMER0_COMP() {
        SYSTEM_TICKS.tick();
    }
}

#[cfg(not(target_arch = "avr"))]
fn main() {
    eprintln!("bootloader: build for the avr-atmega128 target to get a flashable image");
}
