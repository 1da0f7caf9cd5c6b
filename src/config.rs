//! Configuration constants for the ATmega128 bootloader

/// CPU frequency in Hz
pub const CPU_FREQ_HZ: u32 = 16_000_000;

/// Firmware link baud rate (8N1, no flow control)
pub const UART_BAUD: u32 = 115_200;

/// System tick rate in Hz, one tick per millisecond
pub const TICK_HZ: u32 = 1_000;

/// Identifier the host must echo back in `DEVICE_ID_RES`
pub const DEVICE_ID: u8 = 0x69;

/// Raw bytes the host sends before any framed traffic
pub const SYNC_SEQUENCE: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

/// Inter-step silence allowed before the update is abandoned
pub const TIMEOUT_MS: u32 = 5_000;

/// Receive ring size. At 115200 baud this holds ~11ms of unread traffic.
pub const RX_BUFFER_LEN: usize = 128;

/// Byte capacity of the validated packet queue
pub const PACKET_QUEUE_LEN: usize = 256;

/// Consecutive RETX frames emitted before the endpoint stops asking
pub const MAX_RETX_STREAK: u8 = 8;

/// Session parameters that differ between boards and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderConfig {
    pub device_id: u8,
    pub sync_sequence: [u8; 4],
    pub timeout_ms: u32,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            device_id: DEVICE_ID,
            sync_sequence: SYNC_SEQUENCE,
            timeout_ms: TIMEOUT_MS,
        }
    }
}
