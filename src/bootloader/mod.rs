//! Firmware update state machine
//!
//! One [`Bootloader`] runs one update session: wait for the raw sync pattern,
//! walk the request/response handshake, erase the application region and
//! program it chunk by chunk. Any deviation ends the session with
//! [`Outcome::Aborted`]; the caller then starts whatever application is in
//! flash.

use crate::config::BootloaderConfig;
use crate::drivers::flash::{FlashControl, FlashError};
use crate::os::{Clock, SimpleTimer};
use crate::protocol::{Comms, Packet, PacketType, ProtocolError, Transport, PACKET_DATA_LEN};
use ufmt::{uDisplay, uWrite, uwrite, uwriteln, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Sync,
    WaitForUpdateReq,
    DeviceIdReq,
    DeviceIdRes,
    FwLengthReq,
    FwLengthRes,
    EraseApp,
    ReceiveFirmware,
    Done,
}

impl Step {
    pub const fn as_str(self) -> &'static str {
        match self {
            Step::Sync => "sync",
            Step::WaitForUpdateReq => "wait_for_update_req",
            Step::DeviceIdReq => "device_id_req",
            Step::DeviceIdRes => "device_id_res",
            Step::FwLengthReq => "fw_length_req",
            Step::FwLengthRes => "fw_length_res",
            Step::EraseApp => "erase_app",
            Step::ReceiveFirmware => "receive_firmware",
            Step::Done => "done",
        }
    }
}

impl uDisplay for Step {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Timeout,
    /// A packet arrived whose type does not fit the current step. `actual`
    /// is the raw wire value.
    UnexpectedPacket { expected: PacketType, actual: u8 },
    InvalidLength { expected: u8, actual: u8 },
    InvalidDeviceId(u8),
    FirmwareTooLarge { length: u32, available: u32 },
    EmptyFirmware,
    /// DATA packet declaring zero or more than 16 payload bytes
    InvalidChunkLength(u8),
    /// A chunk would carry the image past the announced length
    FirmwareOverrun { length: u32, received: u32 },
    DualBankEnabled,
    Flash(FlashError),
    Transport(ProtocolError),
}

impl AbortReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AbortReason::Timeout => "timeout",
            AbortReason::UnexpectedPacket { .. } => "invalid packet",
            AbortReason::InvalidLength { .. } => "invalid packet length",
            AbortReason::InvalidDeviceId(_) => "invalid device id",
            AbortReason::FirmwareTooLarge { .. } => "firmware size exceeded",
            AbortReason::EmptyFirmware => "empty firmware",
            AbortReason::InvalidChunkLength(_) => "invalid chunk length",
            AbortReason::FirmwareOverrun { .. } => "firmware overrun",
            AbortReason::DualBankEnabled => "dual bank is enabled",
            AbortReason::Flash(FlashError::EraseError) => "flash erase failed",
            AbortReason::Flash(FlashError::WriteError) => "flash write failed",
            AbortReason::Flash(FlashError::TimeoutError) => "flash timeout",
            AbortReason::Transport(_) => "transport fault",
        }
    }
}

impl uDisplay for AbortReason {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        f.write_str(self.as_str())?;
        match *self {
            AbortReason::UnexpectedPacket { expected, actual } => uwrite!(
                f,
                " (expected {}, got {})",
                expected,
                PacketType::name_of(actual)
            ),
            AbortReason::InvalidLength { expected, actual } => {
                uwrite!(f, " (expected {}, got {})", expected, actual)
            }
            AbortReason::InvalidDeviceId(id) => uwrite!(f, " ({})", id),
            AbortReason::FirmwareTooLarge { length, available } => {
                uwrite!(f, " ({} > {})", length, available)
            }
            AbortReason::InvalidChunkLength(len) => uwrite!(f, " ({})", len),
            AbortReason::FirmwareOverrun { length, received } => {
                uwrite!(f, " ({} > {})", received, length)
            }
            _ => Ok(()),
        }
    }
}

impl From<FlashError> for AbortReason {
    fn from(err: FlashError) -> Self {
        AbortReason::Flash(err)
    }
}

impl From<ProtocolError> for AbortReason {
    fn from(err: ProtocolError) -> Self {
        AbortReason::Transport(err)
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed { length: u32 },
    Aborted { step: Step, reason: AbortReason },
}

#[derive(Debug, Clone, Copy)]
struct Session {
    step: Step,
    sync_window: [u8; 4],
    fw_length: u32,
    received: u32,
    deadline: SimpleTimer,
}

pub struct Bootloader<T, F, C, L> {
    comms: Comms<T>,
    flash: F,
    clock: C,
    log: L,
    config: BootloaderConfig,
    session: Session,
    outcome: Option<Outcome>,
}

impl<T, F, C, L> Bootloader<T, F, C, L>
where
    T: Transport,
    F: FlashControl,
    C: Clock,
    L: uWrite,
{
    /// Sets up a session waiting for sync. Refuses to run when the flash is
    /// in dual-bank mode, since the sector map would not match the part.
    pub fn new(
        transport: T,
        flash: F,
        clock: C,
        mut log: L,
        config: BootloaderConfig,
    ) -> Result<Self, AbortReason> {
        if flash.is_dual_bank() {
            uwriteln!(log, "dual bank is enabled, cannot perform flash operation").ok();
            return Err(AbortReason::DualBankEnabled);
        }

        let deadline = SimpleTimer::arm(&clock, config.timeout_ms, false);
        uwriteln!(log, "Waiting for FW update sync...").ok();

        Ok(Self {
            comms: Comms::new(transport),
            flash,
            clock,
            log,
            config,
            session: Session {
                step: Step::Sync,
                sync_window: [0; 4],
                fw_length: 0,
                received: 0,
                deadline,
            },
            outcome: None,
        })
    }

    pub fn step(&self) -> Step {
        self.session.step
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Announced image size, zero until the length exchange is done.
    pub fn firmware_length(&self) -> u32 {
        self.session.fw_length
    }

    pub fn bytes_received(&self) -> u32 {
        self.session.received
    }

    pub fn comms(&self) -> &Comms<T> {
        &self.comms
    }

    pub fn comms_mut(&mut self) -> &mut Comms<T> {
        &mut self.comms
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn release(self) -> (T, F, C, L) {
        (self.comms.release(), self.flash, self.clock, self.log)
    }

    /// One main-loop iteration. Returns the outcome once the session is over;
    /// every later call returns the same outcome without touching the link.
    pub fn poll(&mut self) -> Option<Outcome> {
        if self.outcome.is_some() {
            return self.outcome;
        }

        let result = if self.session.deadline.has_elapsed(&self.clock) {
            Err(AbortReason::Timeout)
        } else {
            self.handle_step()
        };

        if let Err(reason) = result {
            self.abort(reason);
        }
        self.outcome
    }

    pub fn run(&mut self) -> Outcome {
        loop {
            if let Some(outcome) = self.poll() {
                return outcome;
            }
        }
    }

    fn handle_step(&mut self) -> Result<(), AbortReason> {
        match self.session.step {
            Step::Sync => self.handle_sync(),
            Step::WaitForUpdateReq => {
                if self.expect_packet(PacketType::FwUpdateReq)?.is_some() {
                    self.comms.send_control(PacketType::FwUpdateRes)?;
                    self.advance_to(Step::DeviceIdReq);
                }
                Ok(())
            }
            Step::DeviceIdReq => {
                self.comms.send_control(PacketType::DeviceIdReq)?;
                self.advance_to(Step::DeviceIdRes);
                Ok(())
            }
            Step::DeviceIdRes => self.handle_device_id(),
            Step::FwLengthReq => {
                self.comms.send_control(PacketType::FwLengthReq)?;
                self.advance_to(Step::FwLengthRes);
                Ok(())
            }
            Step::FwLengthRes => self.handle_fw_length(),
            Step::EraseApp => {
                self.flash.erase_main_app()?;
                self.comms.send_control(PacketType::ReadyForFirmware)?;
                self.advance_to(Step::ReceiveFirmware);
                Ok(())
            }
            Step::ReceiveFirmware => self.handle_firmware_chunk(),
            Step::Done => {
                self.comms.send_control(PacketType::UpdateSuccessful)?;
                uwriteln!(self.log, "fw update done! {} bytes written", self.session.received).ok();
                self.comms.stats().log(&mut self.log).ok();
                self.outcome = Some(Outcome::Completed {
                    length: self.session.received,
                });
                Ok(())
            }
        }
    }

    /// Scans raw link bytes for the sync pattern. Bytes after the pattern stay
    /// on the link for the framing layer.
    fn handle_sync(&mut self) -> Result<(), AbortReason> {
        while let Some(byte) = self.comms.transport().read_byte() {
            let window = &mut self.session.sync_window;
            window.copy_within(1.., 0);
            window[3] = byte;

            if *window == self.config.sync_sequence {
                uwriteln!(self.log, "sync seq observed, sending seq observed").ok();
                self.comms.send_control(PacketType::SeqObserved)?;
                self.advance_to(Step::WaitForUpdateReq);
                break;
            }
        }
        Ok(())
    }

    fn handle_device_id(&mut self) -> Result<(), AbortReason> {
        let Some(packet) = self.expect_packet(PacketType::DeviceIdRes)? else {
            return Ok(());
        };

        if packet.length != 1 {
            return Err(AbortReason::InvalidLength {
                expected: 1,
                actual: packet.length,
            });
        }
        if packet.data[0] != self.config.device_id {
            return Err(AbortReason::InvalidDeviceId(packet.data[0]));
        }

        self.advance_to(Step::FwLengthReq);
        Ok(())
    }

    fn handle_fw_length(&mut self) -> Result<(), AbortReason> {
        let Some(packet) = self.expect_packet(PacketType::FwLengthRes)? else {
            return Ok(());
        };

        if packet.length != 4 {
            return Err(AbortReason::InvalidLength {
                expected: 4,
                actual: packet.length,
            });
        }

        let length = u32::from_le_bytes([packet.data[0], packet.data[1], packet.data[2], packet.data[3]]);
        uwriteln!(self.log, "new firmware size is {}", length).ok();

        let available = self.flash.available_size();
        if length > available {
            return Err(AbortReason::FirmwareTooLarge { length, available });
        }
        if length == 0 {
            return Err(AbortReason::EmptyFirmware);
        }

        self.session.fw_length = length;
        self.advance_to(Step::EraseApp);
        Ok(())
    }

    fn handle_firmware_chunk(&mut self) -> Result<(), AbortReason> {
        let Some(packet) = self.expect_packet(PacketType::Data)? else {
            return Ok(());
        };

        let len = packet.length;
        if len == 0 || len as usize > PACKET_DATA_LEN {
            return Err(AbortReason::InvalidChunkLength(len));
        }

        let received = self.session.received + len as u32;
        if received > self.session.fw_length {
            return Err(AbortReason::FirmwareOverrun {
                length: self.session.fw_length,
                received,
            });
        }

        let address = self.flash.app_base() + self.session.received;
        self.flash.write(address, &packet.data[..len as usize])?;
        self.session.received = received;
        self.session.deadline.reset(&self.clock);

        if received == self.session.fw_length {
            self.advance_to(Step::Done);
        }
        Ok(())
    }

    /// Pumps the framing layer and takes the next queued packet, if any. A
    /// packet of any other type ends the session.
    fn expect_packet(&mut self, expected: PacketType) -> Result<Option<Packet>, AbortReason> {
        self.comms.update()?;
        let Some(packet) = self.comms.receive() else {
            return Ok(None);
        };

        #[cfg(feature = "debug")]
        packet.log(&mut self.log).ok();

        if !packet.is(expected) {
            uwriteln!(
                self.log,
                "expected to receive ({}), instead got ({})",
                expected,
                PacketType::name_of(packet.packet_type)
            )
            .ok();
            return Err(AbortReason::UnexpectedPacket {
                expected,
                actual: packet.packet_type,
            });
        }
        Ok(Some(packet))
    }

    fn advance_to(&mut self, step: Step) {
        uwriteln!(self.log, "advancing fsm to {}", step).ok();
        self.session.deadline.reset(&self.clock);
        self.session.step = step;
    }

    fn abort(&mut self, reason: AbortReason) {
        // Best effort; the link may be the reason we are here
        self.comms.send_control(PacketType::FwUpdateAborted).ok();

        let step = self.session.step;
        uwriteln!(
            self.log,
            "bootloader FW update aborted at: {}, reason: {}, starting the app...",
            step,
            reason
        )
        .ok();
        self.comms.stats().log(&mut self.log).ok();
        self.outcome = Some(Outcome::Aborted { step, reason });
    }
}
