//! Fixed 19-byte frame: `length | type | data[16] | crc`

use super::crc::crc8;
use super::{ProtocolError, Result};
use crate::logger::write_hex;
use ufmt::{uDisplay, uWrite, uwrite, uwriteln, Formatter};

pub const PACKET_DATA_LEN: usize = 16;
pub const PACKET_LEN: usize = PACKET_DATA_LEN + 3;

const CRC_OFFSET: usize = PACKET_LEN - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Ack = 1,
    Retx = 2,
    SeqObserved = 3,
    FwUpdateReq = 4,
    FwUpdateRes = 5,
    DeviceIdReq = 6,
    DeviceIdRes = 7,
    FwLengthReq = 8,
    FwLengthRes = 9,
    ReadyForFirmware = 10,
    UpdateSuccessful = 11,
    FwUpdateAborted = 12,
}

impl PacketType {
    /// Number of known types. Statistics keep one extra slot for the rest.
    pub const COUNT: usize = 13;

    pub const fn as_str(self) -> &'static str {
        match self {
            PacketType::Data => "DATA",
            PacketType::Ack => "ACK",
            PacketType::Retx => "RETX",
            PacketType::SeqObserved => "SEQ_OBSERVED",
            PacketType::FwUpdateReq => "FW_UPDATE_REQ",
            PacketType::FwUpdateRes => "FW_UPDATE_RES",
            PacketType::DeviceIdReq => "DEVICE_ID_REQ",
            PacketType::DeviceIdRes => "DEVICE_ID_RES",
            PacketType::FwLengthReq => "FW_LENGTH_REQ",
            PacketType::FwLengthRes => "FW_LENGTH_RES",
            PacketType::ReadyForFirmware => "READY_FOR_FIRMWARE",
            PacketType::UpdateSuccessful => "UPDATE_SUCCESSFUL",
            PacketType::FwUpdateAborted => "FW_UPDATE_ABORTED",
        }
    }

    /// Name for a raw wire value, known or not.
    pub fn name_of(raw: u8) -> &'static str {
        match PacketType::try_from(raw) {
            Ok(kind) => kind.as_str(),
            Err(_) => "UNKNOWN",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(raw: u8) -> core::result::Result<Self, u8> {
        Ok(match raw {
            0 => PacketType::Data,
            1 => PacketType::Ack,
            2 => PacketType::Retx,
            3 => PacketType::SeqObserved,
            4 => PacketType::FwUpdateReq,
            5 => PacketType::FwUpdateRes,
            6 => PacketType::DeviceIdReq,
            7 => PacketType::DeviceIdRes,
            8 => PacketType::FwLengthReq,
            9 => PacketType::FwLengthRes,
            10 => PacketType::ReadyForFirmware,
            11 => PacketType::UpdateSuccessful,
            12 => PacketType::FwUpdateAborted,
            other => return Err(other),
        })
    }
}

impl uDisplay for PacketType {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> core::result::Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        f.write_str(self.as_str())
    }
}

/// One frame as it travels on the wire. The type is kept raw so frames of
/// unknown kinds still reach the consumer once their CRC checks out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub length: u8,
    pub packet_type: u8,
    pub data: [u8; PACKET_DATA_LEN],
    pub crc: u8,
}

impl Packet {
    pub const fn empty() -> Self {
        Self {
            length: 0,
            packet_type: 0,
            data: [0; PACKET_DATA_LEN],
            crc: 0,
        }
    }

    /// Builds a sealed packet; the payload is padded with `0xFF`.
    pub fn new(packet_type: PacketType, payload: &[u8]) -> Result<Self> {
        if payload.len() > PACKET_DATA_LEN {
            return Err(ProtocolError::BufferOverflow);
        }

        let mut packet = Self {
            length: payload.len() as u8,
            packet_type: packet_type as u8,
            data: [0xFF; PACKET_DATA_LEN],
            crc: 0,
        };
        packet.data[..payload.len()].copy_from_slice(payload);
        packet.seal();
        Ok(packet)
    }

    /// Control packet: full-length all-`0xFF` payload, identical every time.
    pub fn control(packet_type: PacketType) -> Self {
        let mut packet = Self {
            length: PACKET_DATA_LEN as u8,
            packet_type: packet_type as u8,
            data: [0xFF; PACKET_DATA_LEN],
            crc: 0,
        };
        packet.seal();
        packet
    }

    pub fn kind(&self) -> core::result::Result<PacketType, u8> {
        PacketType::try_from(self.packet_type)
    }

    pub fn is(&self, packet_type: PacketType) -> bool {
        self.packet_type == packet_type as u8
    }

    /// Payload bytes as declared by `length`, clamped to the frame.
    pub fn payload(&self) -> &[u8] {
        let len = (self.length as usize).min(PACKET_DATA_LEN);
        &self.data[..len]
    }

    pub fn compute_crc(&self) -> u8 {
        let bytes = self.to_bytes();
        crc8(&bytes[..CRC_OFFSET])
    }

    pub fn is_valid(&self) -> bool {
        self.compute_crc() == self.crc
    }

    pub fn seal(&mut self) {
        self.crc = self.compute_crc();
    }

    pub fn to_bytes(&self) -> [u8; PACKET_LEN] {
        let mut frame = [0u8; PACKET_LEN];
        frame[0] = self.length;
        frame[1] = self.packet_type;
        frame[2..CRC_OFFSET].copy_from_slice(&self.data);
        frame[CRC_OFFSET] = self.crc;
        frame
    }

    /// Unchecked decode; the CRC is carried over as received.
    pub fn from_bytes(frame: &[u8; PACKET_LEN]) -> Self {
        let mut data = [0u8; PACKET_DATA_LEN];
        data.copy_from_slice(&frame[2..CRC_OFFSET]);
        Self {
            length: frame[0],
            packet_type: frame[1],
            data,
            crc: frame[CRC_OFFSET],
        }
    }

    /// Decodes a frame and rejects it when the CRC does not match.
    pub fn parse(frame: &[u8; PACKET_LEN]) -> Result<Self> {
        let packet = Self::from_bytes(frame);
        if !packet.is_valid() {
            return Err(ProtocolError::InvalidChecksum);
        }
        Ok(packet)
    }

    pub fn log<W>(&self, w: &mut W) -> core::result::Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        uwriteln!(w, "Packet:")?;
        uwriteln!(w, " Length: {}", self.length)?;
        uwriteln!(
            w,
            " Type {}: ({})",
            PacketType::name_of(self.packet_type),
            self.packet_type
        )?;
        uwrite!(w, " Data: ")?;
        for &byte in self.data.iter() {
            write_hex(w, byte)?;
            w.write_str(" ")?;
        }
        uwrite!(w, "\n CRC: ")?;
        write_hex(w, self.crc)?;
        uwriteln!(w, " - {}", if self.is_valid() { "valid" } else { "invalid" })
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::empty()
    }
}
