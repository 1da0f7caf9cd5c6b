//! Packet framing layer between the byte transport and the update state machine

pub mod crc;
pub mod packet;
pub mod transport;

pub use packet::{Packet, PacketType, PACKET_DATA_LEN, PACKET_LEN};
pub use transport::Transport;

use crate::config::{MAX_RETX_STREAK, PACKET_QUEUE_LEN};
use crate::ring_buffer::RingBuffer;
use ufmt::{uWrite, uwriteln};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    BufferOverflow,
    InvalidChecksum,
    TransportError,
}

pub type Result<T> = core::result::Result<T, ProtocolError>;

const TYPE_SLOTS: usize = PacketType::COUNT + 1;

fn type_slot(raw: u8) -> usize {
    (raw as usize).min(PacketType::COUNT)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommsStats {
    /// Frames dropped on CRC mismatch
    pub crc_errors: u32,
    /// Valid frames bounced because the packet queue had no room
    pub queue_full: u32,
    /// Last-sent packets replayed on a peer RETX
    pub retx_replayed: u32,
    /// RETX requests and replays held back by the streak limit
    pub retx_suppressed: u32,
    /// Per-type counters, indexed by wire value; the last slot counts unknown types
    pub tx_packets: [u32; TYPE_SLOTS],
    pub rx_packets: [u32; TYPE_SLOTS],
}

impl CommsStats {
    pub fn sent(&self, packet_type: PacketType) -> u32 {
        self.tx_packets[packet_type as usize]
    }

    pub fn received(&self, packet_type: PacketType) -> u32 {
        self.rx_packets[packet_type as usize]
    }

    pub fn received_unknown(&self) -> u32 {
        self.rx_packets[PacketType::COUNT]
    }

    pub fn log<W>(&self, w: &mut W) -> core::result::Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        uwriteln!(w, "Comms Stats:")?;
        uwriteln!(w, "CRC Error Count: {}", self.crc_errors)?;
        uwriteln!(w, "Queue Full Count: {}", self.queue_full)?;
        uwriteln!(w, "RETX Replayed: {}", self.retx_replayed)?;
        uwriteln!(w, "RETX Suppressed: {}", self.retx_suppressed)?;
        for raw in 0..PacketType::COUNT as u8 {
            let slot = raw as usize;
            if self.tx_packets[slot] == 0 && self.rx_packets[slot] == 0 {
                continue;
            }
            uwriteln!(
                w,
                "{}: tx {} rx {}",
                PacketType::name_of(raw),
                self.tx_packets[slot],
                self.rx_packets[slot]
            )?;
        }
        if self.received_unknown() != 0 {
            uwriteln!(w, "UNKNOWN: rx {}", self.received_unknown())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Length,
    Type,
    Data,
    Crc,
}

/// Comms endpoint: reassembles frames from the transport, answers them with
/// ACK/RETX and queues the ones meant for the update state machine.
pub struct Comms<T> {
    transport: T,
    state: RxState,
    data_idx: usize,
    pending: Packet,
    last_sent: Option<Packet>,
    queue: RingBuffer<PACKET_QUEUE_LEN>,
    retx_streak: u8,
    stats: CommsStats,
}

impl<T: Transport> Comms<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: RxState::Length,
            data_idx: 0,
            pending: Packet::empty(),
            last_sent: None,
            queue: RingBuffer::new(),
            retx_streak: 0,
            stats: CommsStats::default(),
        }
    }

    /// Raw access to the link, for traffic that is not framed.
    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn stats(&self) -> &CommsStats {
        &self.stats
    }

    pub fn last_sent(&self) -> Option<&Packet> {
        self.last_sent.as_ref()
    }

    pub fn release(self) -> T {
        self.transport
    }

    /// Consumes every byte the transport has buffered.
    pub fn update(&mut self) -> Result<()> {
        while self.transport.data_available() {
            let Some(byte) = self.transport.read_byte() else {
                break;
            };
            self.consume(byte)?;
        }
        Ok(())
    }

    pub fn packet_available(&self) -> bool {
        self.queue.data_len() >= PACKET_LEN
    }

    pub fn receive(&mut self) -> Option<Packet> {
        let mut frame = [0u8; PACKET_LEN];
        self.queue.read_many(&mut frame).ok()?;
        Some(Packet::from_bytes(&frame))
    }

    /// Writes the frame and keeps it as the one a peer RETX replays.
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        self.transport.write(&packet.to_bytes())?;
        self.last_sent = Some(*packet);
        self.stats.tx_packets[type_slot(packet.packet_type)] += 1;
        Ok(())
    }

    pub fn send_control(&mut self, packet_type: PacketType) -> Result<()> {
        self.send(&Packet::control(packet_type))
    }

    fn consume(&mut self, byte: u8) -> Result<()> {
        match self.state {
            RxState::Length => {
                self.pending.length = byte;
                self.state = RxState::Type;
            }
            RxState::Type => {
                self.pending.packet_type = byte;
                self.state = RxState::Data;
            }
            RxState::Data => {
                // Always a full 16 bytes, whatever `length` claims
                self.pending.data[self.data_idx] = byte;
                self.data_idx += 1;
                if self.data_idx >= PACKET_DATA_LEN {
                    self.data_idx = 0;
                    self.state = RxState::Crc;
                }
            }
            RxState::Crc => {
                self.pending.crc = byte;
                self.state = RxState::Length;
                return self.dispatch();
            }
        }
        Ok(())
    }

    fn dispatch(&mut self) -> Result<()> {
        let packet = self.pending;

        if !packet.is_valid() {
            self.stats.crc_errors += 1;
            return self.request_retransmit();
        }

        self.stats.rx_packets[type_slot(packet.packet_type)] += 1;

        match packet.kind() {
            Ok(PacketType::Retx) => self.replay_last(),
            Ok(PacketType::Ack) => {
                self.retx_streak = 0;
                Ok(())
            }
            _ => match self.queue.write_many(&packet.to_bytes()) {
                Ok(()) => {
                    self.retx_streak = 0;
                    self.send_control(PacketType::Ack)
                }
                Err(_) => {
                    // Not stored, so the peer has to send it again
                    self.stats.queue_full += 1;
                    self.request_retransmit()
                }
            },
        }
    }

    fn retx_allowed(&mut self) -> bool {
        if self.retx_streak >= MAX_RETX_STREAK {
            self.stats.retx_suppressed += 1;
            return false;
        }
        self.retx_streak += 1;
        true
    }

    fn request_retransmit(&mut self) -> Result<()> {
        if !self.retx_allowed() {
            return Ok(());
        }
        self.send_control(PacketType::Retx)
    }

    fn replay_last(&mut self) -> Result<()> {
        let Some(packet) = self.last_sent else {
            return Ok(());
        };
        if !self.retx_allowed() {
            return Ok(());
        }
        self.stats.retx_replayed += 1;
        self.send(&packet)
    }
}
