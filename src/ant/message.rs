//! ANT serial message framing: `SYNC LEN ID PAYLOAD.. CHECKSUM`, where the
//! checksum is the XOR of every preceding byte including the sync byte.

use log::{trace, warn};

use super::ChannelId;

pub const SYNC: u8 = 0xA4;

/// Largest payload an ANT USB stick emits (flagged extended data with RSSI and timestamp).
const MAX_PAYLOAD: usize = 32;

pub mod ids {
    pub const CHANNEL_RESPONSE: u8 = 0x40;
    pub const UNASSIGN_CHANNEL: u8 = 0x41;
    pub const ASSIGN_CHANNEL: u8 = 0x42;
    pub const CHANNEL_PERIOD: u8 = 0x43;
    pub const CHANNEL_RF_FREQUENCY: u8 = 0x45;
    pub const NETWORK_KEY: u8 = 0x46;
    pub const RESET_SYSTEM: u8 = 0x4A;
    pub const OPEN_CHANNEL: u8 = 0x4B;
    pub const CLOSE_CHANNEL: u8 = 0x4C;
    pub const BROADCAST_DATA: u8 = 0x4E;
    pub const CHANNEL_ID: u8 = 0x51;
    pub const OPEN_RX_SCAN_MODE: u8 = 0x5B;
    pub const ENABLE_EXTENDED_MESSAGES: u8 = 0x66;
    pub const STARTUP: u8 = 0x6F;
}

/// Message id carried by channel events (as opposed to command responses).
pub const RF_EVENT: u8 = 0x01;
const EXTENDED_FLAG_CHANNEL_ID: u8 = 0x80;

pub const RESPONSE_NO_ERROR: u8 = 0x00;
pub const EVENT_CHANNEL_CLOSED: u8 = 0x07;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(id: u8, payload: Vec<u8>) -> Self {
        Message { id, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.payload.len() + 4);
        frame.push(SYNC);
        frame.push(self.payload.len() as u8);
        frame.push(self.id);
        frame.extend_from_slice(&self.payload);
        frame.push(checksum(&frame));
        frame
    }

    pub fn reset_system() -> Self {
        Message::new(ids::RESET_SYSTEM, vec![0x00])
    }

    pub fn set_network_key(network: u8, key: &[u8; 8]) -> Self {
        let mut payload = vec![network];
        payload.extend_from_slice(key);
        Message::new(ids::NETWORK_KEY, payload)
    }

    pub fn assign_channel(channel: u8, channel_type: u8, network: u8) -> Self {
        Message::new(ids::ASSIGN_CHANNEL, vec![channel, channel_type, network])
    }

    pub fn unassign_channel(channel: u8) -> Self {
        Message::new(ids::UNASSIGN_CHANNEL, vec![channel])
    }

    pub fn set_channel_id(channel: u8, id: ChannelId) -> Self {
        let [lo, hi] = id.device_number.to_le_bytes();
        Message::new(
            ids::CHANNEL_ID,
            vec![channel, lo, hi, id.device_type, id.transmission_type],
        )
    }

    pub fn set_channel_period(channel: u8, period: u16) -> Self {
        let [lo, hi] = period.to_le_bytes();
        Message::new(ids::CHANNEL_PERIOD, vec![channel, lo, hi])
    }

    pub fn set_rf_frequency(channel: u8, frequency: u8) -> Self {
        Message::new(ids::CHANNEL_RF_FREQUENCY, vec![channel, frequency])
    }

    pub fn enable_extended_messages(enable: bool) -> Self {
        Message::new(ids::ENABLE_EXTENDED_MESSAGES, vec![0x00, enable as u8])
    }

    pub fn open_channel(channel: u8) -> Self {
        Message::new(ids::OPEN_CHANNEL, vec![channel])
    }

    pub fn open_rx_scan_mode() -> Self {
        Message::new(ids::OPEN_RX_SCAN_MODE, vec![0x00])
    }

    pub fn close_channel(channel: u8) -> Self {
        Message::new(ids::CLOSE_CHANNEL, vec![channel])
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// A message from the stick, classified by what the node has to do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Broadcast {
        channel: u8,
        page: [u8; 8],
        extended: Option<ChannelId>,
    },
    /// Reply to a command we sent.
    Response {
        channel: u8,
        message_id: u8,
        code: u8,
    },
    /// Unsolicited channel event (search timeout, channel closed, ...).
    Event { channel: u8, code: u8 },
    Startup,
}

impl Inbound {
    pub fn from_message(message: &Message) -> Option<Self> {
        let p = &message.payload;
        match message.id {
            ids::BROADCAST_DATA if p.len() >= 9 => {
                let mut page = [0u8; 8];
                page.copy_from_slice(&p[1..9]);
                let extended = match p.get(9) {
                    Some(flag) if flag & EXTENDED_FLAG_CHANNEL_ID != 0 && p.len() >= 14 => {
                        Some(ChannelId {
                            device_number: u16::from_le_bytes([p[10], p[11]]),
                            device_type: p[12],
                            transmission_type: p[13],
                        })
                    }
                    _ => None,
                };
                Some(Inbound::Broadcast {
                    channel: p[0],
                    page,
                    extended,
                })
            }
            ids::CHANNEL_RESPONSE if p.len() >= 3 => {
                if p[1] == RF_EVENT {
                    Some(Inbound::Event {
                        channel: p[0],
                        code: p[2],
                    })
                } else {
                    Some(Inbound::Response {
                        channel: p[0],
                        message_id: p[1],
                        code: p[2],
                    })
                }
            }
            ids::STARTUP => Some(Inbound::Startup),
            _ => None,
        }
    }
}

/// Reassembles frames from an arbitrary chunked byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete message, skipping garbage and frames with a bad checksum.
    pub fn next_message(&mut self) -> Option<Message> {
        loop {
            match self.buf.iter().position(|b| *b == SYNC) {
                Some(0) => {}
                Some(start) => {
                    trace!("Dropping {} bytes before sync", start);
                    self.buf.drain(..start);
                }
                None => {
                    self.buf.clear();
                    return None;
                }
            }

            if self.buf.len() < 2 {
                return None;
            }
            let len = self.buf[1] as usize;
            if len > MAX_PAYLOAD {
                warn!("Invalid ANT frame length {}", len);
                self.buf.drain(..1);
                continue;
            }
            let frame_len = len + 4;
            if self.buf.len() < frame_len {
                return None;
            }

            let frame: Vec<u8> = self.buf.drain(..frame_len).collect();
            if checksum(&frame[..frame_len - 1]) != frame[frame_len - 1] {
                warn!("Dropping ANT frame with bad checksum: {:02X?}", frame);
                continue;
            }
            return Some(Message::new(frame[2], frame[3..3 + len].to_vec()));
        }
    }
}
