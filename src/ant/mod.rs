//! ANT+ link layer: the node abstraction the scanner session drives, the
//! serial framing spoken by USB sticks, and the per-profile page decoders.

use std::fmt;

use serde_derive::{Deserialize, Serialize};

use crate::error::AntError;

pub mod message;
pub mod profile;
pub mod serial;

pub use profile::{CommonPage, DeviceData, PageDecoder, PowerData};
pub use serial::SerialNode;

pub const ANTPLUS_NETWORK_KEY: [u8; 8] = [0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45];
pub const ANTPLUS_RF_FREQUENCY: u8 = 57;

/// Bidirectional receive (slave) channel.
pub const CHANNEL_TYPE_RECEIVE: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    PowerMeter,
    FitnessEquipment,
    HeartRate,
    BikeSpeedCadence,
    BikeCadence,
    BikeSpeed,
    StrideSpeedDistance,
    Unknown(u8),
}

impl From<u8> for DeviceType {
    fn from(value: u8) -> Self {
        // Bit 7 is the pairing bit and not part of the type.
        match value & 0x7F {
            11 => DeviceType::PowerMeter,
            17 => DeviceType::FitnessEquipment,
            120 => DeviceType::HeartRate,
            121 => DeviceType::BikeSpeedCadence,
            122 => DeviceType::BikeCadence,
            123 => DeviceType::BikeSpeed,
            124 => DeviceType::StrideSpeedDistance,
            other => DeviceType::Unknown(other),
        }
    }
}

impl From<DeviceType> for u8 {
    fn from(value: DeviceType) -> Self {
        match value {
            DeviceType::PowerMeter => 11,
            DeviceType::FitnessEquipment => 17,
            DeviceType::HeartRate => 120,
            DeviceType::BikeSpeedCadence => 121,
            DeviceType::BikeCadence => 122,
            DeviceType::BikeSpeed => 123,
            DeviceType::StrideSpeedDistance => 124,
            DeviceType::Unknown(other) => other,
        }
    }
}

impl DeviceType {
    /// Message period in 1/32768 s counts for the device profile.
    pub fn channel_period(&self) -> u16 {
        match self {
            DeviceType::PowerMeter => 8182,
            DeviceType::FitnessEquipment => 8192,
            DeviceType::HeartRate => 8070,
            DeviceType::BikeSpeedCadence => 8086,
            DeviceType::BikeCadence => 8102,
            DeviceType::BikeSpeed => 8118,
            DeviceType::StrideSpeedDistance => 8134,
            DeviceType::Unknown(_) => 8192,
        }
    }

    /// Decoder for the profile's data pages, if this crate understands it.
    pub fn decoder(&self) -> Option<&'static dyn PageDecoder> {
        match self {
            DeviceType::PowerMeter => Some(&profile::PowerMeterDecoder),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Unknown(value) => write!(f, "Unknown({})", value),
            other => write!(f, "{:?}", other),
        }
    }
}

/// The `(device number, device type, transmission type)` triple identifying a
/// transmitter. Zero fields act as wildcards when used as a search filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelId {
    pub device_number: u16,
    pub device_type: u8,
    pub transmission_type: u8,
}

impl ChannelId {
    pub fn device_type(&self) -> DeviceType {
        DeviceType::from(self.device_type)
    }

    pub fn matches(&self, filter: &ChannelId) -> bool {
        (filter.device_number == 0 || filter.device_number == self.device_number)
            && (filter.device_type == 0 || filter.device_type & 0x7F == self.device_type & 0x7F)
            && (filter.transmission_type == 0
                || filter.transmission_type == self.transmission_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// One 8 byte data page received on `channel`. Scan-channel broadcasts
    /// carry the transmitter's id as extended data.
    Broadcast {
        channel: u8,
        page: [u8; 8],
        extended: Option<ChannelId>,
    },
    ChannelClosed(u8),
}

/// A hardware transceiver able to open logical channels to sensors.
///
/// Events are delivered on the receiver handed out when the node is opened;
/// the stream ends when the link goes away.
pub trait Node {
    fn set_network_key(&mut self, network: u8, key: &[u8; 8]) -> Result<(), AntError>;

    /// Opens the continuous scan channel, returning its channel number.
    fn open_scan_channel(&mut self, filter: ChannelId) -> Result<u8, AntError>;

    /// Opens a dedicated receive channel to one transmitter.
    fn open_channel(&mut self, id: ChannelId) -> Result<u8, AntError>;

    fn close_channel(&mut self, channel: u8) -> Result<(), AntError>;

    /// Releases the transceiver. Called once at the end of a session.
    fn stop(&mut self);
}

impl<T: Node + ?Sized> Node for &mut T {
    fn set_network_key(&mut self, network: u8, key: &[u8; 8]) -> Result<(), AntError> {
        (**self).set_network_key(network, key)
    }

    fn open_scan_channel(&mut self, filter: ChannelId) -> Result<u8, AntError> {
        (**self).open_scan_channel(filter)
    }

    fn open_channel(&mut self, id: ChannelId) -> Result<u8, AntError> {
        (**self).open_channel(id)
    }

    fn close_channel(&mut self, channel: u8) -> Result<(), AntError> {
        (**self).close_channel(channel)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}
