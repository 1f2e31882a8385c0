use std::fmt;

pub const PAGE_POWER_ONLY: u8 = 0x10;
pub const PAGE_MANUFACTURER_INFO: u8 = 0x50;
pub const PAGE_PRODUCT_INFO: u8 = 0x51;
pub const PAGE_BATTERY_STATUS: u8 = 0x52;

const NOT_USED: u8 = 0xFF;

/// Standard power-only page of the bicycle power profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerData {
    pub event_count: u8,
    /// Right pedal contribution in percent, when the sensor reports it.
    pub pedal_power: Option<u8>,
    pub cadence: Option<u8>,
    pub accumulated_power: u16,
    pub instantaneous_power: u16,
}

impl fmt::Display for PowerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} W (event {}, accumulated {} W",
            self.instantaneous_power, self.event_count, self.accumulated_power
        )?;
        if let Some(cadence) = self.cadence {
            write!(f, ", cadence {} rpm", cadence)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommonPage {
    ManufacturerInfo {
        hw_revision: u8,
        manufacturer_id: u16,
        model_number: u16,
    },
    ProductInfo {
        sw_revision: u8,
        serial_number: u32,
    },
    BatteryStatus {
        status: u8,
        voltage: Option<f32>,
    },
}

impl CommonPage {
    pub fn parse(page: &[u8; 8]) -> Option<Self> {
        match page[0] {
            PAGE_MANUFACTURER_INFO => Some(CommonPage::ManufacturerInfo {
                hw_revision: page[3],
                manufacturer_id: u16::from_le_bytes([page[4], page[5]]),
                model_number: u16::from_le_bytes([page[6], page[7]]),
            }),
            PAGE_PRODUCT_INFO => Some(CommonPage::ProductInfo {
                sw_revision: page[3],
                serial_number: u32::from_le_bytes([page[4], page[5], page[6], page[7]]),
            }),
            PAGE_BATTERY_STATUS => {
                let coarse = page[7] & 0x0F;
                let voltage = (coarse != 0x0F).then(|| coarse as f32 + page[6] as f32 / 256.0);
                Some(CommonPage::BatteryStatus {
                    status: (page[7] >> 4) & 0x07,
                    voltage,
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceData {
    Power(PowerData),
    Common(CommonPage),
    /// A page this decoder does not interpret.
    Other { page_number: u8 },
}

impl DeviceData {
    pub fn page_name(&self) -> &'static str {
        match self {
            DeviceData::Power(_) => "power_only",
            DeviceData::Common(CommonPage::ManufacturerInfo { .. }) => "manufacturer_info",
            DeviceData::Common(CommonPage::ProductInfo { .. }) => "product_info",
            DeviceData::Common(CommonPage::BatteryStatus { .. }) => "battery_status",
            DeviceData::Other { .. } => "other",
        }
    }
}

/// Turns broadcast pages of one device profile into typed data.
pub trait PageDecoder: Sync {
    fn decode(&self, page: &[u8; 8]) -> DeviceData;
}

pub struct PowerMeterDecoder;

impl PageDecoder for PowerMeterDecoder {
    fn decode(&self, page: &[u8; 8]) -> DeviceData {
        match page[0] {
            PAGE_POWER_ONLY => DeviceData::Power(PowerData {
                event_count: page[1],
                pedal_power: (page[2] != NOT_USED).then_some(page[2] & 0x7F),
                cadence: (page[3] != NOT_USED).then_some(page[3]),
                accumulated_power: u16::from_le_bytes([page[4], page[5]]),
                instantaneous_power: u16::from_le_bytes([page[6], page[7]]),
            }),
            page_number => match CommonPage::parse(page) {
                Some(common) => DeviceData::Common(common),
                None => DeviceData::Other { page_number },
            },
        }
    }
}
