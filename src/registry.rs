use std::path::Path;

use log::{debug, info, warn};
use serde_derive::Serialize;

use crate::ant::{ChannelId, DeviceType, Node};
use crate::error::SessionError;

/// Hardware channel budget for auto-created devices.
pub const MAX_DEVICES: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub struct DeviceHandle {
    pub id: u16,
    #[serde(serialize_with = "serialize_device_type")]
    pub device_type: DeviceType,
    pub transmission_type: u8,
    #[serde(skip)]
    pub channel: u8,
    #[serde(skip)]
    open: bool,
}

fn serialize_device_type<S: serde::Serializer>(
    device_type: &DeviceType,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*device_type))
}

impl DeviceHandle {
    pub fn new(id: ChannelId, channel: u8) -> Self {
        DeviceHandle {
            id: id.device_number,
            device_type: id.device_type(),
            transmission_type: id.transmission_type,
            channel,
            open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Releases the channel. Later calls are no-ops.
    pub fn close_channel<N: Node>(&mut self, node: &mut N) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = node.close_channel(self.channel) {
            warn!(
                "Error closing channel {} of device #{}: {}",
                self.channel, self.id, err
            );
        }
    }
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Vec<DeviceHandle>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry {
            entries: Vec::with_capacity(MAX_DEVICES),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_DEVICES
    }

    pub fn contains(&self, id: u16) -> bool {
        self.find_by_id(id).is_some()
    }

    /// Adds a handle unless the registry is full or already knows the id.
    pub fn insert(&mut self, handle: DeviceHandle) -> bool {
        if self.is_full() {
            warn!(
                "Device registry full ({} devices), ignoring device #{}",
                MAX_DEVICES, handle.id
            );
            return false;
        }
        if self.contains(handle.id) {
            debug!("Device #{} already registered", handle.id);
            return false;
        }
        self.entries.push(handle);
        true
    }

    pub fn find_by_id(&self, id: u16) -> Option<&DeviceHandle> {
        self.entries.iter().find(|d| d.id == id)
    }

    pub fn find_by_channel(&self, channel: u8) -> Option<&DeviceHandle> {
        self.entries.iter().find(|d| d.open && d.channel == channel)
    }

    pub fn entries(&self) -> &[DeviceHandle] {
        &self.entries
    }

    pub fn close_all<N: Node>(&mut self, node: &mut N) {
        for device in self.entries.iter_mut() {
            device.close_channel(node);
        }
    }

    pub fn persist(&self, path: &Path) -> Result<(), SessionError> {
        info!(
            "Saving {} found devices to {}",
            self.entries.len(),
            path.display()
        );
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, json).map_err(|source| SessionError::Persist {
            path: path.to_path_buf(),
            source,
        })
    }
}
