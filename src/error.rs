use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AntError {
    #[error("No ANT transceiver reachable at {path}: {source}")]
    HardwareUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Channel {channel} rejected message 0x{message_id:02X} with code 0x{code:02X}")]
    Channel {
        channel: u8,
        message_id: u8,
        code: u8,
    },

    #[error("No free ANT channel left")]
    NoFreeChannel,

    #[error("Timed out waiting for response to message 0x{message_id:02X} on channel {channel}")]
    ResponseTimeout { channel: u8, message_id: u8 },

    #[error("ANT link closed")]
    LinkClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Failed to publish to {topic}: {reason}")]
    PublishFailed { topic: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Could not auto create device #{device_id}: {source}")]
    AutoCreateFailed { device_id: u16, source: AntError },

    #[error(transparent)]
    Ant(#[from] AntError),

    #[error("Failed to save devices to {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] toml::de::Error),
}
