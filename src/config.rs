use std::path::{Path, PathBuf};

use serde_derive::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_POWER_TOPIC: &str = "fitness/powermeter";
pub const DEFAULT_CONTROL_TOPIC_PATH: &str = "fitness/control/powermeter";

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub ant: Option<AntConfig>,
    pub scan: Option<ScanConfig>,
    pub dashboard: Option<DashboardConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::de::from_str(contents)?)
    }

    pub fn ant(&self) -> AntConfig {
        self.ant.clone().unwrap_or_default()
    }

    pub fn scan(&self) -> ScanConfig {
        self.scan.clone().unwrap_or_default()
    }

    pub fn dashboard(&self) -> DashboardConfig {
        self.dashboard.clone().unwrap_or_default()
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub keep_alive_seconds: Option<u64>,
    /// Topic the scanner publishes instantaneous power to.
    pub power_topic: Option<String>,
    /// Prefix for the retained `level0..level4` threshold topics.
    pub control_topic_path: Option<String>,
}

impl MqttConfig {
    pub fn power_topic(&self) -> String {
        self.power_topic
            .clone()
            .unwrap_or(DEFAULT_POWER_TOPIC.to_string())
    }

    pub fn control_topic_path(&self) -> String {
        self.control_topic_path
            .clone()
            .unwrap_or(DEFAULT_CONTROL_TOPIC_PATH.to_string())
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AntConfig {
    /// Serial device of the ANT USB stick.
    pub device: Option<PathBuf>,
    /// USB2 and USB-m sticks talk at 115200 baud, older AP2 modules at 57600.
    pub baud_rate: Option<u32>,
    pub response_timeout_ms: Option<u64>,
}

impl AntConfig {
    pub fn device(&self) -> PathBuf {
        self.device
            .clone()
            .unwrap_or_else(|| PathBuf::from("/dev/ttyUSB0"))
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.unwrap_or(115_200)
    }

    pub fn response_timeout_ms(&self) -> u64 {
        self.response_timeout_ms.unwrap_or(500)
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub device_id: Option<u16>,
    pub device_type: Option<u8>,
    pub auto_create: Option<bool>,
    pub persist_path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct DashboardConfig {
    pub listen: Option<String>,
    pub snapshot_path: Option<PathBuf>,
    /// Program launched by `start_monitoring`.
    pub scanner_command: Option<Vec<String>>,
    /// Command-line fragment identifying a running scanner in the process table.
    pub script_path: Option<String>,
    pub proc_root: Option<PathBuf>,
}

impl DashboardConfig {
    pub fn listen(&self) -> String {
        self.listen.clone().unwrap_or("0.0.0.0:5000".to_string())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("powermeter.txt"))
    }

    pub fn scanner_command(&self) -> Vec<String> {
        self.scanner_command
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| vec!["ant-monitor".to_string()])
    }

    pub fn script_path(&self) -> String {
        self.script_path.clone().unwrap_or("ant-monitor".to_string())
    }

    pub fn proc_root(&self) -> PathBuf {
        self.proc_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("/proc"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            [mqtt]
            host = "10.0.0.78"
            port = 1883
            username = "user"
            password = "pass"

            [scan]
            device_id = 12345
            auto_create = false
            persist_path = "devices.json"

            [dashboard]
            scanner_command = ["/usr/local/bin/ant-monitor", "--config", "/etc/ant.toml"]
            script_path = "/usr/local/bin/ant-monitor"
        "#;
        let config = AppConfig::parse(config_str).unwrap();
        assert_eq!(config.mqtt.host, "10.0.0.78");
        assert_eq!(config.mqtt.power_topic(), "fitness/powermeter");
        assert_eq!(config.scan().device_id, Some(12345));
        assert_eq!(config.scan().auto_create, Some(false));
        assert_eq!(config.dashboard().scanner_command().len(), 3);
        assert_eq!(config.dashboard().listen(), "0.0.0.0:5000");
    }

    #[test]
    fn test_defaults_without_optional_sections() {
        let config = AppConfig::parse("[mqtt]\nhost = \"localhost\"\n").unwrap();
        assert_eq!(config.ant().device(), PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(config.ant().baud_rate(), 115_200);
        assert_eq!(
            config.mqtt.control_topic_path(),
            "fitness/control/powermeter"
        );
        assert_eq!(
            config.dashboard().snapshot_path(),
            PathBuf::from("powermeter.txt")
        );
        assert!(config.scan().persist_path.is_none());
    }

    #[test]
    fn test_missing_mqtt_section() {
        assert!(AppConfig::parse("[scan]\ndevice_id = 1\n").is_err());
    }
}
