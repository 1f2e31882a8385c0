use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// One decoded instantaneous power reading, on its way to the broker.
#[derive(Clone, Debug)]
pub struct PowerSample {
    pub instantaneous_power: u16,
    pub source_device_id: u16,
    pub observed_at: SystemTime,
}

impl PowerSample {
    pub fn new(source_device_id: u16, instantaneous_power: u16) -> Self {
        PowerSample {
            instantaneous_power,
            source_device_id,
            observed_at: SystemTime::now(),
        }
    }

    /// Bare decimal watts, as consumed downstream.
    pub fn payload(&self) -> String {
        self.instantaneous_power.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThresholdLevel {
    Level0,
    Level1,
    Level2,
    Level3,
    Level4,
}

impl ThresholdLevel {
    pub const ALL: [ThresholdLevel; 5] = [
        ThresholdLevel::Level0,
        ThresholdLevel::Level1,
        ThresholdLevel::Level2,
        ThresholdLevel::Level3,
        ThresholdLevel::Level4,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ThresholdLevel::Level0 => "level0",
            ThresholdLevel::Level1 => "level1",
            ThresholdLevel::Level2 => "level2",
            ThresholdLevel::Level3 => "level3",
            ThresholdLevel::Level4 => "level4",
        }
    }

    pub fn topic(&self, topic_path: &str) -> String {
        format!("{}/{}", topic_path, self.name())
    }
}

impl fmt::Display for ThresholdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Threshold values submitted from the dashboard. Blank levels are absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThresholdConfig {
    values: BTreeMap<ThresholdLevel, String>,
}

impl ThresholdConfig {
    pub fn from_levels(levels: [Option<String>; 5]) -> Self {
        let values = ThresholdLevel::ALL
            .into_iter()
            .zip(levels)
            .filter_map(|(level, value)| {
                let value = value?.trim().to_string();
                (!value.is_empty()).then_some((level, value))
            })
            .collect();
        ThresholdConfig { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThresholdLevel, &str)> {
        self.values.iter().map(|(level, value)| (*level, value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_sample_payload() {
        assert_eq!(PowerSample::new(12345, 250).payload(), "250");
        assert_eq!(PowerSample::new(1, 0).payload(), "0");
    }

    #[test]
    fn test_threshold_skips_blank_levels() {
        let config = ThresholdConfig::from_levels([
            Some(String::new()),
            Some("150".to_string()),
            None,
            Some("  ".to_string()),
            None,
        ]);
        let values: Vec<_> = config.iter().collect();
        assert_eq!(values, vec![(ThresholdLevel::Level1, "150")]);
    }

    #[test]
    fn test_threshold_topic() {
        assert_eq!(
            ThresholdLevel::Level3.topic("fitness/control/powermeter"),
            "fitness/control/powermeter/level3"
        );
    }
}
