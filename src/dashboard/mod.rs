//! Web control surface: shows the latest power reading, starts and stops the
//! scanner process, and publishes retained threshold levels.

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;

use log::{info, warn};

use crate::messages::ThresholdConfig;
use crate::mqtt::Publisher;

pub mod process;
pub mod server;
pub mod snapshot;

pub use process::ScannerProcess;
pub use server::run_api_server;

pub struct DashboardState<P> {
    pub api_cnt: AtomicU64,
    pub publisher: P,
    pub control_topic_path: String,
    pub snapshot_path: PathBuf,
    pub scanner: ScannerProcess,
}

impl<P: Publisher> DashboardState<P> {
    pub fn new(
        publisher: P,
        control_topic_path: String,
        snapshot_path: PathBuf,
        scanner: ScannerProcess,
    ) -> Self {
        DashboardState {
            api_cnt: AtomicU64::new(0),
            publisher,
            control_topic_path,
            snapshot_path,
            scanner,
        }
    }
}

/// Publishes every submitted level as a retained message and returns one
/// human readable line per level.
pub async fn publish_thresholds<P: Publisher>(
    publisher: &P,
    topic_path: &str,
    thresholds: &ThresholdConfig,
) -> Vec<String> {
    let mut sent_updates = Vec::new();
    for (level, value) in thresholds.iter() {
        if value.parse::<f64>().is_err() {
            warn!("Rejecting non-numeric threshold {}={:?}", level, value);
            sent_updates.push(format!("Error updating {}: {} is not a number", level, value));
            continue;
        }
        let topic = level.topic(topic_path);
        match publisher.publish(&topic, value.to_string(), true).await {
            Ok(()) => {
                info!("Threshold {} -> {} published on {}", level, value, topic);
                sent_updates.push(format!("{} -> {}", level, value));
            }
            Err(err) => {
                warn!("{}", err);
                sent_updates.push(format!("Error updating {}: {}", level, err));
            }
        }
    }
    sent_updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::tests::{Published, RecordingPublisher};

    fn levels(values: [&str; 5]) -> ThresholdConfig {
        ThresholdConfig::from_levels(values.map(|v| Some(v.to_string())))
    }

    #[tokio::test]
    async fn test_single_level_is_published_retained() {
        let publisher = RecordingPublisher::default();
        let summary = publish_thresholds(
            &publisher,
            "fitness/control/powermeter",
            &levels(["", "150", "", "", ""]),
        )
        .await;

        assert_eq!(summary, vec!["level1 -> 150"]);
        assert_eq!(
            publisher.published(),
            vec![Published {
                topic: "fitness/control/powermeter/level1".to_string(),
                payload: "150".to_string(),
                retain: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_invalid_and_failing_levels_are_reported() {
        let publisher = RecordingPublisher {
            failing: vec!["fitness/control/powermeter/level4".to_string()],
            ..Default::default()
        };
        let summary = publish_thresholds(
            &publisher,
            "fitness/control/powermeter",
            &levels(["100", "abc", "", "250.5", "300"]),
        )
        .await;

        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0], "level0 -> 100");
        assert_eq!(summary[1], "Error updating level1: abc is not a number");
        assert_eq!(summary[2], "level3 -> 250.5");
        assert!(summary[3].starts_with("Error updating level4"));
        let topics: Vec<_> = publisher.published().into_iter().map(|p| p.topic).collect();
        assert_eq!(
            topics,
            vec![
                "fitness/control/powermeter/level0",
                "fitness/control/powermeter/level3"
            ]
        );
    }
}
