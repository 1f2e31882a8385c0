use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use tokio::sync::mpsc;

use crate::mqtt::MqttMessage;

/// Shown until the first reading has been written.
pub const NO_READING: &str = "Waiting...";

pub async fn read_snapshot(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(value) => value.trim().to_string(),
        Err(err) if err.kind() == ErrorKind::NotFound => NO_READING.to_string(),
        Err(err) => {
            error!("Cannot read power snapshot {}: {}", path.display(), err);
            NO_READING.to_string()
        }
    }
}

pub async fn write_snapshot(path: &Path, value: &str) -> std::io::Result<()> {
    tokio::fs::write(path, value).await
}

/// Stores the payload of every power message as the latest reading.
pub async fn run_snapshot_writer(mut rx: mpsc::Receiver<MqttMessage>, path: PathBuf) {
    info!("Writing power readings to {}", path.display());
    while let Some(message) = rx.recv().await {
        debug!("Power reading {} from {}", message.payload, message.topic);
        if let Err(err) = write_snapshot(&path, &message.payload).await {
            error!("Cannot write power snapshot {}: {}", path.display(), err);
        }
    }
    debug!("Power reading channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_snapshot_reads_as_waiting() {
        let path = std::env::temp_dir().join("ant-dashboard-no-such-snapshot.txt");
        assert_eq!(read_snapshot(&path).await, NO_READING);
    }

    #[tokio::test]
    async fn test_writer_keeps_last_value() {
        let path = std::env::temp_dir().join(format!(
            "ant-dashboard-snapshot-{}.txt",
            std::process::id()
        ));
        let (tx, rx) = mpsc::channel(4);
        for value in ["180", "215"] {
            tx.send(MqttMessage {
                topic: "fitness/powermeter".to_string(),
                payload: value.to_string(),
            })
            .await
            .unwrap();
        }
        drop(tx);

        run_snapshot_writer(rx, path.clone()).await;

        assert_eq!(read_snapshot(&path).await, "215");
        std::fs::remove_file(&path).unwrap();
    }
}
