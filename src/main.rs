use std::path::PathBuf;
use std::time::Duration;

use ant_monitor_rs::ant::{ChannelId, SerialNode};
use ant_monitor_rs::config::AppConfig;
use ant_monitor_rs::mqtt::MqttClient;
use ant_monitor_rs::session::{Session, SessionOptions};
use clap::Parser;
use futures::executor::block_on;
use log::{error, info, warn};
use tokio::sync::oneshot;

/// Forward ANT+ power meter readings to MQTT.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Only listen to this device number (0 = any).
    #[arg(long)]
    device_id: Option<u16>,

    /// Only listen to this ANT+ device type (0 = any).
    #[arg(long)]
    device_type: Option<u8>,

    /// Log discovered devices without opening channels to them.
    #[arg(long)]
    no_auto_create: bool,

    /// Save the devices found during the session to this file on exit.
    #[arg(long)]
    persist: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)?;
    let scan = config.scan();
    let options = SessionOptions {
        filter: ChannelId {
            device_number: args.device_id.or(scan.device_id).unwrap_or(0),
            device_type: args.device_type.or(scan.device_type).unwrap_or(0),
            transmission_type: 0,
        },
        auto_create: !args.no_auto_create && scan.auto_create.unwrap_or(true),
        persist_path: args.persist.or(scan.persist_path),
        power_topic: config.mqtt.power_topic(),
    };

    let (mqtt_client, mut eventloop) = MqttClient::new(&config.mqtt, "ant-monitor");
    let mqtt_task = {
        let client = mqtt_client.clone();
        tokio::spawn(async move { client.event_loop(&mut eventloop, None).await })
    };

    let ant = config.ant();
    let (node, events) = SerialNode::open(
        &ant.device(),
        ant.baud_rate(),
        Duration::from_millis(ant.response_timeout_ms()),
    )?;

    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(async move {
        ant_monitor_rs::shutdown_signal().await;
        let _ = stop_tx.send(());
    });

    // Node commands block on the stick's responses, so the session gets its own thread.
    let session = Session::new(node, mqtt_client.clone(), options);
    let result = tokio::task::spawn_blocking(move || block_on(session.run(events, stop_rx))).await?;

    match &result {
        Ok(report) => info!(
            "Session finished: {} devices found, {} created, {} samples published, {} dropped",
            report.devices_found,
            report.devices_created,
            report.samples_published,
            report.samples_dropped
        ),
        Err(err) => error!("Session failed: {}", err),
    }

    if let Err(err) = mqtt_client.disconnect().await {
        warn!("Error disconnecting from MQTT broker: {}", err);
    }
    if tokio::time::timeout(Duration::from_secs(2), mqtt_task)
        .await
        .is_err()
    {
        warn!("MQTT event loop did not stop in time");
    }

    result?;
    Ok(())
}
