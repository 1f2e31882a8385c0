use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ant_monitor_rs::config::AppConfig;
use ant_monitor_rs::dashboard::{self, DashboardState, ScannerProcess};
use ant_monitor_rs::mqtt::MqttClient;
use clap::Parser;
use log::{info, warn};
use tokio::sync::mpsc;

/// Web dashboard for the ANT+ power monitor.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Address to listen on, overrides `dashboard.listen`.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)?;
    let settings = config.dashboard();

    let (mqtt_client, mut eventloop) = MqttClient::new(&config.mqtt, "ant-dashboard");
    let mqtt_client = mqtt_client.with_subscriptions(vec![config.mqtt.power_topic()]);

    let (tx, rx) = mpsc::channel(16);
    let mqtt_task = {
        let client = mqtt_client.clone();
        tokio::spawn(async move { client.event_loop(&mut eventloop, Some(tx)).await })
    };
    let snapshot_task = tokio::spawn(dashboard::snapshot::run_snapshot_writer(
        rx,
        settings.snapshot_path(),
    ));

    let scanner = ScannerProcess::new(
        settings.scanner_command(),
        settings.script_path(),
        settings.proc_root(),
    );
    let state = Arc::new(DashboardState::new(
        mqtt_client.clone(),
        config.mqtt.control_topic_path(),
        settings.snapshot_path(),
        scanner,
    ));

    let listen = args.listen.unwrap_or_else(|| settings.listen());
    dashboard::run_api_server(state, &listen).await?;

    info!("Dashboard shutting down");
    if let Err(err) = mqtt_client.disconnect().await {
        warn!("Error disconnecting from MQTT broker: {}", err);
    }
    if tokio::time::timeout(Duration::from_secs(2), mqtt_task)
        .await
        .is_err()
    {
        warn!("MQTT event loop did not stop in time");
    }
    snapshot_task.abort();

    Ok(())
}
