use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{
    Json, Router,
    extract::{Form, State},
    response::Html,
    routing::{get, post},
};
use log::{error, info};
use serde_derive::{Deserialize, Serialize};

use super::DashboardState;
use super::process::{StartOutcome, StopOutcome};
use super::snapshot::read_snapshot;
use crate::messages::ThresholdConfig;
use crate::mqtt::Publisher;

const INDEX_HTML: &str = include_str!("index.html");
const MESSAGE_SLOT: &str = "<!-- message -->";

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PowerValue {
    pub value: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScriptStatus {
    pub status: &'static str,
    pub color: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct ControlForm {
    pub action: String,
    pub level0: Option<String>,
    pub level1: Option<String>,
    pub level2: Option<String>,
    pub level3: Option<String>,
    pub level4: Option<String>,
}

pub fn router<P>(state: Arc<DashboardState<P>>) -> Router
where
    P: Publisher + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(get_index::<P>))
        .route("/get_power", get(get_power::<P>))
        .route("/control", post(post_control::<P>))
        .route("/get_script_status", get(get_script_status::<P>))
        .with_state(state)
}

pub async fn run_api_server<P>(state: Arc<DashboardState<P>>, listen: &str) -> anyhow::Result<()>
where
    P: Publisher + Send + Sync + 'static,
{
    let addr = listen.parse::<SocketAddr>()?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening to {listen}");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(crate::shutdown_signal())
        .await?;
    Ok(())
}

pub async fn get_index<P>(State(state): State<Arc<DashboardState<P>>>) -> Html<String> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_index()");
    Html(render_index(None))
}

pub async fn get_power<P>(State(state): State<Arc<DashboardState<P>>>) -> Json<PowerValue> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_power()");

    Json(PowerValue {
        value: read_snapshot(&state.snapshot_path).await,
    })
}

pub async fn get_script_status<P>(
    State(state): State<Arc<DashboardState<P>>>,
) -> Json<ScriptStatus> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_script_status()");

    let status = if state.scanner.is_running() {
        ScriptStatus {
            status: "Running",
            color: "green",
        }
    } else {
        ScriptStatus {
            status: "Stopped",
            color: "red",
        }
    };
    Json(status)
}

pub async fn post_control<P: Publisher>(
    State(state): State<Arc<DashboardState<P>>>,
    Form(form): Form<ControlForm>,
) -> Html<String> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} post_control({})", form.action);

    let message = match form.action.as_str() {
        "start_monitoring" => match state.scanner.start().await {
            Ok(StartOutcome::Started(pid)) => format!("Monitoring started (pid {})", pid),
            Ok(StartOutcome::AlreadyRunning(pid)) => {
                format!("Monitoring already running (pid {})", pid)
            }
            Err(err) => {
                error!("Cannot start scanner: {}", err);
                format!("Could not start monitoring: {}", err)
            }
        },
        "stop_monitoring" => match state.scanner.stop().await {
            StopOutcome::Stopped => "Monitoring stopped".to_string(),
            StopOutcome::Signalled(n) => format!("Monitoring stopped ({} processes signalled)", n),
            StopOutcome::NotRunning => "Monitoring was not running".to_string(),
        },
        "change_threshold" => {
            let thresholds = ThresholdConfig::from_levels([
                form.level0,
                form.level1,
                form.level2,
                form.level3,
                form.level4,
            ]);
            if thresholds.is_empty() {
                "No threshold values submitted".to_string()
            } else {
                let sent_updates = super::publish_thresholds(
                    &state.publisher,
                    &state.control_topic_path,
                    &thresholds,
                )
                .await;
                format!("Updates sent: {}", sent_updates.join(" | "))
            }
        }
        other => format!("Unknown action {}", other),
    };

    Html(render_index(Some(&message)))
}

fn render_index(message: Option<&str>) -> String {
    match message {
        Some(message) => INDEX_HTML.replace(
            MESSAGE_SLOT,
            &format!("<p class=\"message\">{}</p>", escape_html(message)),
        ),
        None => INDEX_HTML.to_string(),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::dashboard::ScannerProcess;
    use crate::dashboard::process::tests::fake_proc;
    use crate::mqtt::tests::RecordingPublisher;

    const SCRIPT: &str = "/opt/ant/ant_monitor.py";

    fn state(proc_root: PathBuf, snapshot_path: PathBuf) -> Arc<DashboardState<RecordingPublisher>> {
        Arc::new(DashboardState::new(
            RecordingPublisher::default(),
            "fitness/control/powermeter".to_string(),
            snapshot_path,
            ScannerProcess::new(vec!["true".to_string()], SCRIPT.to_string(), proc_root),
        ))
    }

    fn no_snapshot() -> PathBuf {
        std::env::temp_dir().join("ant-dashboard-server-no-snapshot.txt")
    }

    #[tokio::test]
    async fn test_script_status_running() {
        let root = fake_proc("status-running", &[(4321, "python3 /opt/ant/ant_monitor.py")]);
        let Json(status) = get_script_status(State(state(root.clone(), no_snapshot()))).await;
        std::fs::remove_dir_all(&root).unwrap();
        assert_eq!(
            status,
            ScriptStatus {
                status: "Running",
                color: "green"
            }
        );
    }

    #[tokio::test]
    async fn test_script_status_stopped() {
        let root = fake_proc("status-stopped", &[(4321, "python3 other.py")]);
        let Json(status) = get_script_status(State(state(root.clone(), no_snapshot()))).await;
        std::fs::remove_dir_all(&root).unwrap();
        assert_eq!(
            status,
            ScriptStatus {
                status: "Stopped",
                color: "red"
            }
        );
    }

    #[tokio::test]
    async fn test_get_power_reads_snapshot() {
        let root = fake_proc("power", &[]);
        let Json(power) = get_power(State(state(root.clone(), no_snapshot()))).await;
        assert_eq!(power.value, "Waiting...");

        let snapshot = root.join("powermeter.txt");
        std::fs::write(&snapshot, "243\n").unwrap();
        let Json(power) = get_power(State(state(root.clone(), snapshot))).await;
        std::fs::remove_dir_all(&root).unwrap();
        assert_eq!(power.value, "243");
    }

    #[tokio::test]
    async fn test_change_threshold_publishes_given_levels() {
        let root = fake_proc("threshold", &[]);
        let state = state(root.clone(), no_snapshot());
        let form = ControlForm {
            action: "change_threshold".to_string(),
            level0: Some(String::new()),
            level1: Some("150".to_string()),
            ..Default::default()
        };

        let Html(body) = post_control(State(state.clone()), Form(form)).await;
        std::fs::remove_dir_all(&root).unwrap();

        assert!(body.contains("Updates sent: level1 -&gt; 150"));
        let published = state.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "fitness/control/powermeter/level1");
        assert_eq!(published[0].payload, "150");
        assert!(published[0].retain);
    }

    #[tokio::test]
    async fn test_stop_without_scanner() {
        let root = fake_proc("stop", &[(99, "bash")]);
        let form = ControlForm {
            action: "stop_monitoring".to_string(),
            ..Default::default()
        };
        let Html(body) = post_control(State(state(root.clone(), no_snapshot())), Form(form)).await;
        std::fs::remove_dir_all(&root).unwrap();
        assert!(body.contains("Monitoring was not running"));
    }

    #[test]
    fn test_render_index_escapes_message() {
        let page = render_index(Some("<b>"));
        assert!(page.contains("<p class=\"message\">&lt;b&gt;</p>"));
        assert!(!render_index(None).contains("class=\"message\""));
    }
}
