use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(u32),
    AlreadyRunning(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The child this dashboard launched was terminated.
    Stopped,
    /// Scanner processes found in the process table were signalled.
    Signalled(usize),
    NotRunning,
}

/// Launches and terminates the scanner as a child process.
pub struct ScannerProcess {
    command: Vec<String>,
    script_path: String,
    proc_root: PathBuf,
    child: Mutex<Option<Child>>,
}

impl ScannerProcess {
    pub fn new(command: Vec<String>, script_path: String, proc_root: PathBuf) -> Self {
        ScannerProcess {
            command,
            script_path,
            proc_root,
            child: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> std::io::Result<StartOutcome> {
        let mut slot = self.child.lock().await;
        if let Some(child) = slot.as_mut() {
            if let (Ok(None), Some(pid)) = (child.try_wait(), child.id()) {
                return Ok(StartOutcome::AlreadyRunning(pid));
            }
        }

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // own process group, so terminal signals to the dashboard do not reach it
            .process_group(0)
            .spawn()?;
        let pid = child.id().unwrap_or_default();
        info!("Started scanner {:?} with pid {}", self.command, pid);
        *slot = Some(child);
        Ok(StartOutcome::Started(pid))
    }

    /// SIGTERM lets the scanner close its channels before exiting.
    pub async fn stop(&self) -> StopOutcome {
        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            if let (Ok(None), Some(pid)) = (child.try_wait(), child.id()) {
                terminate(pid as i32);
                match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                    Ok(Ok(status)) => info!("Scanner {} exited with {}", pid, status),
                    Ok(Err(err)) => warn!("Error waiting for scanner {}: {}", pid, err),
                    Err(_) => {
                        warn!("Scanner {} ignored SIGTERM, killing it", pid);
                        if let Err(err) = child.kill().await {
                            warn!("Error killing scanner {}: {}", pid, err);
                        }
                    }
                }
                return StopOutcome::Stopped;
            }
        }
        drop(slot);

        // Not ours: fall back to whatever matches in the process table.
        let pids = self.scanner_pids();
        if pids.is_empty() {
            return StopOutcome::NotRunning;
        }
        for pid in &pids {
            terminate(*pid);
        }
        StopOutcome::Signalled(pids.len())
    }

    pub fn is_running(&self) -> bool {
        !self.scanner_pids().is_empty()
    }

    /// Matching processes other than the dashboard itself.
    fn scanner_pids(&self) -> Vec<i32> {
        let own = std::process::id() as i32;
        find_processes(&self.proc_root, &self.script_path)
            .into_iter()
            .filter(|pid| *pid != own)
            .collect()
    }
}

fn terminate(pid: i32) {
    debug!("Sending SIGTERM to {}", pid);
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!("Could not signal process {}: {}", pid, err);
    }
}

/// Pids whose command line has an argument containing `needle`.
/// Processes that vanish or cannot be read while scanning are skipped.
pub fn find_processes(proc_root: &Path, needle: &str) -> Vec<i32> {
    let entries = match std::fs::read_dir(proc_root) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Cannot read process table {}: {}", proc_root.display(), err);
            return Vec::new();
        }
    };

    let mut pids: Vec<i32> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let pid = entry.file_name().to_str()?.parse::<i32>().ok()?;
            let cmdline = std::fs::read(entry.path().join("cmdline")).ok()?;
            cmdline
                .split(|b| *b == 0)
                .any(|arg| String::from_utf8_lossy(arg).contains(needle))
                .then_some(pid)
        })
        .collect();
    pids.sort_unstable();
    pids
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a fake `/proc` with the given `(pid, space separated argv)` entries.
    pub fn fake_proc(name: &str, processes: &[(i32, &str)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("ant-dashboard-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("self")).unwrap();
        for (pid, argv) in processes {
            let dir = root.join(pid.to_string());
            std::fs::create_dir_all(&dir).unwrap();
            let mut cmdline = argv.split(' ').collect::<Vec<_>>().join("\0");
            cmdline.push('\0');
            std::fs::write(dir.join("cmdline"), cmdline).unwrap();
        }
        root
    }

    #[test]
    fn test_find_processes_matches_any_argument() {
        let root = fake_proc(
            "find",
            &[
                (101, "python3 /opt/ant/ant_monitor.py"),
                (7, "bash"),
                (55, "/usr/bin/ant-monitor --config x.toml"),
            ],
        );
        assert_eq!(find_processes(&root, "ant_monitor.py"), vec![101]);
        assert_eq!(find_processes(&root, "ant"), vec![55, 101]);
        assert!(find_processes(&root, "nothing").is_empty());
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_process_table() {
        let root = std::env::temp_dir().join("ant-dashboard-does-not-exist");
        assert!(find_processes(&root, "ant").is_empty());
    }

    #[tokio::test]
    async fn test_dashboard_own_process_is_not_a_scanner() {
        let own = std::process::id() as i32;
        let root = fake_proc(
            "own-pid",
            &[(own, "/opt/ant-monitor-rs/bin/ant-dashboard --config x.toml")],
        );
        let scanner = ScannerProcess::new(
            vec!["true".to_string()],
            "ant-monitor".to_string(),
            root.clone(),
        );

        assert_eq!(find_processes(&root, "ant-monitor"), vec![own]);
        assert!(!scanner.is_running());
        assert_eq!(scanner.stop().await, StopOutcome::NotRunning);
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_start_and_stop_supervised_child() {
        let marker = format!("ant-dashboard-test-{}", std::process::id());
        let scanner = ScannerProcess::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "sleep 30; true".to_string(),
                marker.clone(),
            ],
            marker,
            PathBuf::from("/proc"),
        );

        let pid = match scanner.start().await.unwrap() {
            StartOutcome::Started(pid) => pid,
            other => panic!("unexpected {:?}", other),
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            scanner.start().await.unwrap(),
            StartOutcome::AlreadyRunning(pid)
        );
        assert!(scanner.is_running());

        assert_eq!(scanner.stop().await, StopOutcome::Stopped);
        assert!(!scanner.is_running());
        assert_eq!(scanner.stop().await, StopOutcome::NotRunning);
    }
}
