use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use super::output::{OutputLine, classify_stdout_line};
use super::relay::{RelayBridge, RelayEvent};
use crate::config::AnalyzerSection;
use crate::errors::ConsoleError;

/// How long the exit watcher waits for output readers to drain after the child exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `stop` waits for the killed child to be reaped.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The live analysis process. The child itself is owned by its exit watcher;
/// the slot keeps what is needed to report on it and to kill it.
struct RunningProcess {
    generation: u64,
    pid: Option<u32>,
    launch_path: PathBuf,
    started_at: String,
    kill_tx: oneshot::Sender<()>,
    watcher: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub launch_path: Option<String>,
    pub started_at: Option<String>,
}

/// Starts, stops, and watches the single analysis process.
#[derive(Clone)]
pub struct ProcessSupervisor {
    config: Arc<AnalyzerSection>,
    relay: RelayBridge,
    slot: Arc<Mutex<Option<RunningProcess>>>,
    /// Serializes `start` and `stop`. The exit watcher never takes it, so
    /// `stop` can hold it while waiting for the child to be reaped.
    lifecycle: Arc<Mutex<()>>,
    generation: Arc<AtomicU64>,
}

impl ProcessSupervisor {
    pub fn new(config: AnalyzerSection, relay: RelayBridge) -> Self {
        Self {
            config: Arc::new(config),
            relay,
            slot: Arc::new(Mutex::new(None)),
            lifecycle: Arc::new(Mutex::new(())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.config.command_args())
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONPATH", &self.config.module_path)
            .envs(&self.config.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Launch the analysis process. Returns the launch target path.
    pub async fn start(&self) -> Result<PathBuf, ConsoleError> {
        // Held across spawn so concurrent starts cannot both launch, and a
        // start racing a stop waits until the old child is gone.
        let _lifecycle = self.lifecycle.lock().await;
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Err(ConsoleError::AlreadyRunning);
        }

        let launch_path = self.config.launch_target();
        tracing::info!(
            program = %self.config.program,
            launch_path = %launch_path.display(),
            module_path = %self.config.module_path.display(),
            "Starting analysis process"
        );

        let mut child = match self.command().spawn() {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(program = %self.config.program, error = %source, "Failed to launch analysis process");
                self.relay
                    .deliver(RelayEvent::error(format!("分析程序啟動失敗: {}", source)));
                return Err(ConsoleError::Spawn {
                    program: self.config.program.clone(),
                    source,
                });
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let pid = child.id();

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_stdout(stdout, self.relay.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_stderr(stderr, self.relay.clone())));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_exit(
            child,
            kill_rx,
            readers,
            generation,
            self.slot.clone(),
            self.relay.clone(),
        ));

        *slot = Some(RunningProcess {
            generation,
            pid,
            launch_path: launch_path.clone(),
            started_at: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            kill_tx,
            watcher,
        });
        tracing::info!(?pid, generation, "Analysis process started");
        Ok(launch_path)
    }

    /// Kill the analysis process, clear the handle, and wait for the child to
    /// be reaped. The exit is still reported to the client by the watcher.
    pub async fn stop(&self) -> Result<(), ConsoleError> {
        let _lifecycle = self.lifecycle.lock().await;
        let running = self.slot.lock().await.take();
        let Some(running) = running else {
            return Err(ConsoleError::NotRunning);
        };
        tracing::info!(pid = ?running.pid, generation = running.generation, "Stopping analysis process");
        // The watcher also treats a dropped sender as a kill request.
        let _ = running.kill_tx.send(());
        if tokio::time::timeout(STOP_TIMEOUT, running.watcher).await.is_err() {
            tracing::warn!(pid = ?running.pid, "Analysis process did not exit within stop timeout");
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub async fn status(&self) -> ProcessStatus {
        match self.slot.lock().await.as_ref() {
            Some(running) => ProcessStatus {
                running: true,
                pid: running.pid,
                launch_path: Some(running.launch_path.to_string_lossy().to_string()),
                started_at: Some(running.started_at.clone()),
            },
            None => ProcessStatus {
                running: false,
                pid: None,
                launch_path: None,
                started_at: None,
            },
        }
    }

    /// Stop the process if running. Used on server exit.
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(()) | Err(ConsoleError::NotRunning) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to stop analysis process on shutdown"),
        }
    }
}

async fn read_stdout(stdout: tokio::process::ChildStdout, relay: RelayBridge) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read analysis stdout");
                break;
            }
        };
        let Some(classified) = classify_stdout_line(&line) else {
            continue;
        };
        tracing::debug!(line = %line.trim(), "analysis stdout");
        match classified {
            OutputLine::Log(text) => {
                relay.deliver(RelayEvent::log(text));
            }
            OutputLine::ScreenshotProduced(filename) => {
                relay.deliver(RelayEvent::screenshot(filename));
            }
            OutputLine::Decision(decision) => {
                relay.deliver(RelayEvent::decision(decision));
            }
            OutputLine::MalformedDecision { payload, error } => {
                tracing::warn!(%payload, %error, "Failed to parse decision from analysis output");
            }
        }
    }
}

async fn read_stderr(stderr: tokio::process::ChildStderr, relay: RelayBridge) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                tracing::warn!(line, "analysis stderr");
                relay.deliver(RelayEvent::error(line));
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read analysis stderr");
                break;
            }
        }
    }
}

enum Exit {
    Natural(std::io::Result<ExitStatus>),
    Killed,
}

async fn watch_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    generation: u64,
    slot: Arc<Mutex<Option<RunningProcess>>>,
    relay: RelayBridge,
) {
    let exit = tokio::select! {
        status = child.wait() => Exit::Natural(status),
        _ = kill_rx => Exit::Killed,
    };

    let status = match exit {
        Exit::Killed => {
            // `stop` already cleared the slot. Readers end on their own at EOF.
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill analysis process");
            }
            tracing::info!(generation, "Analysis process stopped");
            child.wait().await
        }
        Exit::Natural(status) => {
            // Idle as soon as the child is gone, even while output drains.
            {
                let mut slot = slot.lock().await;
                if slot.as_ref().is_some_and(|r| r.generation == generation) {
                    *slot = None;
                }
            }

            // Let buffered output reach the client before the exit report.
            for reader in readers {
                let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
            }
            status
        }
    };

    report_exit(&relay, generation, status);
}

/// Relay a non-zero or signalled exit as an `error` event. A child killed by
/// `stop` ends by signal and is reported the same way.
fn report_exit(relay: &RelayBridge, generation: u64, status: std::io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => {
            tracing::info!(generation, "Analysis process exited");
        }
        Ok(status) => {
            let description = match status.code() {
                Some(code) => format!("分析程序異常退出，退出碼：{}", code),
                None => "分析程序被信號終止".to_string(),
            };
            tracing::warn!(generation, %status, "Analysis process exited abnormally");
            relay.deliver(RelayEvent::error(description));
        }
        Err(e) => {
            tracing::error!(generation, error = %e, "Failed to wait on analysis process");
            relay.deliver(RelayEvent::error(format!("分析程序狀態未知: {}", e)));
        }
    }
}
