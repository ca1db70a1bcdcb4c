use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Grace period used when a supervised handle is dropped without an explicit stop.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

pub struct ProcessUtils;

impl ProcessUtils {
    /// Check if a process is still running
    pub fn is_process_running(pid: Pid) -> bool {
        signal::kill(pid, None).is_ok()
    }

    /// Send a signal to a process
    pub fn send_signal(pid: Pid, signal: Signal) -> Result<(), String> {
        signal::kill(pid, signal)
            .map_err(|e| format!("Failed to send signal {:?} to process {}: {}", signal, pid, e))
    }
}

/// Lifecycle of a supervised child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Running { pid: u32 },
    /// `code` is `None` when the process was terminated by a signal
    Exited { code: Option<i32> },
    Failed(String),
}

impl ServiceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Exited { .. } | ServiceState::Failed(_))
    }
}

/// Handle to an external process running on its own task.
///
/// The process is started once and never restarted; observers watch
/// `state()` or await `wait_exit()` to build a restart policy on top.
pub struct SupervisedService {
    name: String,
    state: watch::Receiver<ServiceState>,
    stop_tx: Option<oneshot::Sender<Duration>>,
    task: JoinHandle<()>,
}

impl SupervisedService {
    /// Spawn `command` with stdout/stderr passed through to the daemon's own.
    pub fn spawn(name: &str, mut command: Command) -> Self {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let (state_tx, state_rx) = watch::channel(ServiceState::Starting);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(supervise(name.to_string(), command, state_tx, stop_rx));

        Self {
            name: name.to_string(),
            state: state_rx,
            stop_tx: Some(stop_tx),
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServiceState {
        self.state.borrow().clone()
    }

    /// Resolve once the process has exited or failed to start.
    pub async fn wait_exit(&mut self) -> ServiceState {
        loop {
            {
                let current = self.state.borrow_and_update();
                if current.is_terminal() {
                    return current.clone();
                }
            }
            if self.state.changed().await.is_err() {
                return self.state.borrow().clone();
            }
        }
    }

    /// SIGTERM the process, escalating to SIGKILL after `grace`.
    pub async fn stop(mut self, grace: Duration) -> ServiceState {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(grace);
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!("Supervisor task for {} panicked: {}", self.name, e);
        }
        self.state.borrow().clone()
    }
}

async fn supervise(
    name: String,
    mut command: Command,
    state: watch::Sender<ServiceState>,
    mut stop_rx: oneshot::Receiver<Duration>,
) {
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!("Failed to start {}: {}", name, e);
            let _ = state.send(ServiceState::Failed(e.to_string()));
            return;
        }
    };

    let pid = child.id().unwrap_or_default();
    tracing::info!("Started {} (pid {})", name, pid);
    let _ = state.send(ServiceState::Running { pid });

    let status = tokio::select! {
        status = child.wait() => status,
        grace = &mut stop_rx => {
            let grace = grace.unwrap_or(DEFAULT_STOP_GRACE);
            let pid = Pid::from_raw(pid as i32);
            if ProcessUtils::is_process_running(pid) {
                if let Err(e) = ProcessUtils::send_signal(pid, Signal::SIGTERM) {
                    tracing::warn!("{}", e);
                }
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!("{} did not exit within {:?}, killing", name, grace);
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to kill {}: {}", name, e);
                    }
                    child.wait().await
                }
            }
        }
    };

    let final_state = match status {
        Ok(status) => {
            tracing::info!("{} exited: {}", name, status);
            ServiceState::Exited {
                code: status.code(),
            }
        }
        Err(e) => {
            tracing::error!("Failed to wait for {}: {}", name, e);
            ServiceState::Failed(e.to_string())
        }
    };
    let _ = state.send(final_state);
}
