//! Process supervisor for the single backend child
//!
//! Owns the lifecycle of exactly one backend process: spawn with an adjusted
//! environment, stream its output into the log, and terminate it cleanly on
//! shutdown.

use crate::config::BackendConfig;
use crate::error::SupervisorError;
use parking_lot::Mutex;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Lifecycle state of the backend child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// No process has been spawned yet
    NotStarted,
    /// Process is running
    Running,
    /// Process was stopped (or stop was requested)
    Stopped,
}

struct Inner {
    child: Option<Child>,
    state: ChildState,
}

/// Supervises the single backend process.
///
/// The supervisor is the only owner of the child handle; the proxy side never
/// sees the process, only its loopback address. At most one child exists at a
/// time: `start` fails while a process is running, and `stop` is idempotent.
pub struct Supervisor {
    config: BackendConfig,
    inner: Mutex<Inner>,
}

impl Supervisor {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                child: None,
                state: ChildState::NotStarted,
            }),
        }
    }

    /// Current lifecycle state of the child
    pub fn state(&self) -> ChildState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ChildState::Running
    }

    /// Spawn the backend process.
    ///
    /// The child inherits the current environment with PORT and NODE_ENV
    /// overridden, plus any extra variables from the config. Its stdout and
    /// stderr are piped and streamed into the log without blocking the caller.
    ///
    /// Spawn failure is returned to the caller; there is no retry.
    pub fn start(&self) -> Result<(), SupervisorError> {
        let mut inner = self.inner.lock();
        if inner.state == ChildState::Running {
            return Err(SupervisorError::AlreadyRunning);
        }

        info!(
            command = %self.config.command,
            args = ?self.config.args,
            port = self.config.port,
            mode = %self.config.mode,
            "Starting backend process"
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        if let Some(ref working_dir) = self.config.working_dir {
            cmd.current_dir(working_dir);
        }

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        // The backend binds the loopback port the proxy forwards to
        cmd.env("PORT", self.config.port.to_string());
        cmd.env("NODE_ENV", &self.config.mode);

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: self.config.command.clone(),
            source,
        })?;

        let pid = child.id().unwrap_or(0);
        info!(pid, "Backend process spawned");

        if let Some(stdout) = child.stdout.take() {
            stream_output(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            stream_output(stderr, "stderr");
        }

        inner.child = Some(child);
        inner.state = ChildState::Running;
        Ok(())
    }

    /// Stop the backend process with graceful shutdown:
    /// 1. Send SIGTERM (plain kill off Unix)
    /// 2. Wait for exit, bounded by the configured grace period
    /// 3. Send SIGKILL if still running
    ///
    /// Calling stop with no running child is a no-op.
    pub async fn stop(&self) {
        let child = {
            let mut inner = self.inner.lock();
            match inner.child.take() {
                Some(child) => {
                    inner.state = ChildState::Stopped;
                    child
                }
                None => return,
            }
        };

        self.terminate(child).await;
    }

    async fn terminate(&self, mut child: Child) {
        let grace_period = self.config.shutdown_grace_period();

        if let Some(pid) = child.id() {
            info!(pid, "Sending SIGTERM to backend");

            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }

            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }
        }

        let wait_result = tokio::time::timeout(grace_period, child.wait()).await;

        match wait_result {
            Ok(Ok(status)) => {
                info!(?status, "Backend process exited gracefully");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error waiting for backend to exit");
            }
            Err(_) => {
                warn!(
                    grace_period_secs = grace_period.as_secs(),
                    "Grace period exceeded, sending SIGKILL"
                );
                let _ = child.kill().await;
            }
        }
    }
}

/// Stream a child output pipe into the log, line by line
fn stream_output<R>(stream: R, source: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(source, "{}", line);
        }
    });
}
