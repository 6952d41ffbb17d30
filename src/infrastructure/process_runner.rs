//! Subprocess remediation runner.
//!
//! Launches the interpolated command through `sh -c` with a wall-clock
//! timeout, captures bounded output tails, and terminates overruns
//! SIGTERM-first with a SIGKILL escalation. Interpolation happens
//! before this layer and only from the restricted placeholder set; the
//! runner never does its own substitution.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::ports::{RemediationRunner, RunOutcome};

/// How long after SIGTERM before the process group gets SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

pub struct ProcessRunner {
    /// Working directory for launched commands
    workdir: Option<std::path::PathBuf>,
    /// Bytes of stdout/stderr retained
    tail_bytes: usize,
}

impl ProcessRunner {
    pub fn new(tail_bytes: usize) -> Self {
        Self {
            workdir: None,
            tail_bytes,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<std::path::PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// SIGTERM, grace period, then SIGKILL.
    async fn terminate(child: &mut tokio::process::Child) {
        if let Some(pid) = child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                debug!(error = %e, "SIGTERM failed, process may have exited");
            }
            match tokio::time::timeout(TERM_GRACE, child.wait()).await {
                Ok(_) => return,
                Err(_) => warn!("Remediation ignored SIGTERM, escalating to SIGKILL"),
            }
        }
        if let Err(e) = child.kill().await {
            debug!(error = %e, "SIGKILL failed, process already gone");
        }
    }
}

#[async_trait]
impl RemediationRunner for ProcessRunner {
    async fn run(
        &self,
        command: &str,
        _variables: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> RunOutcome {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(workdir) = &self.workdir {
            cmd.current_dir(workdir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return RunOutcome::CouldNotStart(e.to_string()),
        };

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let tail = self.tail_bytes;

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(stdout) = stdout.as_mut() {
                let _ = stdout.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => return RunOutcome::CouldNotStart(e.to_string()),
            Err(_) => {
                Self::terminate(&mut child).await;
                None
            }
        };

        let stdout_tail = tail_of(stdout_task.await.unwrap_or_default(), tail);
        let stderr_tail = tail_of(stderr_task.await.unwrap_or_default(), tail);

        match status {
            Some(status) => RunOutcome::Completed {
                exit_code: status.code().unwrap_or(-1),
                stdout_tail,
                stderr_tail,
            },
            None => RunOutcome::TimedOut {
                stdout_tail,
                stderr_tail,
            },
        }
    }
}

fn tail_of(buf: Vec<u8>, max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(&buf);
    if text.len() <= max_bytes {
        return text.into_owned();
    }
    let mut idx = text.len() - max_bytes;
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    text[idx..].to_string()
}
