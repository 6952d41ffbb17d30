//! Remediation runner port.
//!
//! The host supplies the capability to launch external corrective actions
//! (processes or RPCs). The core hands over a fully interpolated command
//! and a wall-clock timeout; the runner observes the outcome.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one remediation launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The command ran to completion within the timeout
    Completed {
        exit_code: i32,
        stdout_tail: String,
        stderr_tail: String,
    },
    /// The timeout elapsed; the runner terminated the command forcibly
    TimedOut {
        stdout_tail: String,
        stderr_tail: String,
    },
    /// The command could not be started at all
    CouldNotStart(String),
}

/// Launches an external action and reports its result.
#[async_trait]
pub trait RemediationRunner: Send + Sync {
    /// Run the interpolated command with an enforced wall-clock timeout.
    ///
    /// `variables` is the restricted placeholder set already applied to the
    /// command; it is passed through for runners that forward structured
    /// context (e.g. RPC-based runners) instead of a shell line.
    async fn run(
        &self,
        command: &str,
        variables: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> RunOutcome;
}
