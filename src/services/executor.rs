//! Remediation executor.
//!
//! A small worker pool that launches approved external actions through
//! the host-supplied runner, under wall-clock timeouts and bounded
//! retries, and reports exactly one `RemediationResult` per execution
//! back to the engine. The global kill-switch refuses critical-impact
//! actions even after approval.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Alert, ExecutionStatus, ImpactLevel, RemediationExecution, VigilConfig,
};
use crate::domain::ports::{
    AlertRepository, Clock, DirectoryRepository, ExecutionRepository, RemediationRunner,
    RunOutcome,
};
use crate::services::engine::{EngineEvent, EngineHandle};
use crate::services::retry::RetryPolicy;
use crate::services::templates;

/// Executor tuning derived from the top-level configuration.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub killswitch: bool,
    pub tail_bytes: usize,
    /// Label keys allowed as command placeholders, on top of the builtin
    /// set
    pub label_keys: Vec<String>,
}

impl From<&VigilConfig> for ExecutorSettings {
    fn from(config: &VigilConfig) -> Self {
        Self {
            workers: config.executor_workers.max(1),
            killswitch: config.remediation_global_killswitch,
            tail_bytes: config.stdout_tail_bytes,
            label_keys: config.correlation_label_keys.clone(),
        }
    }
}

/// Builtin command placeholders always available to actions.
pub const BUILTIN_PLACEHOLDERS: [&str; 4] = ["service", "alert_id", "severity", "source"];

/// The allowed placeholder set for command templates.
pub fn allowed_placeholders(label_keys: &[String]) -> Vec<String> {
    let mut allowed: Vec<String> = BUILTIN_PLACEHOLDERS
        .iter()
        .map(|s| (*s).to_string())
        .collect();
    for key in label_keys {
        if !allowed.contains(key) {
            allowed.push(key.clone());
        }
    }
    allowed
}

struct Shared {
    executions: Arc<dyn ExecutionRepository>,
    alerts: Arc<dyn AlertRepository>,
    directory: Arc<dyn DirectoryRepository>,
    runner: Arc<dyn RemediationRunner>,
    engine: EngineHandle,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    settings: ExecutorSettings,
}

/// Cloneable handle for submitting approved executions.
#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::Sender<Uuid>,
}

impl ExecutorHandle {
    /// Queue an approved execution for launch.
    pub async fn submit(&self, exec_id: Uuid) -> DomainResult<()> {
        self.tx
            .send(exec_id)
            .await
            .map_err(|_| DomainError::EngineStopped)
    }
}

/// The remediation executor service.
pub struct RemediationExecutor {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Uuid>,
    rx: std::sync::Mutex<Option<mpsc::Receiver<Uuid>>>,
}

impl RemediationExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executions: Arc<dyn ExecutionRepository>,
        alerts: Arc<dyn AlertRepository>,
        directory: Arc<dyn DirectoryRepository>,
        runner: Arc<dyn RemediationRunner>,
        engine: EngineHandle,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        settings: ExecutorSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.workers.max(1) * 4);
        Self {
            shared: Arc::new(Shared {
                executions,
                alerts,
                directory,
                runner,
                engine,
                clock,
                retry,
                settings,
            }),
            tx,
            rx: std::sync::Mutex::new(Some(rx)),
        }
    }

    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            tx: self.tx.clone(),
        }
    }

    /// Spawn the worker pool. The shared receiver fans submissions out to
    /// whichever worker is free.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("executor already started");
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        info!(workers = self.shared.settings.workers, "Starting remediation executor");

        (0..self.shared.settings.workers)
            .map(|worker| {
                let shared = Arc::clone(&self.shared);
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let exec_id = {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        };
                        match exec_id {
                            Some(exec_id) => run_execution(&shared, exec_id).await,
                            None => break,
                        }
                    }
                    debug!(worker, "Executor worker stopped");
                })
            })
            .collect()
    }
}

async fn run_execution(shared: &Arc<Shared>, exec_id: Uuid) {
    let Ok(Some(mut execution)) = shared.executions.get(exec_id).await else {
        warn!(exec_id = %exec_id, "Unknown execution submitted");
        return;
    };

    // Cancelled while queued (alert resolved): report and stop.
    if execution.status == ExecutionStatus::Cancelled {
        emit_result(shared, &execution).await;
        return;
    }
    if execution.status != ExecutionStatus::Approved {
        warn!(
            exec_id = %exec_id,
            status = execution.status.as_str(),
            "Execution not in approved state; skipping"
        );
        return;
    }

    let Ok(Some(action)) = shared.directory.get_action(execution.action_id).await else {
        finish(shared, &mut execution, ExecutionStatus::Failed, None, String::new(),
               "action definition missing".to_string()).await;
        return;
    };

    // Impact gate: the kill-switch refuses critical actions even after
    // approval.
    if shared.settings.killswitch && action.impact == ImpactLevel::Critical {
        warn!(
            exec_id = %exec_id,
            action = %action.name,
            "Global kill-switch active, refusing critical-impact remediation"
        );
        finish(shared, &mut execution, ExecutionStatus::Cancelled, None, String::new(),
               "refused by global kill-switch".to_string()).await;
        return;
    }

    let alert = shared.alerts.get(execution.alert_id).await.ok().flatten();
    let variables = build_variables(alert.as_ref(), &execution, &shared.settings);

    let command = match templates::render("command", &action.command_template, &variables) {
        Ok(command) => command,
        Err(e) => {
            finish(shared, &mut execution, ExecutionStatus::Failed, None, String::new(),
                   format!("command template error: {e}")).await;
            return;
        }
    };

    // Claim: approved -> running.
    let now = shared.clock.now();
    if execution.transition_to(ExecutionStatus::Running, now).is_err() {
        return;
    }
    match shared.executions.update(&mut execution).await {
        Ok(()) => {}
        Err(DomainError::VersionMismatch { .. }) => return,
        Err(e) => {
            error!(exec_id = %exec_id, error = %e, "Could not claim execution");
            return;
        }
    }

    info!(
        exec_id = %exec_id,
        action = %action.name,
        attempt_budget = action.max_retries,
        "Launching remediation"
    );

    let timeout = std::time::Duration::from_secs(action.timeout_secs.max(1));
    let mut last: Option<RunOutcome> = None;

    for attempt in 0..=action.max_retries {
        execution.attempt = attempt;
        let outcome = shared.runner.run(&command, &variables, timeout).await;

        match &outcome {
            RunOutcome::Completed { exit_code: 0, .. } => {
                last = Some(outcome);
                break;
            }
            RunOutcome::Completed { exit_code, .. } => {
                debug!(exec_id = %exec_id, attempt, exit_code, "Remediation attempt failed");
            }
            RunOutcome::TimedOut { .. } => {
                debug!(exec_id = %exec_id, attempt, "Remediation attempt timed out");
            }
            RunOutcome::CouldNotStart(reason) => {
                debug!(exec_id = %exec_id, attempt, reason, "Remediation could not start");
            }
        }
        last = Some(outcome);

        if attempt < action.max_retries {
            tokio::time::sleep(shared.retry.backoff(attempt)).await;
        }
    }

    let (status, exit_code, stdout, stderr) = match last {
        Some(RunOutcome::Completed {
            exit_code,
            stdout_tail,
            stderr_tail,
        }) => {
            let status = if exit_code == 0 {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Failed
            };
            (status, Some(exit_code), stdout_tail, stderr_tail)
        }
        Some(RunOutcome::TimedOut {
            stdout_tail,
            stderr_tail,
        }) => (ExecutionStatus::Timeout, None, stdout_tail, stderr_tail),
        Some(RunOutcome::CouldNotStart(reason)) => {
            (ExecutionStatus::Failed, None, String::new(), reason)
        }
        None => (ExecutionStatus::Failed, None, String::new(), String::new()),
    };

    finish(shared, &mut execution, status, exit_code, stdout, stderr).await;
}

/// Record the terminal state and emit the single `RemediationResult`.
async fn finish(
    shared: &Arc<Shared>,
    execution: &mut RemediationExecution,
    status: ExecutionStatus,
    exit_code: Option<i32>,
    stdout_tail: String,
    stderr_tail: String,
) {
    let now = shared.clock.now();
    let tail = shared.settings.tail_bytes;
    execution.exit_code = exit_code;
    execution.stdout_tail = truncate_tail(&stdout_tail, tail);
    execution.stderr_tail = truncate_tail(&stderr_tail, tail);

    if execution.transition_to(status, now).is_err() {
        // Already terminal (e.g. cancelled concurrently); the record wins
        // and the result reflects what is stored.
        if let Ok(Some(stored)) = shared.executions.get(execution.id).await {
            *execution = stored;
        }
    } else if let Err(e) = shared.executions.update(execution).await {
        error!(exec_id = %execution.id, error = %e, "Failed to record execution result");
    }

    emit_result(shared, execution).await;
}

async fn emit_result(shared: &Arc<Shared>, execution: &RemediationExecution) {
    info!(
        exec_id = %execution.id,
        alert_id = %execution.alert_id,
        status = execution.status.as_str(),
        "Remediation finished"
    );
    let _ = shared
        .engine
        .send(EngineEvent::RemediationResult {
            exec_id: execution.id,
            alert_id: execution.alert_id,
            status: execution.status,
        })
        .await;
}

/// Interpolation variables from the restricted placeholder set.
fn build_variables(
    alert: Option<&Alert>,
    execution: &RemediationExecution,
    settings: &ExecutorSettings,
) -> BTreeMap<String, String> {
    let mut variables = BTreeMap::new();
    variables.insert("alert_id".to_string(), execution.alert_id.to_string());

    if let Some(alert) = alert {
        variables.insert("severity".to_string(), alert.severity.as_str().to_string());
        variables.insert("source".to_string(), alert.source.clone());
        variables.insert(
            "service".to_string(),
            alert
                .labels
                .get("service")
                .cloned()
                .unwrap_or_else(|| alert.source.clone()),
        );
        for key in &settings.label_keys {
            if let Some(value) = alert.labels.get(key) {
                variables.insert(key.clone(), value.clone());
            }
        }
    } else {
        variables.insert("severity".to_string(), "unknown".to_string());
        variables.insert("source".to_string(), "unknown".to_string());
        variables.insert("service".to_string(), "unknown".to_string());
    }

    variables
}

fn truncate_tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let start = s.len() - max_bytes;
    // Snap to a char boundary.
    let mut idx = start;
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    s[idx..].to_string()
}
