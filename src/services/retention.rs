//! Retention sweeper.
//!
//! Periodically deletes terminal records past their retention horizon.
//! Constitutional-flagged alerts and executions use a much longer
//! horizon than ordinary traffic.

use chrono::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::models::VigilConfig;
use crate::domain::ports::{AlertRepository, Clock, ExecutionRepository, JobRepository};

/// Background task enforcing the retention policy.
pub struct RetentionSweeper {
    alerts: Arc<dyn AlertRepository>,
    jobs: Arc<dyn JobRepository>,
    executions: Arc<dyn ExecutionRepository>,
    clock: Arc<dyn Clock>,
    alert_retention: Duration,
    constitutional_retention: Duration,
    interval: std::time::Duration,
    running: AtomicBool,
}

impl RetentionSweeper {
    pub fn new(
        alerts: Arc<dyn AlertRepository>,
        jobs: Arc<dyn JobRepository>,
        executions: Arc<dyn ExecutionRepository>,
        clock: Arc<dyn Clock>,
        config: &VigilConfig,
    ) -> Self {
        Self {
            alerts,
            jobs,
            executions,
            clock,
            alert_retention: Duration::days(i64::from(config.alert_retention_days)),
            constitutional_retention: Duration::days(i64::from(
                config.constitutional_retention_days,
            )),
            interval: std::time::Duration::from_secs(
                config.retention_sweep_interval_secs.max(1),
            ),
            running: AtomicBool::new(false),
        }
    }

    /// One sweep pass. Public so tests (and hosts) can run it on demand.
    pub async fn sweep_once(&self) -> (u64, u64, u64) {
        let now = self.clock.now();
        let ordinary_cutoff = now - self.alert_retention;
        let constitutional_cutoff = now - self.constitutional_retention;

        let mut alerts_deleted = 0;
        match self.alerts.delete_expired(ordinary_cutoff, false).await {
            Ok(n) => alerts_deleted += n,
            Err(e) => warn!(error = %e, "Retention sweep failed for alerts"),
        }
        match self
            .alerts
            .delete_expired(constitutional_cutoff, true)
            .await
        {
            Ok(n) => alerts_deleted += n,
            Err(e) => warn!(error = %e, "Retention sweep failed for constitutional alerts"),
        }

        let jobs_deleted = match self.jobs.delete_expired(ordinary_cutoff).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Retention sweep failed for jobs");
                0
            }
        };

        let mut executions_deleted = 0;
        match self
            .executions
            .delete_expired(ordinary_cutoff, false)
            .await
        {
            Ok(n) => executions_deleted += n,
            Err(e) => warn!(error = %e, "Retention sweep failed for executions"),
        }
        match self
            .executions
            .delete_expired(constitutional_cutoff, true)
            .await
        {
            Ok(n) => executions_deleted += n,
            Err(e) => {
                warn!(error = %e, "Retention sweep failed for constitutional executions");
            }
        }

        if alerts_deleted + jobs_deleted + executions_deleted > 0 {
            info!(
                alerts = alerts_deleted,
                jobs = jobs_deleted,
                executions = executions_deleted,
                "Retention sweep deleted expired records"
            );
        }
        (alerts_deleted, jobs_deleted, executions_deleted)
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            while sweeper.running.load(Ordering::SeqCst) {
                tokio::time::sleep(sweeper.interval).await;
                if !sweeper.running.load(Ordering::SeqCst) {
                    break;
                }
                sweeper.sweep_once().await;
            }
            debug!("Retention sweeper stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
