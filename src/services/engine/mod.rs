//! Escalation engine.
//!
//! The decision core: a partitioned event loop that admits alerts, drives
//! the escalation cursor, emits notification jobs, launches remediations,
//! and resolves alerts. Events for one alert are serialized onto a single
//! partition task; different alerts proceed in parallel.

mod events;
mod handlers;

pub use events::{EngineEvent, EngineStats, EngineStatsSnapshot};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::VigilConfig;
use crate::domain::ports::{
    AlertRepository, Clock, DirectoryRepository, ExecutionRepository, IdMinter, JobRepository,
};
use crate::services::dispatcher::DispatcherHandle;
use crate::services::executor::ExecutorHandle;
use crate::services::oncall::OnCallResolver;
use crate::services::retry::RetryPolicy;
use crate::services::suppression::SuppressionIndex;
use crate::services::timer::TimerService;

/// Cloneable submission handle for the engine's partitioned event queues.
#[derive(Clone)]
pub struct EngineHandle {
    partitions: Arc<Vec<mpsc::Sender<EngineEvent>>>,
    capacity: usize,
}

impl EngineHandle {
    /// Create the partition channels up front so collaborating services
    /// (dispatcher, executor, timers) can hold the handle before the
    /// engine itself is spawned.
    pub fn channels(
        partitions: usize,
        capacity: usize,
    ) -> (Self, Vec<mpsc::Receiver<EngineEvent>>) {
        let partitions = partitions.max(1);
        let capacity = capacity.max(1);
        let mut senders = Vec::with_capacity(partitions);
        let mut receivers = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            receivers.push(rx);
        }
        (
            Self {
                partitions: Arc::new(senders),
                capacity,
            },
            receivers,
        )
    }

    /// Non-blocking submission used at the ingress boundary. A full
    /// partition queue is an explicit rejection, never a silent drop.
    pub fn try_submit(&self, event: EngineEvent) -> DomainResult<()> {
        let idx = event.partition(self.partitions.len());
        match self.partitions[idx].try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DomainError::IngressFull(self.capacity)),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DomainError::EngineStopped),
        }
    }

    /// Backpressure-aware submission used by internal collaborators
    /// (dispatcher results, timer fires, executor results).
    pub async fn send(&self, event: EngineEvent) -> DomainResult<()> {
        let idx = event.partition(self.partitions.len());
        self.partitions[idx]
            .send(event)
            .await
            .map_err(|_| DomainError::EngineStopped)
    }
}

/// The escalation engine's shared dependencies.
pub struct EscalationEngine {
    pub(crate) alerts: Arc<dyn AlertRepository>,
    pub(crate) jobs: Arc<dyn JobRepository>,
    pub(crate) executions: Arc<dyn ExecutionRepository>,
    pub(crate) directory: Arc<dyn DirectoryRepository>,
    pub(crate) suppression: Arc<SuppressionIndex>,
    pub(crate) oncall: Arc<OnCallResolver>,
    pub(crate) dispatcher: DispatcherHandle,
    pub(crate) executor: ExecutorHandle,
    pub(crate) timers: Arc<TimerService>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdMinter>,
    pub(crate) config: VigilConfig,
    pub(crate) retry: RetryPolicy,
    pub(crate) stats: Arc<EngineStats>,
}

impl EscalationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        alerts: Arc<dyn AlertRepository>,
        jobs: Arc<dyn JobRepository>,
        executions: Arc<dyn ExecutionRepository>,
        directory: Arc<dyn DirectoryRepository>,
        suppression: Arc<SuppressionIndex>,
        oncall: Arc<OnCallResolver>,
        dispatcher: DispatcherHandle,
        executor: ExecutorHandle,
        timers: Arc<TimerService>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdMinter>,
        config: VigilConfig,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        Self {
            alerts,
            jobs,
            executions,
            directory,
            suppression,
            oncall,
            dispatcher,
            executor,
            timers,
            clock,
            ids,
            config,
            retry,
            stats: Arc::new(EngineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Spawn one task per partition. Each task serializes the events of
    /// its alerts; the engine runs until every sender is dropped.
    pub fn spawn(
        self: &Arc<Self>,
        receivers: Vec<mpsc::Receiver<EngineEvent>>,
    ) -> Vec<JoinHandle<()>> {
        info!(partitions = receivers.len(), "Starting escalation engine");
        receivers
            .into_iter()
            .enumerate()
            .map(|(idx, mut rx)| {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        engine.process(idx, event).await;
                    }
                    debug!(partition = idx, "Engine partition drained, stopping");
                })
            })
            .collect()
    }

    /// Handle one event, replaying on CAS conflicts.
    ///
    /// Handlers are pure functions of (event, latest state): a version
    /// mismatch means another writer interleaved, so re-reading and
    /// re-deciding is safe.
    async fn process(&self, partition: usize, event: EngineEvent) {
        const MAX_REPLAYS: u32 = 5;

        let kind = event.kind();
        for attempt in 0..=MAX_REPLAYS {
            match self.handle_event(&event).await {
                Ok(()) => return,
                Err(DomainError::VersionMismatch { entity, id, .. }) if attempt < MAX_REPLAYS => {
                    debug!(
                        partition,
                        event = kind,
                        entity,
                        record_id = %id,
                        attempt,
                        "CAS conflict, replaying event against latest state"
                    );
                }
                Err(e) => {
                    error!(partition, event = kind, error = %e, "Event handling failed");
                    if e.is_transient() {
                        // The alert is kept, flagged, never dropped.
                        if let Some(alert_id) = event.alert_id() {
                            self.mark_degraded(alert_id).await;
                        }
                    }
                    return;
                }
            }
        }
        error!(partition, event = kind, "Event abandoned after replay budget");
    }
}
