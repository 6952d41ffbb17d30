//! Notification dispatcher.
//!
//! A bounded worker pool that consumes notification jobs, renders their
//! templates, and drives channel adapters under per-channel token-bucket
//! rate limits. Jobs are picked up in priority order, then by
//! `scheduled_not_before`; transient failures retry with exponential
//! backoff and jitter; constitutional-flagged jobs are served by a
//! reserved worker partition so normal-traffic bursts cannot starve them.
//!
//! Ordering guarantee: for a single `(alert, channel, contact)` tuple a
//! second attempt is never issued while a prior attempt is outstanding.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ChannelKind, JobStatus, NotificationJob, VigilConfig};
use crate::domain::ports::{
    AlertRepository, Channel, Clock, DirectoryRepository, JobRepository, SendOutcome,
};
use crate::services::engine::{EngineEvent, EngineHandle};
use crate::services::rate_limit::TokenBucketRateLimiter;
use crate::services::retry::RetryPolicy;
use crate::services::templates::{builtin, TemplateRegistry};

/// Dispatcher tuning derived from the top-level configuration.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub workers: usize,
    pub constitutional_workers: usize,
    pub poll_interval: Duration,
    pub send_deadline: Duration,
    pub fetch_batch: usize,
}

impl From<&VigilConfig> for DispatcherSettings {
    fn from(config: &VigilConfig) -> Self {
        Self {
            workers: config.dispatcher_workers.max(1),
            constitutional_workers: config.constitutional_workers(),
            poll_interval: Duration::from_millis(config.dispatcher_poll_ms.max(10)),
            send_deadline: Duration::from_secs(config.channel_send_deadline_secs.max(1)),
            fetch_batch: 64,
        }
    }
}

struct Shared {
    jobs: Arc<dyn JobRepository>,
    alerts: Arc<dyn AlertRepository>,
    directory: Arc<dyn DirectoryRepository>,
    templates: Arc<TemplateRegistry>,
    channels: HashMap<ChannelKind, Arc<dyn Channel>>,
    limiters: HashMap<ChannelKind, TokenBucketRateLimiter>,
    engine: EngineHandle,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    settings: DispatcherSettings,
    /// Outstanding `(alert, channel, contact)` attempts
    in_flight: Mutex<HashSet<(Uuid, ChannelKind, Uuid)>>,
    /// Wakes the poll loop when a job is enqueued
    notify: Notify,
    running: AtomicBool,
}

/// Cloneable handle for enqueueing and cancelling jobs.
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// Persist and schedule a job. Idempotent on `job_id`: re-enqueueing
    /// an existing job is a no-op.
    pub async fn enqueue(&self, job: NotificationJob) -> DomainResult<()> {
        match self.shared.jobs.insert(&job).await {
            Ok(()) => {
                debug!(job_id = %job.id, alert_id = %job.alert_id, channel = job.channel.as_str(), "Notification job enqueued");
                self.shared.notify.notify_one();
                Ok(())
            }
            Err(DomainError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Cancel a not-yet-started job. An in-flight attempt is unaffected:
    /// it completes and the engine discards the outcome.
    pub async fn cancel(&self, job_id: Uuid) -> DomainResult<()> {
        for _ in 0..3 {
            let Some(mut job) = self.shared.jobs.get(job_id).await? else {
                return Ok(());
            };
            if job.status != JobStatus::Pending {
                return Ok(());
            }
            let now = self.shared.clock.now();
            if job.transition_to(JobStatus::Cancelled, now).is_err() {
                return Ok(());
            }
            match self.shared.jobs.update(&mut job).await {
                Ok(()) => {
                    debug!(job_id = %job_id, "Notification job cancelled");
                    return Ok(());
                }
                Err(DomainError::VersionMismatch { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// The dispatcher service. Owns the poll loop and the worker pool.
pub struct NotificationDispatcher {
    shared: Arc<Shared>,
}

impl NotificationDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        alerts: Arc<dyn AlertRepository>,
        directory: Arc<dyn DirectoryRepository>,
        templates: Arc<TemplateRegistry>,
        channels: Vec<Arc<dyn Channel>>,
        engine: EngineHandle,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        settings: DispatcherSettings,
    ) -> Self {
        let mut channel_map = HashMap::new();
        let mut limiters = HashMap::new();
        for channel in channels {
            let kind = channel.kind();
            limiters.insert(kind, TokenBucketRateLimiter::from_spec(channel.rate_limit()));
            channel_map.insert(kind, channel);
        }

        Self {
            shared: Arc::new(Shared {
                jobs,
                alerts,
                directory,
                templates,
                channels: channel_map,
                limiters,
                engine,
                clock,
                retry,
                settings,
                in_flight: Mutex::new(HashSet::new()),
                notify: Notify::new(),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawn the poll loop and worker pool.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let settings = &self.shared.settings;
        self.shared.running.store(true, Ordering::SeqCst);
        info!(
            workers = settings.workers,
            constitutional_workers = settings.constitutional_workers,
            "Starting notification dispatcher"
        );

        let queue_depth = settings.workers * 2;
        let (normal_tx, normal_rx) = mpsc::channel::<Uuid>(queue_depth.max(2));
        let (const_tx, const_rx) = mpsc::channel::<Uuid>(queue_depth.max(2));
        let normal_rx = Arc::new(tokio::sync::Mutex::new(normal_rx));
        let const_rx = Arc::new(tokio::sync::Mutex::new(const_rx));

        let mut handles = Vec::new();

        // Poll loop: scan due jobs and feed the worker partitions.
        {
            let shared = Arc::clone(&self.shared);
            handles.push(tokio::spawn(async move {
                poll_loop(shared, normal_tx, const_tx).await;
            }));
        }

        // Reserved constitutional workers drain only the constitutional
        // queue; the remainder drain only the normal queue.
        for worker in 0..settings.workers {
            let constitutional = worker < settings.constitutional_workers;
            let rx = if constitutional {
                Arc::clone(&const_rx)
            } else {
                Arc::clone(&normal_rx)
            };
            let shared = Arc::clone(&self.shared);
            handles.push(tokio::spawn(async move {
                loop {
                    let job_id = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job_id {
                        Some(job_id) => process_job(&shared, job_id).await,
                        None => break,
                    }
                }
                debug!(worker, constitutional, "Dispatcher worker stopped");
            }));
        }

        handles
    }

    /// Ask the loops to wind down.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }
}

async fn poll_loop(
    shared: Arc<Shared>,
    normal_tx: mpsc::Sender<Uuid>,
    const_tx: mpsc::Sender<Uuid>,
) {
    while shared.running.load(Ordering::SeqCst) {
        tokio::select! {
            () = shared.notify.notified() => {}
            () = tokio::time::sleep(shared.settings.poll_interval) => {}
        }
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        let now = shared.clock.now();
        let due = match shared
            .retry
            .execute(|| shared.jobs.list_due(now, shared.settings.fetch_batch))
            .await
        {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Dispatcher could not scan due jobs");
                continue;
            }
        };

        for job in due {
            let outstanding = {
                let in_flight = shared.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                in_flight.contains(&job.ordering_key())
            };
            if outstanding {
                continue;
            }
            let tx = if job.constitutional_flag && shared.settings.constitutional_workers > 0 {
                &const_tx
            } else {
                &normal_tx
            };
            // A full partition just means the job is picked up next poll.
            let _ = tx.try_send(job.id);
        }
    }
    debug!("Dispatcher poll loop stopped");
}

async fn process_job(shared: &Arc<Shared>, job_id: Uuid) {
    let Ok(Some(mut job)) = shared.jobs.get(job_id).await else {
        return;
    };
    let now = shared.clock.now();
    if job.status != JobStatus::Pending || job.scheduled_not_before > now {
        return;
    }

    // Discard jobs for alerts that went terminal, except resolution
    // notices which are sent about terminal alerts by design.
    let alert = shared.alerts.get(job.alert_id).await.ok().flatten();
    if job.template_id != builtin::RESOLUTION {
        if let Some(ref alert) = alert {
            if alert.is_terminal() {
                let _ = job.transition_to(JobStatus::Cancelled, now);
                let _ = shared.jobs.update(&mut job).await;
                return;
            }
        }
    }

    // Claim the ordering key; a prior attempt for the same
    // (alert, channel, contact) must complete first.
    let key = job.ordering_key();
    {
        let mut in_flight = shared.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(key) {
            return;
        }
    }

    attempt_job(shared, &mut job).await;

    let mut in_flight = shared.in_flight.lock().unwrap_or_else(|e| e.into_inner());
    in_flight.remove(&key);
}

async fn attempt_job(shared: &Arc<Shared>, job: &mut NotificationJob) {
    let now = shared.clock.now();

    // Claim via CAS; a mismatch means another worker won.
    if job.transition_to(JobStatus::InFlight, now).is_err() {
        return;
    }
    match shared.jobs.update(job).await {
        Ok(()) => {}
        Err(DomainError::VersionMismatch { .. }) => return,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Could not claim notification job");
            return;
        }
    }

    // Address resolution and template rendering are permanent-failure
    // territory: retrying would not change the outcome.
    let contact = match shared.directory.get_contact(job.contact_id).await {
        Ok(Some(contact)) => contact,
        Ok(None) => {
            finish_permanent(shared, job, "unknown contact").await;
            return;
        }
        Err(e) => {
            reschedule_or_fail(shared, job, &e.to_string()).await;
            return;
        }
    };
    let Some(address) = contact.address_for(job.channel).map(str::to_string) else {
        finish_permanent(shared, job, "contact has no address for channel").await;
        return;
    };

    let message = match shared.templates.render_message(&job.template_id, &job.variables) {
        Ok(message) => message,
        Err(e) => {
            finish_permanent(shared, job, &e.to_string()).await;
            return;
        }
    };

    let Some(channel) = shared.channels.get(&job.channel) else {
        finish_permanent(shared, job, "no adapter registered for channel").await;
        return;
    };

    if let Some(limiter) = shared.limiters.get(&job.channel) {
        limiter.acquire().await;
    }

    let deadline = shared.settings.send_deadline;
    let outcome = match tokio::time::timeout(deadline, channel.send(&message, &address, deadline))
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => SendOutcome::TransientError("send deadline elapsed".to_string()),
    };

    match outcome {
        SendOutcome::Delivered => {
            let delivered_at = shared.clock.now();
            if job.transition_to(JobStatus::Delivered, delivered_at).is_ok() {
                if let Err(e) = shared.jobs.update(job).await {
                    error!(job_id = %job.id, error = %e, "Failed to record delivery");
                }
            }
            debug!(job_id = %job.id, channel = job.channel.as_str(), "Notification delivered");

            if let Ok(Some(alert)) = shared.alerts.get(job.alert_id).await {
                let _ = shared
                    .engine
                    .send(EngineEvent::NotificationDelivered {
                        job_id: job.id,
                        alert_id: job.alert_id,
                        rule_name: alert.rule_name,
                        source: alert.source,
                        delivered_at,
                    })
                    .await;
            }
        }
        SendOutcome::TransientError(reason) => {
            reschedule_or_fail(shared, job, &reason).await;
        }
        SendOutcome::PermanentError(reason) => {
            finish_permanent(shared, job, &reason).await;
        }
    }
}

/// Transient failure: push the job back with backoff, or go terminal when
/// attempts or deadline are exhausted.
async fn reschedule_or_fail(shared: &Arc<Shared>, job: &mut NotificationJob, reason: &str) {
    let now = shared.clock.now();
    let seed = job.id.as_u128() as u64;
    let backoff = shared.retry.backoff_with_jitter(job.attempts, seed);
    let backoff = chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::seconds(1));

    if job.reschedule_after_transient(backoff, reason, now) {
        warn!(
            job_id = %job.id,
            attempts = job.attempts,
            next_at = %job.scheduled_not_before,
            reason,
            "Transient delivery failure, rescheduled"
        );
        let _ = job.transition_to(JobStatus::Pending, now);
        if let Err(e) = shared.jobs.update(job).await {
            error!(job_id = %job.id, error = %e, "Failed to reschedule job");
        }
    } else {
        finish_permanent(shared, job, &format!("retries exhausted: {reason}")).await;
    }
}

async fn finish_permanent(shared: &Arc<Shared>, job: &mut NotificationJob, reason: &str) {
    let now = shared.clock.now();
    job.last_error = Some(reason.to_string());
    if job.transition_to(JobStatus::FailedPermanent, now).is_err() {
        return;
    }
    if let Err(e) = shared.jobs.update(job).await {
        error!(job_id = %job.id, error = %e, "Failed to record permanent failure");
    }
    warn!(job_id = %job.id, reason, "Notification failed permanently");

    let _ = shared
        .engine
        .send(EngineEvent::NotificationFailed {
            job_id: job.id,
            alert_id: job.alert_id,
            error: reason.to_string(),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Alert, AlertSeverity, IngressEvent};
    use crate::domain::ports::{RateLimitSpec, RenderedMessage};
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::memory::{
        InMemoryAlertRepository, InMemoryDirectoryRepository, InMemoryJobRepository,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    /// Channel test double with a scripted outcome sequence.
    struct ScriptedChannel {
        kind: ChannelKind,
        outcomes: Mutex<Vec<SendOutcome>>,
        sends: AtomicUsize,
    }

    impl ScriptedChannel {
        fn new(kind: ChannelKind, outcomes: Vec<SendOutcome>) -> Self {
            Self {
                kind,
                outcomes: Mutex::new(outcomes),
                sends: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(
            &self,
            _message: &RenderedMessage,
            _address: &str,
            _deadline: Duration,
        ) -> SendOutcome {
            self.sends.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
            if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes
                    .first()
                    .cloned()
                    .unwrap_or(SendOutcome::Delivered)
            }
        }

        fn rate_limit(&self) -> RateLimitSpec {
            RateLimitSpec {
                capacity: 100.0,
                refill_per_second: 100.0,
            }
        }
    }

    struct Fixture {
        dispatcher: NotificationDispatcher,
        jobs: Arc<InMemoryJobRepository>,
        alerts: Arc<InMemoryAlertRepository>,
        engine_rx: mpsc::Receiver<EngineEvent>,
        contact_id: Uuid,
        alert_id: Uuid,
    }

    async fn fixture(channel: Arc<dyn Channel>) -> Fixture {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let alerts = Arc::new(InMemoryAlertRepository::new());
        let directory = Arc::new(InMemoryDirectoryRepository::new());
        let (engine, mut receivers) = EngineHandle::channels(1, 64);
        let engine_rx = receivers.remove(0);

        let now = Utc::now();
        let contact = crate::domain::models::Contact::new(Uuid::new_v4(), "Ada", now)
            .with_address(ChannelKind::Email, "ada@example.org");
        let contact_id = contact.id;
        directory.upsert_contact(&contact).await.unwrap();

        let event = IngressEvent {
            rule_name: "ServiceDown".to_string(),
            severity: AlertSeverity::Critical,
            message: "down".to_string(),
            source: "svc-a".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            constitutional_flag: false,
            external_id: None,
            timestamp: now,
        };
        let alert = Alert::from_ingress(Uuid::new_v4(), &event, "k".to_string(), now);
        let alert_id = alert.id;
        alerts.insert(&alert).await.unwrap();

        let mut config = VigilConfig::default();
        config.dispatcher_workers = 2;
        config.dispatcher_poll_ms = 10;

        let dispatcher = NotificationDispatcher::new(
            jobs.clone(),
            alerts.clone(),
            directory.clone(),
            Arc::new(TemplateRegistry::with_builtins()),
            vec![channel],
            engine,
            Arc::new(SystemClock),
            RetryPolicy::new(3, 10, 50),
            DispatcherSettings::from(&config),
        );

        Fixture {
            dispatcher,
            jobs,
            alerts,
            engine_rx,
            contact_id,
            alert_id,
        }
    }

    fn make_job(fx: &Fixture) -> NotificationJob {
        let now = Utc::now();
        NotificationJob::new(
            Uuid::new_v4(),
            fx.alert_id,
            fx.contact_id,
            ChannelKind::Email,
            builtin::ALERT,
            8,
            now,
            now + chrono::Duration::minutes(5),
        )
        .with_variable("severity", "critical")
        .with_variable("rule_name", "ServiceDown")
        .with_variable("source", "svc-a")
        .with_variable("message", "down")
        .with_variable("alert_id", "a-1")
    }

    async fn wait_for_status(
        jobs: &Arc<InMemoryJobRepository>,
        job_id: Uuid,
        status: JobStatus,
    ) -> NotificationJob {
        for _ in 0..200 {
            let job = jobs.get(job_id).await.unwrap().unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached {status:?}");
    }

    #[tokio::test]
    async fn test_delivers_and_emits_event() {
        let channel = Arc::new(ScriptedChannel::new(
            ChannelKind::Email,
            vec![SendOutcome::Delivered],
        ));
        let mut fx = fixture(channel).await;
        let handles = fx.dispatcher.start();

        let job = make_job(&fx);
        let job_id = job.id;
        fx.dispatcher.handle().enqueue(job).await.unwrap();

        let delivered = wait_for_status(&fx.jobs, job_id, JobStatus::Delivered).await;
        assert!(delivered.delivered_at.is_some());

        let event = tokio::time::timeout(Duration::from_secs(2), fx.engine_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, EngineEvent::NotificationDelivered { alert_id, .. } if alert_id == fx.alert_id));

        fx.dispatcher.stop();
        drop(handles);
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let channel = Arc::new(ScriptedChannel::new(
            ChannelKind::Email,
            vec![SendOutcome::Delivered],
        ));
        let fx = fixture(channel).await;

        let job = make_job(&fx);
        let handle = fx.dispatcher.handle();
        handle.enqueue(job.clone()).await.unwrap();
        handle.enqueue(job).await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_delivers() {
        let channel = Arc::new(ScriptedChannel::new(
            ChannelKind::Email,
            vec![
                SendOutcome::TransientError("503".to_string()),
                SendOutcome::Delivered,
            ],
        ));
        let mut fx = fixture(Arc::clone(&channel) as Arc<dyn Channel>).await;
        let _handles = fx.dispatcher.start();

        let job = make_job(&fx);
        let job_id = job.id;
        fx.dispatcher.handle().enqueue(job).await.unwrap();

        let delivered = wait_for_status(&fx.jobs, job_id, JobStatus::Delivered).await;
        assert_eq!(delivered.attempts, 1);
        assert!(channel.sends.load(Ordering::SeqCst) >= 2);

        // Only a delivery event; the transient hop emits nothing.
        let event = tokio::time::timeout(Duration::from_secs(2), fx.engine_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, EngineEvent::NotificationDelivered { .. }));

        fx.dispatcher.stop();
    }

    #[tokio::test]
    async fn test_permanent_failure_no_retry() {
        let channel = Arc::new(ScriptedChannel::new(
            ChannelKind::Email,
            vec![SendOutcome::PermanentError("410 gone".to_string())],
        ));
        let mut fx = fixture(Arc::clone(&channel) as Arc<dyn Channel>).await;
        let _handles = fx.dispatcher.start();

        let job = make_job(&fx);
        let job_id = job.id;
        fx.dispatcher.handle().enqueue(job).await.unwrap();

        let failed = wait_for_status(&fx.jobs, job_id, JobStatus::FailedPermanent).await;
        assert!(failed.last_error.unwrap().contains("410"));
        assert_eq!(channel.sends.load(Ordering::SeqCst), 1);

        let event = tokio::time::timeout(Duration::from_secs(2), fx.engine_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, EngineEvent::NotificationFailed { .. }));

        fx.dispatcher.stop();
    }

    #[tokio::test]
    async fn test_unknown_contact_address_is_permanent() {
        let channel = Arc::new(ScriptedChannel::new(
            ChannelKind::Email,
            vec![SendOutcome::Delivered],
        ));
        let fx = fixture(channel).await;
        let _handles = fx.dispatcher.start();

        // Webhook address was never configured for this contact.
        let mut job = make_job(&fx);
        job.channel = ChannelKind::Webhook;
        let job_id = job.id;
        fx.dispatcher.handle().enqueue(job).await.unwrap();

        let failed = wait_for_status(&fx.jobs, job_id, JobStatus::FailedPermanent).await;
        assert!(failed.last_error.unwrap().contains("no address"));

        fx.dispatcher.stop();
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let channel = Arc::new(ScriptedChannel::new(
            ChannelKind::Email,
            vec![SendOutcome::Delivered],
        ));
        let fx = fixture(channel).await;
        // Dispatcher not started: the job stays pending.

        let mut job = make_job(&fx);
        job.scheduled_not_before = Utc::now() + chrono::Duration::hours(1);
        let job_id = job.id;
        let handle = fx.dispatcher.handle();
        handle.enqueue(job).await.unwrap();

        handle.cancel(job_id).await.unwrap();
        let job = fx.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        // Cancelling again is a no-op.
        handle.cancel(job_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_job_for_terminal_alert_is_discarded() {
        let channel = Arc::new(ScriptedChannel::new(
            ChannelKind::Email,
            vec![SendOutcome::Delivered],
        ));
        let fx = fixture(Arc::clone(&channel) as Arc<dyn Channel>).await;
        let _handles = fx.dispatcher.start();

        // Resolve the alert before the job is picked up.
        let mut alert = fx.alerts.get(fx.alert_id).await.unwrap().unwrap();
        alert
            .transition_to(crate::domain::models::AlertStatus::Resolved, Utc::now())
            .unwrap();
        fx.alerts.update(&mut alert).await.unwrap();

        let job = make_job(&fx);
        let job_id = job.id;
        fx.dispatcher.handle().enqueue(job).await.unwrap();

        let job = wait_for_status(&fx.jobs, job_id, JobStatus::Cancelled).await;
        assert_eq!(job.attempts, 0);
        assert_eq!(channel.sends.load(Ordering::SeqCst), 0);

        fx.dispatcher.stop();
    }

    #[tokio::test]
    async fn test_resolution_notice_sent_for_terminal_alert() {
        let channel = Arc::new(ScriptedChannel::new(
            ChannelKind::Email,
            vec![SendOutcome::Delivered],
        ));
        let fx = fixture(Arc::clone(&channel) as Arc<dyn Channel>).await;
        let _handles = fx.dispatcher.start();

        let mut alert = fx.alerts.get(fx.alert_id).await.unwrap().unwrap();
        alert
            .transition_to(crate::domain::models::AlertStatus::Resolved, Utc::now())
            .unwrap();
        fx.alerts.update(&mut alert).await.unwrap();

        let mut job = make_job(&fx);
        job.template_id = builtin::RESOLUTION.to_string();
        job.variables
            .insert("reason".to_string(), "fixed".to_string());
        let job_id = job.id;
        fx.dispatcher.handle().enqueue(job).await.unwrap();

        wait_for_status(&fx.jobs, job_id, JobStatus::Delivered).await;
        fx.dispatcher.stop();
    }

    #[tokio::test]
    async fn test_ordering_no_overlap_for_same_tuple() {
        // A slow channel: the second job for the same tuple must not be
        // attempted while the first is outstanding.
        struct SlowChannel {
            concurrent: AtomicUsize,
            max_seen: AtomicUsize,
        }

        #[async_trait]
        impl Channel for SlowChannel {
            fn kind(&self) -> ChannelKind {
                ChannelKind::Email
            }

            async fn send(
                &self,
                _message: &RenderedMessage,
                _address: &str,
                _deadline: Duration,
            ) -> SendOutcome {
                let live = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(live, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                SendOutcome::Delivered
            }
        }

        let channel = Arc::new(SlowChannel {
            concurrent: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let fx = fixture(Arc::clone(&channel) as Arc<dyn Channel>).await;
        let _handles = fx.dispatcher.start();

        let handle = fx.dispatcher.handle();
        let first = make_job(&fx);
        let second = make_job(&fx);
        let (first_id, second_id) = (first.id, second.id);
        handle.enqueue(first).await.unwrap();
        handle.enqueue(second).await.unwrap();

        wait_for_status(&fx.jobs, first_id, JobStatus::Delivered).await;
        wait_for_status(&fx.jobs, second_id, JobStatus::Delivered).await;

        assert_eq!(
            channel.max_seen.load(Ordering::SeqCst),
            1,
            "attempts for the same (alert, channel, contact) overlapped"
        );

        fx.dispatcher.stop();
    }
}
