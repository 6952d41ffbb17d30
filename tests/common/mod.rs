//! Shared test harness: a fully wired engine over in-memory
//! repositories, a virtual clock, deterministic IDs, recording channel
//! adapters, and a scripted remediation runner.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use vigil::domain::models::{
    Alert, AlertSeverity, ChannelKind, Contact, IngressEvent, VigilConfig,
};
use vigil::domain::ports::{
    AlertRepository, Channel, Clock, RateLimitSpec, RemediationRunner, RenderedMessage,
    RunOutcome, SendOutcome,
};
use vigil::infrastructure::clock::{SequentialMinter, VirtualClock};
use vigil::infrastructure::memory::{
    InMemoryAlertRepository, InMemoryDirectoryRepository, InMemoryExecutionRepository,
    InMemoryJobRepository,
};
use vigil::services::control::ControlSurface;
use vigil::services::dispatcher::{DispatcherSettings, NotificationDispatcher};
use vigil::services::engine::{EngineHandle, EscalationEngine};
use vigil::services::executor::{ExecutorSettings, RemediationExecutor};
use vigil::services::oncall::OnCallResolver;
use vigil::services::retry::RetryPolicy;
use vigil::services::suppression::SuppressionIndex;
use vigil::services::templates::TemplateRegistry;
use vigil::services::timer::TimerService;

/// One recorded delivery.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub address: String,
    pub subject: String,
    pub body: String,
}

/// Channel adapter that records every send and always delivers.
pub struct RecordingChannel {
    kind: ChannelKind,
    pub sent: Mutex<Vec<SentMessage>>,
}

impl RecordingChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(
        &self,
        message: &RenderedMessage,
        address: &str,
        _deadline: Duration,
    ) -> SendOutcome {
        self.sent.lock().unwrap().push(SentMessage {
            address: address.to_string(),
            subject: message.subject.clone(),
            body: message.body.clone(),
        });
        SendOutcome::Delivered
    }

    fn rate_limit(&self) -> RateLimitSpec {
        RateLimitSpec {
            capacity: 1000.0,
            refill_per_second: 1000.0,
        }
    }
}

/// Runner with a scripted outcome queue; the last outcome repeats.
pub struct ScriptedRunner {
    outcomes: Mutex<Vec<RunOutcome>>,
    delay: Duration,
    pub commands: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn succeeding() -> Self {
        Self::new(vec![RunOutcome::Completed {
            exit_code: 0,
            stdout_tail: "ok".to_string(),
            stderr_tail: String::new(),
        }])
    }

    pub fn failing() -> Self {
        Self::new(vec![RunOutcome::Completed {
            exit_code: 1,
            stdout_tail: String::new(),
            stderr_tail: "boom".to_string(),
        }])
    }

    pub fn new(outcomes: Vec<RunOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            delay: Duration::ZERO,
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Hold each run for a while so tests can observe in-flight state.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn run_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

#[async_trait]
impl RemediationRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &str,
        _variables: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> RunOutcome {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.commands.lock().unwrap().push(command.to_string());
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.len() > 1 {
            outcomes.remove(0)
        } else {
            outcomes.first().cloned().unwrap_or(RunOutcome::Completed {
                exit_code: 0,
                stdout_tail: String::new(),
                stderr_tail: String::new(),
            })
        }
    }
}

/// A wired engine over in-memory state with virtual time.
pub struct TestWorld {
    pub control: Arc<ControlSurface>,
    pub clock: Arc<VirtualClock>,
    pub alerts: Arc<InMemoryAlertRepository>,
    pub jobs: Arc<InMemoryJobRepository>,
    pub executions: Arc<InMemoryExecutionRepository>,
    pub directory: Arc<InMemoryDirectoryRepository>,
    pub timers: Arc<TimerService>,
    pub email: Arc<RecordingChannel>,
    pub webhook: Arc<RecordingChannel>,
    pub runner: Arc<ScriptedRunner>,
    dispatcher: NotificationDispatcher,
    handles: Vec<JoinHandle<()>>,
}

impl TestWorld {
    pub async fn new(
        runner: ScriptedRunner,
        mutate_config: impl FnOnce(&mut VigilConfig),
    ) -> Self {
        let mut config = VigilConfig::default();
        config.engine_partitions = 2;
        config.dispatcher_workers = 2;
        config.executor_workers = 1;
        config.timer_tick_ms = 5;
        config.dispatcher_poll_ms = 5;
        config.retry = vigil::domain::models::config::RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 5,
            max_backoff_ms: 50,
        };
        mutate_config(&mut config);

        let alerts = Arc::new(InMemoryAlertRepository::new());
        let jobs = Arc::new(InMemoryJobRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let directory = Arc::new(InMemoryDirectoryRepository::new());
        let clock = Arc::new(VirtualClock::new(Utc::now()));
        let ids = Arc::new(SequentialMinter::new());

        let email = Arc::new(RecordingChannel::new(ChannelKind::Email));
        let webhook = Arc::new(RecordingChannel::new(ChannelKind::Webhook));
        let runner = Arc::new(runner);

        let suppression = Arc::new(SuppressionIndex::new(&config));
        let (engine_handle, receivers) =
            EngineHandle::channels(config.engine_partitions, config.ingress_queue_capacity);
        let retry = RetryPolicy::from(&config.retry);

        let dispatcher = NotificationDispatcher::new(
            jobs.clone(),
            alerts.clone(),
            directory.clone(),
            Arc::new(TemplateRegistry::with_builtins()),
            vec![
                Arc::clone(&email) as Arc<dyn Channel>,
                Arc::clone(&webhook) as Arc<dyn Channel>,
            ],
            engine_handle.clone(),
            clock.clone() as Arc<dyn Clock>,
            retry.clone(),
            DispatcherSettings::from(&config),
        );

        let executor = RemediationExecutor::new(
            executions.clone(),
            alerts.clone(),
            directory.clone(),
            Arc::clone(&runner) as Arc<dyn RemediationRunner>,
            engine_handle.clone(),
            clock.clone() as Arc<dyn Clock>,
            retry,
            ExecutorSettings::from(&config),
        );

        let timers = Arc::new(TimerService::new(
            clock.clone() as Arc<dyn Clock>,
            config.timer_tick_ms,
        ));
        let oncall = Arc::new(OnCallResolver::new(
            directory.clone(),
            config.default_contact_id,
        ));

        let engine = Arc::new(EscalationEngine::new(
            alerts.clone(),
            jobs.clone(),
            executions.clone(),
            directory.clone(),
            suppression.clone(),
            oncall,
            dispatcher.handle(),
            executor.handle(),
            timers.clone(),
            clock.clone() as Arc<dyn Clock>,
            ids,
            config.clone(),
        ));

        let mut handles = Vec::new();
        handles.extend(engine.spawn(receivers));
        handles.extend(dispatcher.start());
        handles.extend(executor.start());
        handles.push(timers.spawn(engine_handle.clone()));

        let control = Arc::new(ControlSurface::new(
            engine_handle,
            alerts.clone(),
            executions.clone(),
            directory.clone(),
            suppression,
            clock.clone() as Arc<dyn Clock>,
            engine.stats(),
            config,
        ));

        Self {
            control,
            clock,
            alerts,
            jobs,
            executions,
            directory,
            timers,
            email,
            webhook,
            runner,
            dispatcher,
            handles,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn shutdown(mut self) {
        self.timers.stop();
        self.dispatcher.stop();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

/// A standard ingress event for tests.
pub fn ingress(
    rule: &str,
    severity: AlertSeverity,
    source: &str,
    constitutional: bool,
    at: DateTime<Utc>,
) -> IngressEvent {
    IngressEvent {
        rule_name: rule.to_string(),
        severity,
        message: format!("{rule} fired on {source}"),
        source: source.to_string(),
        labels: BTreeMap::from([("service".to_string(), source.to_string())]),
        annotations: BTreeMap::new(),
        constitutional_flag: constitutional,
        external_id: None,
        timestamp: at,
    }
}

/// A contact reachable over email and webhook.
pub fn contact(name: &str, now: DateTime<Utc>) -> Contact {
    Contact::new(Uuid::new_v4(), name, now)
        .with_address(ChannelKind::Email, format!("{name}@example.org"))
        .with_address(ChannelKind::Webhook, format!("https://hooks.example/{name}"))
}

/// Poll an async condition until it holds or a few seconds elapse.
#[macro_export]
macro_rules! wait_until {
    ($cond:expr) => {{
        let mut satisfied = false;
        for _ in 0..400 {
            if $cond {
                satisfied = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(satisfied, "condition not reached in time: {}", stringify!($cond));
    }};
}

/// The single live alert in the store, by correlation lookup.
pub async fn live_alert(world: &TestWorld, correlation_key: &str) -> Option<Alert> {
    world
        .alerts
        .find_live_by_correlation(correlation_key)
        .await
        .unwrap()
}
