//! Runtime wiring.
//!
//! Process-wide assembly with explicit init and teardown: builds the
//! pool and repositories, rebuilds the suppression index, spawns the
//! engine partitions, dispatcher and executor pools, the timer service,
//! and the retention sweeper, and hands back the control surface.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::domain::models::{ImpactLevel, RemediationAction, VigilConfig};
use crate::domain::ports::{
    AlertRepository, Channel, Clock, DirectoryRepository, ExecutionRepository, IdMinter,
    JobRepository, RemediationRunner,
};
use crate::infrastructure::clock::{SystemClock, UuidMinter};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::database::{
    all_embedded_migrations, create_pool, Migrator, PoolConfig, SqliteAlertRepository,
    SqliteDirectoryRepository, SqliteExecutionRepository, SqliteJobRepository,
};
use crate::infrastructure::memory::{
    InMemoryAlertRepository, InMemoryDirectoryRepository, InMemoryExecutionRepository,
    InMemoryJobRepository,
};
use crate::infrastructure::process_runner::ProcessRunner;
use crate::services::control::ControlSurface;
use crate::services::dispatcher::{DispatcherSettings, NotificationDispatcher};
use crate::services::engine::{EngineHandle, EscalationEngine};
use crate::services::executor::{ExecutorSettings, RemediationExecutor};
use crate::services::oncall::OnCallResolver;
use crate::services::retention::RetentionSweeper;
use crate::services::retry::RetryPolicy;
use crate::services::suppression::SuppressionIndex;
use crate::services::templates::TemplateRegistry;
use crate::services::timer::TimerService;

/// Which store backend the runtime assembles.
pub enum StoreBackend {
    /// SQLite at the configured path (WAL mode, migrated at startup)
    Sqlite,
    /// Volatile in-memory repositories (tests, ephemeral embedding)
    InMemory,
}

struct Repositories {
    alerts: Arc<dyn AlertRepository>,
    jobs: Arc<dyn JobRepository>,
    executions: Arc<dyn ExecutionRepository>,
    directory: Arc<dyn DirectoryRepository>,
}

/// A fully wired engine instance.
pub struct VigilRuntime {
    control: Arc<ControlSurface>,
    dispatcher: NotificationDispatcher,
    timers: Arc<TimerService>,
    sweeper: Arc<RetentionSweeper>,
    handles: Vec<JoinHandle<()>>,
}

impl VigilRuntime {
    /// Assemble and start the engine with the given channel adapters.
    ///
    /// `runner` defaults to the subprocess runner when not supplied.
    pub async fn start(
        config: VigilConfig,
        backend: StoreBackend,
        channels: Vec<Arc<dyn Channel>>,
        runner: Option<Arc<dyn RemediationRunner>>,
    ) -> Result<Self> {
        ConfigLoader::validate(&config).context("Invalid configuration")?;

        let repos = match backend {
            StoreBackend::Sqlite => Self::sqlite_repositories(&config).await?,
            StoreBackend::InMemory => Repositories {
                alerts: Arc::new(InMemoryAlertRepository::new()),
                jobs: Arc::new(InMemoryJobRepository::new()),
                executions: Arc::new(InMemoryExecutionRepository::new()),
                directory: Arc::new(InMemoryDirectoryRepository::new()),
            },
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids: Arc<dyn IdMinter> = Arc::new(UuidMinter);
        Self::assemble(config, repos, channels, runner, clock, ids).await
    }

    async fn sqlite_repositories(config: &VigilConfig) -> Result<Repositories> {
        let database_url = format!("sqlite:{}", config.store.path);
        let pool = create_pool(
            &database_url,
            Some(PoolConfig {
                max_connections: config.store.max_connections,
                ..PoolConfig::default()
            }),
        )
        .await
        .context("Failed to create database pool")?;

        let applied = Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .context("Failed to run database migrations")?;
        if applied > 0 {
            info!(applied, "Applied database migrations");
        }

        Ok(Repositories {
            alerts: Arc::new(SqliteAlertRepository::new(pool.clone())),
            jobs: Arc::new(SqliteJobRepository::new(pool.clone())),
            executions: Arc::new(SqliteExecutionRepository::new(pool.clone())),
            directory: Arc::new(SqliteDirectoryRepository::new(pool)),
        })
    }

    async fn assemble(
        config: VigilConfig,
        repos: Repositories,
        channels: Vec<Arc<dyn Channel>>,
        runner: Option<Arc<dyn RemediationRunner>>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdMinter>,
    ) -> Result<Self> {
        install_builtin_actions(repos.directory.as_ref(), ids.as_ref()).await?;

        // Suppression state is rebuilt from the store on every start.
        let suppression = Arc::new(SuppressionIndex::new(&config));
        suppression.load_windows(
            repos
                .directory
                .list_maintenance_windows()
                .await
                .context("Failed to load maintenance windows")?,
        );

        let (engine_handle, receivers) = EngineHandle::channels(
            config.engine_partitions,
            config.ingress_queue_capacity,
        );

        let retry = RetryPolicy::from(&config.retry);
        let templates = Arc::new(TemplateRegistry::with_builtins());

        let dispatcher = NotificationDispatcher::new(
            Arc::clone(&repos.jobs),
            Arc::clone(&repos.alerts),
            Arc::clone(&repos.directory),
            templates,
            channels,
            engine_handle.clone(),
            Arc::clone(&clock),
            retry.clone(),
            DispatcherSettings::from(&config),
        );

        let runner = runner
            .unwrap_or_else(|| Arc::new(ProcessRunner::new(config.stdout_tail_bytes)));
        let executor = RemediationExecutor::new(
            Arc::clone(&repos.executions),
            Arc::clone(&repos.alerts),
            Arc::clone(&repos.directory),
            runner,
            engine_handle.clone(),
            Arc::clone(&clock),
            retry.clone(),
            ExecutorSettings::from(&config),
        );

        let timers = Arc::new(TimerService::new(Arc::clone(&clock), config.timer_tick_ms));
        let oncall = Arc::new(OnCallResolver::new(
            Arc::clone(&repos.directory),
            config.default_contact_id,
        ));

        let engine = Arc::new(EscalationEngine::new(
            Arc::clone(&repos.alerts),
            Arc::clone(&repos.jobs),
            Arc::clone(&repos.executions),
            Arc::clone(&repos.directory),
            Arc::clone(&suppression),
            oncall,
            dispatcher.handle(),
            executor.handle(),
            Arc::clone(&timers),
            Arc::clone(&clock),
            ids,
            config.clone(),
        ));

        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&repos.alerts),
            Arc::clone(&repos.jobs),
            Arc::clone(&repos.executions),
            Arc::clone(&clock),
            &config,
        ));

        let mut handles = Vec::new();
        handles.extend(engine.spawn(receivers));
        handles.extend(dispatcher.start());
        handles.extend(executor.start());
        handles.push(timers.spawn(engine_handle.clone()));
        handles.push(sweeper.spawn());

        let control = Arc::new(ControlSurface::new(
            engine_handle,
            repos.alerts,
            repos.executions,
            repos.directory,
            suppression,
            clock,
            engine.stats(),
            config,
        ));

        info!("Vigil runtime started");
        Ok(Self {
            control,
            dispatcher,
            timers,
            sweeper,
            handles,
        })
    }

    /// The facade external collaborators talk to.
    pub fn control(&self) -> Arc<ControlSurface> {
        Arc::clone(&self.control)
    }

    /// Wind the task families down and wait for them to exit.
    pub async fn shutdown(mut self) {
        info!("Vigil runtime shutting down");
        self.timers.stop();
        self.dispatcher.stop();
        self.sweeper.stop();

        for handle in &self.handles {
            handle.abort();
        }
        let _ = futures::future::join_all(self.handles.drain(..)).await;
    }
}

/// Seed the directory with the built-in remediation catalog. Existing
/// entries (by name) are left untouched so operators can override them.
async fn install_builtin_actions(
    directory: &dyn DirectoryRepository,
    ids: &dyn IdMinter,
) -> Result<()> {
    for action in builtin_actions(ids) {
        if directory.get_action_by_name(&action.name).await?.is_none() {
            directory.upsert_action(&action).await?;
        }
    }
    Ok(())
}

/// The remediation actions the engine maps rule names onto by default.
fn builtin_actions(ids: &dyn IdMinter) -> Vec<RemediationAction> {
    let now = Utc::now();
    let mk = |name: &str, command: &str, impact: ImpactLevel| {
        RemediationAction::new(ids.mint(), name, command, impact, now)
    };
    vec![
        mk(
            "service_restart",
            "scripts/remediation/restart_service.sh {service}",
            ImpactLevel::Medium,
        )
        .with_timeout_secs(120)
        .with_max_retries(2),
        mk(
            "service_isolation",
            "scripts/remediation/isolate_service.sh {service}",
            ImpactLevel::High,
        )
        .with_timeout_secs(60)
        .with_max_retries(1),
        mk(
            "health_check",
            "scripts/remediation/health_check.sh {service}",
            ImpactLevel::Low,
        )
        .with_timeout_secs(30),
        mk(
            "clear_cache",
            "scripts/remediation/clear_cache.sh {service}",
            ImpactLevel::Medium,
        )
        .with_timeout_secs(30)
        .with_max_retries(1),
        mk(
            "restart_database",
            "scripts/remediation/restart_database.sh",
            ImpactLevel::Critical,
        )
        .with_timeout_secs(60)
        .with_max_retries(1)
        .with_approval_required(true),
        mk(
            "scale_service",
            "scripts/remediation/scale_service.sh {service} 2",
            ImpactLevel::Medium,
        )
        .with_timeout_secs(120)
        .with_max_retries(1),
        mk(
            "quarantine_service",
            "scripts/remediation/quarantine_service.sh {service} --alert {alert_id}",
            ImpactLevel::High,
        )
        .with_timeout_secs(60)
        .with_max_retries(1),
    ]
}
