//! Runtime configuration for the Vigil engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use super::alert::AlertSeverity;

/// Top-level configuration, loaded by the figment-based loader and
/// validated before the runtime starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Retention for resolved non-constitutional alerts
    #[serde(default = "default_alert_retention_days")]
    pub alert_retention_days: u32,

    /// Retention for constitutional-flagged alerts (7 years)
    #[serde(default = "default_constitutional_retention_days")]
    pub constitutional_retention_days: u32,

    /// Per-severity notification cooldown in seconds
    #[serde(default = "default_cooldowns")]
    pub default_cooldown_secs: BTreeMap<AlertSeverity, u64>,

    /// Dispatcher worker pool size
    #[serde(default = "default_dispatcher_workers")]
    pub dispatcher_workers: usize,

    /// Executor worker pool size (small; remediations are expensive)
    #[serde(default = "default_executor_workers")]
    pub executor_workers: usize,

    /// Bounded ingress queue capacity; ingress is rejected when full
    #[serde(default = "default_ingress_queue_capacity")]
    pub ingress_queue_capacity: usize,

    /// Number of engine partitions (per-alert serialization shards)
    #[serde(default = "default_engine_partitions")]
    pub engine_partitions: usize,

    /// Policy attached to non-constitutional alerts
    #[serde(default)]
    pub default_policy_id: Option<Uuid>,

    /// Policy attached to constitutional-flagged alerts
    #[serde(default)]
    pub constitutional_policy_id: Option<Uuid>,

    /// Hard ceiling on escalation level across all policies
    #[serde(default = "default_max_escalation_level")]
    pub max_escalation_level: u32,

    /// Safety kill-switch: refuse critical-impact remediations
    #[serde(default)]
    pub remediation_global_killswitch: bool,

    /// Master toggle for automated remediation
    #[serde(default = "default_true")]
    pub remediation_enabled: bool,

    /// Fraction of dispatcher workers reserved for constitutional jobs
    #[serde(default = "default_constitutional_fraction")]
    pub constitutional_channel_partition_fraction: f64,

    /// Label keys folded into the correlation key
    #[serde(default = "default_correlation_label_keys")]
    pub correlation_label_keys: Vec<String>,

    /// Fallback contact when on-call resolution comes up empty
    #[serde(default)]
    pub default_contact_id: Option<Uuid>,

    /// Retention sweep interval in seconds
    #[serde(default = "default_retention_sweep_interval_secs")]
    pub retention_sweep_interval_secs: u64,

    /// Timer service tick in milliseconds
    #[serde(default = "default_timer_tick_ms")]
    pub timer_tick_ms: u64,

    /// Dispatcher due-job poll interval in milliseconds
    #[serde(default = "default_dispatcher_poll_ms")]
    pub dispatcher_poll_ms: u64,

    /// Per-job delivery attempt ceiling
    #[serde(default = "default_job_max_attempts")]
    pub job_max_attempts: u32,

    /// Per-job delivery deadline in seconds
    #[serde(default = "default_job_deadline_secs")]
    pub job_deadline_secs: u64,

    /// Bytes of stdout/stderr tail retained per execution
    #[serde(default = "default_stdout_tail_bytes")]
    pub stdout_tail_bytes: usize,

    /// Channel-send deadline handed to adapters, in seconds
    #[serde(default = "default_channel_send_deadline_secs")]
    pub channel_send_deadline_secs: u64,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LogConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            alert_retention_days: default_alert_retention_days(),
            constitutional_retention_days: default_constitutional_retention_days(),
            default_cooldown_secs: default_cooldowns(),
            dispatcher_workers: default_dispatcher_workers(),
            executor_workers: default_executor_workers(),
            ingress_queue_capacity: default_ingress_queue_capacity(),
            engine_partitions: default_engine_partitions(),
            default_policy_id: None,
            constitutional_policy_id: None,
            max_escalation_level: default_max_escalation_level(),
            remediation_global_killswitch: false,
            remediation_enabled: true,
            constitutional_channel_partition_fraction: default_constitutional_fraction(),
            correlation_label_keys: default_correlation_label_keys(),
            default_contact_id: None,
            retention_sweep_interval_secs: default_retention_sweep_interval_secs(),
            timer_tick_ms: default_timer_tick_ms(),
            dispatcher_poll_ms: default_dispatcher_poll_ms(),
            job_max_attempts: default_job_max_attempts(),
            job_deadline_secs: default_job_deadline_secs(),
            stdout_tail_bytes: default_stdout_tail_bytes(),
            channel_send_deadline_secs: default_channel_send_deadline_secs(),
            store: StoreConfig::default(),
            logging: LogConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl VigilConfig {
    /// Cooldown for a severity, falling back to the built-in defaults.
    pub fn cooldown_secs(&self, severity: AlertSeverity) -> u64 {
        self.default_cooldown_secs
            .get(&severity)
            .copied()
            .unwrap_or_else(|| builtin_cooldown(severity))
    }

    /// Number of dispatcher workers reserved for constitutional jobs.
    pub fn constitutional_workers(&self) -> usize {
        if self.dispatcher_workers == 0 {
            return 0;
        }
        let reserved = (self.dispatcher_workers as f64
            * self.constitutional_channel_partition_fraction)
            .ceil() as usize;
        reserved.min(self.dispatcher_workers.saturating_sub(1))
    }
}

/// Database location and pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files (optional, if None logs only to stdout)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enable_stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Backoff parameters shared by store retries and dispatcher retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn builtin_cooldown(severity: AlertSeverity) -> u64 {
    match severity {
        AlertSeverity::Info => 3600,
        AlertSeverity::Warning => 900,
        AlertSeverity::Critical => 300,
        AlertSeverity::Emergency => 60,
    }
}

fn default_cooldowns() -> BTreeMap<AlertSeverity, u64> {
    [
        AlertSeverity::Info,
        AlertSeverity::Warning,
        AlertSeverity::Critical,
        AlertSeverity::Emergency,
    ]
    .into_iter()
    .map(|s| (s, builtin_cooldown(s)))
    .collect()
}

fn default_alert_retention_days() -> u32 {
    30
}

fn default_constitutional_retention_days() -> u32 {
    2555
}

fn default_dispatcher_workers() -> usize {
    4
}

fn default_executor_workers() -> usize {
    2
}

fn default_ingress_queue_capacity() -> usize {
    1024
}

fn default_engine_partitions() -> usize {
    4
}

fn default_max_escalation_level() -> u32 {
    3
}

fn default_constitutional_fraction() -> f64 {
    0.25
}

fn default_correlation_label_keys() -> Vec<String> {
    vec!["service".to_string()]
}

fn default_retention_sweep_interval_secs() -> u64 {
    3600
}

fn default_timer_tick_ms() -> u64 {
    250
}

fn default_dispatcher_poll_ms() -> u64 {
    250
}

fn default_job_max_attempts() -> u32 {
    5
}

fn default_job_deadline_secs() -> u64 {
    900
}

fn default_stdout_tail_bytes() -> usize {
    4096
}

fn default_channel_send_deadline_secs() -> u64 {
    10
}

fn default_db_path() -> String {
    ".vigil/vigil.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}
