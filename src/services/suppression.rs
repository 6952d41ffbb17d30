//! Suppression index.
//!
//! Answers "should this incoming alert enter the state machine?" from
//! three sources, first match wins:
//! 1. an active maintenance window with notification suppression,
//! 2. a cooldown stamped by the last delivered notification for the same
//!    `(rule_name, source)`,
//! 3. a live alert with the same correlation key (merge, don't duplicate).

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{Alert, AlertSeverity, IngressEvent, MaintenanceWindow, VigilConfig};

/// Outcome of the suppression check for one incoming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressionDecision {
    /// Record for audit, no state machine entry
    Suppress(SuppressReason),
    /// Fold into the existing live alert with the same correlation key
    MergeInto(Uuid),
    /// Admit as a new alert
    Admit,
}

/// Why an event was suppressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressReason {
    MaintenanceWindow(Uuid),
    Cooldown,
}

/// In-memory suppression state, rebuilt from the store at startup and
/// kept current by the engine and the control surface.
pub struct SuppressionIndex {
    inner: RwLock<Inner>,
    cooldowns: HashMap<AlertSeverity, Duration>,
}

struct Inner {
    windows: Vec<MaintenanceWindow>,
    /// Last delivered-notification instant per `(rule_name, source)`
    last_notification: HashMap<(String, String), DateTime<Utc>>,
}

impl SuppressionIndex {
    pub fn new(config: &VigilConfig) -> Self {
        let cooldowns = [
            AlertSeverity::Info,
            AlertSeverity::Warning,
            AlertSeverity::Critical,
            AlertSeverity::Emergency,
        ]
        .into_iter()
        .map(|s| (s, Duration::seconds(config.cooldown_secs(s) as i64)))
        .collect();

        Self {
            inner: RwLock::new(Inner {
                windows: Vec::new(),
                last_notification: HashMap::new(),
            }),
            cooldowns,
        }
    }

    /// Replace the known maintenance windows (startup load or admin update).
    pub fn load_windows(&self, windows: Vec<MaintenanceWindow>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.windows = windows;
    }

    /// Insert or replace one window.
    pub fn upsert_window(&self, window: MaintenanceWindow) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = inner.windows.iter_mut().find(|w| w.id == window.id) {
            *existing = window;
        } else {
            inner.windows.push(window);
        }
    }

    /// Stamp the cooldown for `(rule_name, source)`. Called when a
    /// notification is actually delivered, never on mere admission.
    pub fn record_notification(
        &self,
        rule_name: &str,
        source: &str,
        delivered_at: DateTime<Utc>,
    ) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .last_notification
            .insert((rule_name.to_string(), source.to_string()), delivered_at);
    }

    /// Decide what to do with an incoming event.
    ///
    /// `live_duplicate` is the live alert (if any) found under the event's
    /// correlation key; the caller scans the store for it so this check
    /// stays synchronous.
    pub fn decide(
        &self,
        event: &IngressEvent,
        live_duplicate: Option<&Alert>,
        now: DateTime<Utc>,
    ) -> SuppressionDecision {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

        // 1. Active maintenance window with notification suppression
        for window in &inner.windows {
            if window.suppress_notifications
                && window.is_active_at(now)
                && window.matches(&event.source, &event.labels)
            {
                return SuppressionDecision::Suppress(SuppressReason::MaintenanceWindow(
                    window.id,
                ));
            }
        }

        // 2. Cooldown since the last delivered notification
        let key = (event.rule_name.clone(), event.source.clone());
        if let Some(last) = inner.last_notification.get(&key) {
            let cooldown = self
                .cooldowns
                .get(&event.severity)
                .copied()
                .unwrap_or_else(Duration::zero);
            if *last + cooldown > now {
                return SuppressionDecision::Suppress(SuppressReason::Cooldown);
            }
        }

        // 3. Duplicate of a live alert
        if let Some(existing) = live_duplicate {
            if existing.status.is_live() {
                return SuppressionDecision::MergeInto(existing.id);
            }
        }

        SuppressionDecision::Admit
    }
}
