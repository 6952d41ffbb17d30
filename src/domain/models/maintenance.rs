//! Maintenance windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::SCHEMA_VERSION;

/// A time interval during which matching alerts are recorded but not
/// notified. Activity uses a half-open interval: `[start, end)` — an alert
/// arriving exactly at `end` is admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: Uuid,
    pub name: String,
    /// Sources covered by the window; empty means any source
    pub affected_sources: Vec<String>,
    /// Label selector; every pair must match the alert's labels
    pub label_selector: BTreeMap<String, String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub suppress_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u32,
    pub version: u64,
}

impl MaintenanceWindow {
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            affected_sources: Vec::new(),
            label_selector: BTreeMap::new(),
            start,
            end,
            suppress_notifications: true,
            created_at: now,
            updated_at: now,
            schema_version: SCHEMA_VERSION,
            version: 1,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.affected_sources.push(source.into());
        self
    }

    /// Whether the window covers the given instant. Half-open: the end
    /// instant itself is outside the window.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    /// Whether the window's selector matches the alert's source and labels.
    pub fn matches(&self, source: &str, labels: &BTreeMap<String, String>) -> bool {
        if !self.affected_sources.is_empty()
            && !self.affected_sources.iter().any(|s| s == source)
        {
            return false;
        }
        self.label_selector
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_half_open_interval() {
        let now = Utc::now();
        let window = MaintenanceWindow::new(
            Uuid::new_v4(),
            "db upgrade",
            now,
            now + Duration::minutes(10),
            now,
        );

        assert!(window.is_active_at(now));
        assert!(window.is_active_at(now + Duration::minutes(9)));
        // The end instant is excluded: an alert arriving exactly at end is
        // admitted.
        assert!(!window.is_active_at(now + Duration::minutes(10)));
        assert!(!window.is_active_at(now - Duration::seconds(1)));
    }

    #[test]
    fn test_source_matching() {
        let now = Utc::now();
        let window =
            MaintenanceWindow::new(Uuid::new_v4(), "w", now, now + Duration::hours(1), now)
                .with_source("svc-a");

        assert!(window.matches("svc-a", &BTreeMap::new()));
        assert!(!window.matches("svc-b", &BTreeMap::new()));
    }

    #[test]
    fn test_empty_sources_match_any() {
        let now = Utc::now();
        let window =
            MaintenanceWindow::new(Uuid::new_v4(), "w", now, now + Duration::hours(1), now);
        assert!(window.matches("anything", &BTreeMap::new()));
    }

    #[test]
    fn test_label_selector_requires_all_pairs() {
        let now = Utc::now();
        let mut window =
            MaintenanceWindow::new(Uuid::new_v4(), "w", now, now + Duration::hours(1), now);
        window
            .label_selector
            .insert("env".to_string(), "prod".to_string());

        let mut labels = BTreeMap::new();
        assert!(!window.matches("svc-a", &labels));
        labels.insert("env".to_string(), "prod".to_string());
        assert!(window.matches("svc-a", &labels));
        labels.insert("env".to_string(), "staging".to_string());
        assert!(!window.matches("svc-a", &labels));
    }
}
