//! Contacts, teams, and on-call schedules.
//!
//! Administrative records referenced by escalation policies. The engine
//! reads them; it never owns or mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::SCHEMA_VERSION;

/// Kind of notification channel a message can be delivered over.
///
/// The wire format behind each kind is supplied by the host through a
/// channel adapter; the core only routes by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    Webhook,
    Slack,
    Pagerduty,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Webhook => "webhook",
            Self::Slack => "slack",
            Self::Pagerduty => "pagerduty",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            "webhook" => Some(Self::Webhook),
            "slack" => Some(Self::Slack),
            "pagerduty" => Some(Self::Pagerduty),
            _ => None,
        }
    }
}

/// A person (or paging target) notifications can be addressed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    /// Channel kinds in preference order
    pub preferred_channels: Vec<ChannelKind>,
    /// Delivery address per channel kind (email address, webhook URL, ...)
    pub addresses: BTreeMap<ChannelKind, String>,
    /// Constitutional clearance level, 1-10
    pub clearance_level: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u32,
    pub version: u64,
}

impl Contact {
    pub fn new(id: Uuid, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            preferred_channels: vec![ChannelKind::Email],
            addresses: BTreeMap::new(),
            clearance_level: 1,
            created_at: now,
            updated_at: now,
            schema_version: SCHEMA_VERSION,
            version: 1,
        }
    }

    /// Add a delivery address for a channel kind (builder method).
    pub fn with_address(mut self, kind: ChannelKind, address: impl Into<String>) -> Self {
        self.addresses.insert(kind, address.into());
        if !self.preferred_channels.contains(&kind) {
            self.preferred_channels.push(kind);
        }
        self
    }

    /// Delivery address for a channel kind, if configured.
    pub fn address_for(&self, kind: ChannelKind) -> Option<&str> {
        self.addresses.get(&kind).map(String::as_str)
    }
}

/// A group of contacts sharing an escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    /// Member contact IDs, in listed order (first member is the schedule
    /// fallback)
    pub members: Vec<Uuid>,
    pub escalation_policy_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u32,
    pub version: u64,
}

impl Team {
    pub fn new(id: Uuid, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            members: Vec::new(),
            escalation_policy_id: None,
            created_at: now,
            updated_at: now,
            schema_version: SCHEMA_VERSION,
            version: 1,
        }
    }

    pub fn with_member(mut self, contact_id: Uuid) -> Self {
        if !self.members.contains(&contact_id) {
            self.members.push(contact_id);
        }
        self
    }
}

/// An on-call rotation window for a team.
///
/// Active when `start <= now <= end`; an override contact wins over the
/// primary while present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnCallSchedule {
    pub id: Uuid,
    pub team_id: Uuid,
    pub primary_contact_id: Uuid,
    pub override_contact_id: Option<Uuid>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Rotation period in hours (default weekly)
    pub rotation_hours: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u32,
    pub version: u64,
}

impl OnCallSchedule {
    pub fn new(
        id: Uuid,
        team_id: Uuid,
        primary_contact_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            team_id,
            primary_contact_id,
            override_contact_id: None,
            start,
            end,
            rotation_hours: 168,
            created_at: start,
            updated_at: start,
            schema_version: SCHEMA_VERSION,
            version: 1,
        }
    }

    pub fn with_override(mut self, contact_id: Uuid) -> Self {
        self.override_contact_id = Some(contact_id);
        self
    }

    /// Whether the schedule covers the given instant (inclusive bounds).
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.end
    }

    /// The contact currently responsible under this schedule.
    pub fn responsible_contact(&self) -> Uuid {
        self.override_contact_id.unwrap_or(self.primary_contact_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_channel_kind_round_trip() {
        for kind in [
            ChannelKind::Email,
            ChannelKind::Sms,
            ChannelKind::Webhook,
            ChannelKind::Slack,
            ChannelKind::Pagerduty,
        ] {
            assert_eq!(ChannelKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ChannelKind::from_str("carrier-pigeon"), None);
    }

    #[test]
    fn test_contact_address_builder() {
        let contact = Contact::new(Uuid::new_v4(), "Ada", Utc::now())
            .with_address(ChannelKind::Webhook, "https://hooks.example/ada");

        assert_eq!(
            contact.address_for(ChannelKind::Webhook),
            Some("https://hooks.example/ada")
        );
        assert!(contact.preferred_channels.contains(&ChannelKind::Webhook));
        assert_eq!(contact.address_for(ChannelKind::Sms), None);
    }

    #[test]
    fn test_schedule_activity_and_override() {
        let now = Utc::now();
        let schedule = OnCallSchedule::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            now - Duration::hours(1),
            now + Duration::hours(1),
        );
        assert!(schedule.is_active_at(now));
        assert!(!schedule.is_active_at(now + Duration::hours(2)));

        let primary = schedule.primary_contact_id;
        assert_eq!(schedule.responsible_contact(), primary);

        let override_id = Uuid::new_v4();
        let schedule = schedule.with_override(override_id);
        assert_eq!(schedule.responsible_contact(), override_id);
    }

    #[test]
    fn test_team_member_dedup() {
        let member = Uuid::new_v4();
        let team = Team::new(Uuid::new_v4(), "platform", Utc::now())
            .with_member(member)
            .with_member(member);
        assert_eq!(team.members.len(), 1);
    }
}
