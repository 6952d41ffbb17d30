//! On-call resolution.
//!
//! Maps `(team, instant)` to the responsible contact by consulting the
//! team's schedules and overrides.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::ports::DirectoryRepository;

/// Resolves the contact responsible for a team at a given instant.
pub struct OnCallResolver {
    directory: Arc<dyn DirectoryRepository>,
    /// Fallback when a team has no members and no active schedule
    default_contact_id: Option<Uuid>,
}

impl OnCallResolver {
    pub fn new(
        directory: Arc<dyn DirectoryRepository>,
        default_contact_id: Option<Uuid>,
    ) -> Self {
        Self {
            directory,
            default_contact_id,
        }
    }

    /// Resolve `(team, now)` to a contact.
    ///
    /// Selection: among the team's schedules active at `now`, the one with
    /// the greatest `start` wins; ties break on the lexicographically
    /// smallest schedule ID. An override contact beats the primary. With no
    /// active schedule the team's first listed member is used; with no
    /// members, the configured default contact (or none).
    pub async fn resolve(
        &self,
        team_id: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Uuid>> {
        let schedules = self.directory.list_schedules_for_team(team_id).await?;

        let selected = schedules
            .iter()
            .filter(|s| s.is_active_at(now))
            .max_by(|a, b| {
                a.start
                    .cmp(&b.start)
                    // Equal starts: smaller ID wins, so it is the "max"
                    // under a reversed ID comparison.
                    .then_with(|| b.id.to_string().cmp(&a.id.to_string()))
            });

        if let Some(schedule) = selected {
            return Ok(Some(schedule.responsible_contact()));
        }

        // No active schedule: fall back to the team's first listed member.
        match self.directory.get_team(team_id).await? {
            Some(team) if !team.members.is_empty() => Ok(Some(team.members[0])),
            Some(team) => {
                warn!(
                    team_id = %team_id,
                    team_name = %team.name,
                    "Team has no members; falling back to default contact"
                );
                Ok(self.default_contact_id)
            }
            None => {
                warn!(team_id = %team_id, "Unknown team in escalation target");
                Ok(self.default_contact_id)
            }
        }
    }
}
