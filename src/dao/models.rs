use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DefaultOnError, TimestampMilliSeconds, serde_as};

use crate::state::{
    roster::{ChallengeId, Team},
    session::{SessionConfig, SessionPatch, SessionStatus},
};

/// Field names of the stored documents, shared by patches and atomic updates.
pub mod fields {
    pub const STATUS: &str = "status";
    pub const IS_RUNNING: &str = "isRunning";
    pub const END_TIME: &str = "endTime";
    pub const REMAINING_SECONDS: &str = "remainingSeconds";

    pub const SCORE: &str = "score";
    pub const COMPLETED_CHALLENGES: &str = "completedChallenges";
    pub const PENDING_CHALLENGE_IDS: &str = "pendingChallengeIds";
    pub const SUBMISSION_URL: &str = "submissionUrl";
    pub const PENDING_SUBMISSION: &str = "pendingSubmission";
    pub const LAST_ACTIVE_AT: &str = "lastActiveAt";
}

/// Wire form of [`SessionStatus`]. Unknown values read as idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatusEntity {
    #[default]
    Idle,
    Active,
    Revealed,
    Closed,
    #[serde(other)]
    Unknown,
}

impl From<SessionStatusEntity> for SessionStatus {
    fn from(value: SessionStatusEntity) -> Self {
        match value {
            SessionStatusEntity::Idle | SessionStatusEntity::Unknown => SessionStatus::Idle,
            SessionStatusEntity::Active => SessionStatus::Active,
            SessionStatusEntity::Revealed => SessionStatus::Revealed,
            SessionStatusEntity::Closed => SessionStatus::Closed,
        }
    }
}

impl From<SessionStatus> for SessionStatusEntity {
    fn from(value: SessionStatus) -> Self {
        match value {
            SessionStatus::Idle => SessionStatusEntity::Idle,
            SessionStatus::Active => SessionStatusEntity::Active,
            SessionStatus::Revealed => SessionStatusEntity::Revealed,
            SessionStatus::Closed => SessionStatusEntity::Closed,
        }
    }
}

/// Stored form of the `system/config` document.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfigEntity {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub status: SessionStatusEntity,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub is_running: bool,
    #[serde_as(as = "DefaultOnError<Option<TimestampMilliSeconds<i64>>>")]
    #[serde(default)]
    pub end_time: Option<SystemTime>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub remaining_seconds: Option<u64>,
}

impl From<SessionConfigEntity> for SessionConfig {
    fn from(entity: SessionConfigEntity) -> Self {
        Self {
            status: entity.status.into(),
            is_running: entity.is_running,
            end_time: entity.end_time,
            remaining_seconds: entity.remaining_seconds,
        }
    }
}

impl From<&SessionConfig> for SessionConfigEntity {
    fn from(config: &SessionConfig) -> Self {
        Self {
            status: config.status.into(),
            is_running: config.is_running,
            end_time: config.end_time,
            remaining_seconds: config.remaining_seconds,
        }
    }
}

/// Stored form of a team document. The team id is the document id.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEntity {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub name: String,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub score: u64,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub completed_challenges: Vec<ChallengeId>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub pending_challenge_ids: Vec<ChallengeId>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub submission_url: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub pending_submission: bool,
    #[serde_as(as = "DefaultOnError<Option<TimestampMilliSeconds<i64>>>")]
    #[serde(default)]
    pub joined_at: Option<SystemTime>,
    #[serde_as(as = "DefaultOnError<Option<TimestampMilliSeconds<i64>>>")]
    #[serde(default)]
    pub last_active_at: Option<SystemTime>,
}

impl TeamEntity {
    /// Rebuild the domain team; a missing registration time reads as the epoch.
    pub fn into_team(self, id: uuid::Uuid) -> Team {
        let completed: std::collections::BTreeSet<_> =
            self.completed_challenges.into_iter().collect();
        let pending = self
            .pending_challenge_ids
            .into_iter()
            .filter(|challenge| !completed.contains(challenge))
            .collect();

        Team {
            id,
            name: self.name,
            score: self.score,
            completed_challenges: completed,
            pending_challenge_ids: pending,
            submission_url: self.submission_url,
            pending_submission: self.pending_submission,
            joined_at: self.joined_at.unwrap_or(UNIX_EPOCH),
            last_active_at: self.last_active_at,
        }
    }
}

impl From<&Team> for TeamEntity {
    fn from(team: &Team) -> Self {
        Self {
            name: team.name.clone(),
            score: team.score,
            completed_challenges: team.completed_challenges.iter().copied().collect(),
            pending_challenge_ids: team.pending_challenge_ids.iter().copied().collect(),
            submission_url: team.submission_url.clone(),
            pending_submission: team.pending_submission,
            joined_at: Some(team.joined_at),
            last_active_at: team.last_active_at,
        }
    }
}

/// Epoch milliseconds as stored on the wire.
pub fn timestamp_millis(time: SystemTime) -> Value {
    let millis = match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_millis())
            .map(|millis| -millis)
            .unwrap_or(i64::MIN),
    };
    Value::from(millis)
}

/// Top-level fields written by a session patch, with `null` for cleared values.
pub fn session_patch_fields(patch: &SessionPatch) -> serde_json::Map<String, Value> {
    let mut document = serde_json::Map::new();

    if let Some(status) = patch.status {
        let entity = SessionStatusEntity::from(status);
        document.insert(
            fields::STATUS.into(),
            serde_json::to_value(entity).unwrap_or(Value::Null),
        );
    }
    if let Some(is_running) = patch.is_running {
        document.insert(fields::IS_RUNNING.into(), Value::Bool(is_running));
    }
    if let Some(end_time) = patch.end_time {
        document.insert(
            fields::END_TIME.into(),
            end_time.map(timestamp_millis).unwrap_or(Value::Null),
        );
    }
    if let Some(remaining) = patch.remaining_seconds {
        document.insert(
            fields::REMAINING_SECONDS.into(),
            remaining.map(Value::from).unwrap_or(Value::Null),
        );
    }

    document
}
