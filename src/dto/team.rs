use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        validation::{validate_evidence_url, validate_team_name},
        views::TeamSummary,
    },
    state::roster::ChallengeId,
};

/// Join the session, or resume with an id cached by the client.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RegisterTeamRequest {
    #[validate(custom(function = "validate_team_name"))]
    pub name: String,
    /// Id returned by an earlier registration.
    #[serde(default)]
    pub team_id: Option<Uuid>,
}

/// Registered (or resumed) team; the client caches `team.id`.
#[derive(Debug, Serialize, ToSchema)]
pub struct TeamRegistration {
    pub team: TeamSummary,
    /// The cached id matched an existing team.
    pub resumed: bool,
}

/// Evidence for a challenge.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmissionRequest {
    pub challenge_id: ChallengeId,
    #[validate(url, custom(function = "validate_evidence_url"))]
    pub url: String,
}

/// What a submission did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// Queued for review.
    Submitted,
    /// Already waiting for review; nothing written.
    AlreadyPending,
    /// Already graded; nothing written.
    AlreadyCompleted,
}

/// Response of a submission.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmissionReceipt {
    pub outcome: SubmissionOutcome,
    pub team: TeamSummary,
}
