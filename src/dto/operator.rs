use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{dto::views::TimerView, state::roster::ChallengeId};

#[derive(Debug, Deserialize, ToSchema, Validate)]
/// Credentials exchanged for an operator token.
pub struct SignInRequest {
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Opaque operator token to send back in the `X-Operator-Token` header.
pub struct SignInResponse {
    pub token: String,
}

#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
/// Start (or restart) the countdown.
pub struct StartSessionRequest {
    /// Countdown length, at most 600 minutes; the configured default when omitted.
    #[serde(default)]
    #[validate(range(min = 1, max = 600))]
    pub duration_minutes: Option<u64>,
}

#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
/// Freeze the countdown.
pub struct PauseSessionRequest {
    /// Value the operator saw when pressing pause, at most one full session (36000 s).
    #[serde(default)]
    #[validate(range(max = 36000))]
    pub remaining_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
/// Accept a pending submission.
pub struct GradeRequest {
    pub challenge_id: ChallengeId,
    /// Points to credit, at most 1000.
    #[validate(range(max = 1000))]
    pub points: u32,
}

#[derive(Debug, Serialize, ToSchema)]
/// Outcome of a session command.
pub struct SessionCommandResponse {
    pub message: String,
    pub version: usize,
    pub timer: TimerView,
}

#[derive(Debug, Serialize, ToSchema)]
/// First step of the reset: a short-lived confirmation token.
pub struct ResetUnlockResponse {
    pub token: String,
    pub expires_at: String,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
/// Second step of the reset.
pub struct ResetConfirmRequest {
    #[validate(length(min = 1))]
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Result of a completed reset.
pub struct ResetResponse {
    pub message: String,
    pub teams_removed: usize,
}

#[derive(Debug, Serialize, ToSchema)]
/// Generic acknowledgement.
pub struct ActionResponse {
    pub message: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
/// Local console state layered over the operator projection.
pub struct OperatorViewQuery {
    /// Case-insensitive team name filter.
    pub search: Option<String>,
    /// Team whose details are expanded.
    pub inspect: Option<Uuid>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
/// Query string of `/sse/operator`; EventSource cannot send headers.
pub struct OperatorStreamQuery {
    /// Operator token; the stream answers 401 without it.
    pub token: Option<String>,
    pub search: Option<String>,
    pub inspect: Option<Uuid>,
}
