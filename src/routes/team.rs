use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        team::{RegisterTeamRequest, SubmissionReceipt, SubmissionRequest, TeamRegistration},
        views::{TeamSummary, TeamView},
    },
    error::AppError,
    services::{observer_service, roster_service},
    state::SharedState,
};

/// Routes used by team clients.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/teams", post(register_team))
        .route("/teams/{id}", get(get_team))
        .route("/teams/{id}/view", get(team_view))
        .route("/teams/{id}/submissions", post(submit))
}

/// Register a team, or resume one from a cached id.
#[utoipa::path(
    post,
    path = "/teams",
    tag = "team",
    request_body = RegisterTeamRequest,
    responses(
        (status = 200, description = "Team registered or resumed", body = TeamRegistration),
        (status = 400, description = "Blank name"),
        (status = 409, description = "Session closed")
    )
)]
pub async fn register_team(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<RegisterTeamRequest>>,
) -> Result<Json<TeamRegistration>, AppError> {
    Ok(Json(roster_service::register(&state, payload).await?))
}

/// Current state of a team.
#[utoipa::path(
    get,
    path = "/teams/{id}",
    tag = "team",
    params(("id" = Uuid, Path, description = "Team identifier")),
    responses(
        (status = 200, description = "Team", body = TeamSummary),
        (status = 404, description = "Unknown team")
    )
)]
pub async fn get_team(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TeamSummary>, AppError> {
    Ok(Json(roster_service::team(&state, id).await?))
}

/// One-shot team projection.
#[utoipa::path(
    get,
    path = "/teams/{id}/view",
    tag = "team",
    params(("id" = Uuid, Path, description = "Team identifier")),
    responses((status = 200, description = "Team projection", body = TeamView))
)]
pub async fn team_view(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TeamView>, AppError> {
    Ok(Json(observer_service::team_snapshot(&state, id).await?))
}

/// Submit evidence for a challenge.
#[utoipa::path(
    post,
    path = "/teams/{id}/submissions",
    tag = "team",
    params(("id" = Uuid, Path, description = "Team identifier")),
    request_body = SubmissionRequest,
    responses(
        (status = 200, description = "Submission receipt", body = SubmissionReceipt),
        (status = 400, description = "Unknown challenge or invalid link"),
        (status = 404, description = "Unknown team"),
        (status = 409, description = "Session not accepting submissions")
    )
)]
pub async fn submit(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmissionRequest>,
) -> Result<Json<SubmissionReceipt>, AppError> {
    Ok(Json(roster_service::submit(&state, id, payload).await?))
}
