use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        operator::{
            ActionResponse, GradeRequest, OperatorViewQuery, PauseSessionRequest,
            ResetConfirmRequest, ResetResponse, ResetUnlockResponse, SessionCommandResponse,
            SignInRequest, SignInResponse, StartSessionRequest,
        },
        views::{OperatorView, TeamInspection, TeamSummary},
    },
    error::AppError,
    services::{
        auth_service, observer_service, projection::OperatorLocalState, roster_service,
        session_service,
    },
    state::SharedState,
};

const OPERATOR_TOKEN_HEADER: &str = "x-operator-token";

/// Operator console routes; everything but sign-in requires an operator token.
pub fn router(state: SharedState) -> Router<SharedState> {
    let protected = Router::new()
        .route("/operator/sign-out", post(sign_out))
        .route("/operator/session/start", post(start_session))
        .route("/operator/session/pause", post(pause_session))
        .route("/operator/session/resume", post(resume_session))
        .route("/operator/session/stop", post(stop_session))
        .route("/operator/session/reveal", post(reveal_session))
        .route("/operator/session/close", post(close_session))
        .route("/operator/view", get(operator_view))
        .route("/operator/teams/{id}", get(inspect_team))
        .route("/operator/teams/{id}/grade", post(grade_submission))
        .route("/operator/reset/unlock", post(unlock_reset))
        .route("/operator/reset/lock", post(lock_reset))
        .route("/operator/reset/confirm", post(confirm_reset))
        .route_layer(middleware::from_fn_with_state(state, require_operator_token));

    Router::new()
        .route("/operator/sign-in", post(sign_in))
        .merge(protected)
}

/// Exchange the operator password for a token.
#[utoipa::path(
    post,
    path = "/operator/sign-in",
    tag = "operator",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = SignInResponse),
        (status = 401, description = "Wrong password or sign-in disabled")
    )
)]
pub async fn sign_in(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SignInRequest>>,
) -> Result<Json<SignInResponse>, AppError> {
    Ok(Json(auth_service::sign_in(&state, payload)?))
}

/// Revoke the calling operator's token.
#[utoipa::path(
    post,
    path = "/operator/sign-out",
    tag = "operator",
    params(("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in")),
    responses((status = 200, description = "Signed out", body = ActionResponse))
)]
pub async fn sign_out(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Json<ActionResponse> {
    let token = headers
        .get(OPERATOR_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    Json(auth_service::sign_out(&state, token))
}

/// Start (or restart) the countdown.
#[utoipa::path(
    post,
    path = "/operator/session/start",
    tag = "operator",
    params(("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in")),
    request_body = StartSessionRequest,
    responses((status = 200, description = "Session started", body = SessionCommandResponse))
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<StartSessionRequest>>,
) -> Result<Json<SessionCommandResponse>, AppError> {
    Ok(Json(session_service::start(&state, payload).await?))
}

/// Freeze the running countdown.
#[utoipa::path(
    post,
    path = "/operator/session/pause",
    tag = "operator",
    params(("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in")),
    request_body = PauseSessionRequest,
    responses(
        (status = 200, description = "Session paused", body = SessionCommandResponse),
        (status = 409, description = "Countdown is not running")
    )
)]
pub async fn pause_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<PauseSessionRequest>>,
) -> Result<Json<SessionCommandResponse>, AppError> {
    Ok(Json(session_service::pause(&state, payload).await?))
}

/// Continue a paused countdown.
#[utoipa::path(
    post,
    path = "/operator/session/resume",
    tag = "operator",
    params(("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in")),
    responses(
        (status = 200, description = "Session resumed", body = SessionCommandResponse),
        (status = 409, description = "Countdown is not paused")
    )
)]
pub async fn resume_session(
    State(state): State<SharedState>,
) -> Result<Json<SessionCommandResponse>, AppError> {
    Ok(Json(session_service::resume(&state).await?))
}

/// Abort the round and go back to idle.
#[utoipa::path(
    post,
    path = "/operator/session/stop",
    tag = "operator",
    params(("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in")),
    responses((status = 200, description = "Session stopped", body = SessionCommandResponse))
)]
pub async fn stop_session(
    State(state): State<SharedState>,
) -> Result<Json<SessionCommandResponse>, AppError> {
    Ok(Json(session_service::stop(&state).await?))
}

/// Reveal the results.
#[utoipa::path(
    post,
    path = "/operator/session/reveal",
    tag = "operator",
    params(("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in")),
    responses((status = 200, description = "Results revealed", body = SessionCommandResponse))
)]
pub async fn reveal_session(
    State(state): State<SharedState>,
) -> Result<Json<SessionCommandResponse>, AppError> {
    Ok(Json(session_service::reveal(&state).await?))
}

/// Close the session for good.
#[utoipa::path(
    post,
    path = "/operator/session/close",
    tag = "operator",
    params(("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in")),
    responses((status = 200, description = "Session closed", body = SessionCommandResponse))
)]
pub async fn close_session(
    State(state): State<SharedState>,
) -> Result<Json<SessionCommandResponse>, AppError> {
    Ok(Json(session_service::close(&state).await?))
}

/// One-shot operator console projection.
#[utoipa::path(
    get,
    path = "/operator/view",
    tag = "operator",
    params(
        ("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in"),
        OperatorViewQuery
    ),
    responses((status = 200, description = "Operator projection", body = OperatorView))
)]
pub async fn operator_view(
    State(state): State<SharedState>,
    Query(query): Query<OperatorViewQuery>,
) -> Result<Json<OperatorView>, AppError> {
    let local = OperatorLocalState::new(query.search, query.inspect);
    Ok(Json(observer_service::operator_snapshot(&state, local).await?))
}

/// Details of a single team.
#[utoipa::path(
    get,
    path = "/operator/teams/{id}",
    tag = "operator",
    params(
        ("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in"),
        ("id" = Uuid, Path, description = "Team identifier")
    ),
    responses(
        (status = 200, description = "Team details", body = TeamInspection),
        (status = 404, description = "Unknown team")
    )
)]
pub async fn inspect_team(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TeamInspection>, AppError> {
    Ok(Json(roster_service::inspect(&state, id).await?))
}

/// Accept a pending submission and credit points.
#[utoipa::path(
    post,
    path = "/operator/teams/{id}/grade",
    tag = "operator",
    params(
        ("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in"),
        ("id" = Uuid, Path, description = "Team identifier")
    ),
    request_body = GradeRequest,
    responses(
        (status = 200, description = "Submission graded", body = TeamSummary),
        (status = 404, description = "Unknown team or challenge not pending")
    )
)]
pub async fn grade_submission(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<GradeRequest>>,
) -> Result<Json<TeamSummary>, AppError> {
    Ok(Json(roster_service::grade(&state, id, payload).await?))
}

/// First reset step.
#[utoipa::path(
    post,
    path = "/operator/reset/unlock",
    tag = "operator",
    params(("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in")),
    responses((status = 200, description = "Reset unlocked", body = ResetUnlockResponse))
)]
pub async fn unlock_reset(
    State(state): State<SharedState>,
) -> Result<Json<ResetUnlockResponse>, AppError> {
    Ok(Json(roster_service::unlock_reset(&state).await?))
}

/// Cancel a reset unlock.
#[utoipa::path(
    post,
    path = "/operator/reset/lock",
    tag = "operator",
    params(("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in")),
    responses((status = 200, description = "Reset locked", body = ActionResponse))
)]
pub async fn lock_reset(State(state): State<SharedState>) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(roster_service::lock_reset(&state).await?))
}

/// Delete every team and put the session back to idle.
#[utoipa::path(
    post,
    path = "/operator/reset/confirm",
    tag = "operator",
    params(("X-Operator-Token" = String, Header, description = "Token issued by /operator/sign-in")),
    request_body = ResetConfirmRequest,
    responses(
        (status = 200, description = "Session reset", body = ResetResponse),
        (status = 401, description = "Reset locked, expired or wrong token")
    )
)]
pub async fn confirm_reset(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ResetConfirmRequest>>,
) -> Result<Json<ResetResponse>, AppError> {
    Ok(Json(roster_service::confirm_reset(&state, payload).await?))
}

async fn require_operator_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(OPERATOR_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    auth_service::authorize(&state, token)?;
    Ok(next.run(req).await)
}
