use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::views::{ChallengeSummary, DisplayView, LeaderboardEntry, TimerView},
    error::AppError,
    services::{observer_service, roster_service, session_service},
    state::SharedState,
};

/// Public read-only endpoints that expose the session state.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/public/session", get(get_session))
        .route("/public/challenges", get(get_challenges))
        .route("/public/display", get(get_display))
        .route("/public/leaderboard", get(get_leaderboard))
}

#[utoipa::path(
    get,
    path = "/public/session",
    tag = "public",
    responses((status = 200, description = "Session timer", body = TimerView))
)]
/// Return the session phase and the reconciled countdown.
pub async fn get_session(State(state): State<SharedState>) -> Result<Json<TimerView>, AppError> {
    let payload = session_service::current_timer(&state).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/public/challenges",
    tag = "public",
    responses((status = 200, description = "Challenge catalog", body = [ChallengeSummary]))
)]
/// Return the challenge catalog.
pub async fn get_challenges(State(state): State<SharedState>) -> Json<Vec<ChallengeSummary>> {
    let payload = state
        .config()
        .catalog()
        .challenges()
        .iter()
        .map(ChallengeSummary::from)
        .collect();
    Json(payload)
}

#[utoipa::path(
    get,
    path = "/public/display",
    tag = "public",
    responses((status = 200, description = "Display projection", body = DisplayView))
)]
/// Return what the shared display currently shows.
pub async fn get_display(State(state): State<SharedState>) -> Result<Json<DisplayView>, AppError> {
    let payload = observer_service::display_snapshot(&state).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/public/leaderboard",
    tag = "public",
    responses(
        (status = 200, description = "Top teams", body = [LeaderboardEntry]),
        (status = 409, description = "Results not revealed yet")
    )
)]
/// Return the top teams once results are revealed.
pub async fn get_leaderboard(
    State(state): State<SharedState>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let payload = roster_service::leaderboard(&state).await?;
    Ok(Json(payload))
}
