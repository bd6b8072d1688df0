use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::sse::Sse,
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::operator::OperatorStreamQuery,
    error::AppError,
    services::{
        observer_service,
        sse_service::{self, StreamKind},
    },
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/operator",
    tag = "sse",
    params(OperatorStreamQuery),
    responses(
        (status = 200, description = "Operator projection stream", content_type = "text/event-stream", body = String),
        (status = 401, description = "Missing or invalid operator token")
    )
)]
/// Stream the operator console projection.
pub async fn operator_stream(
    State(state): State<SharedState>,
    Query(query): Query<OperatorStreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, AppError> {
    let events = sse_service::subscribe_operator(&state, query)?;
    info!("New operator SSE connection");
    Ok(sse_service::to_sse_stream(events, StreamKind::Operator))
}

#[utoipa::path(
    get,
    path = "/sse/team/{id}",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Team identifier")),
    responses((status = 200, description = "Team projection stream", content_type = "text/event-stream", body = String))
)]
/// Stream the projection for one team client.
pub async fn team_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    info!(team_id = %id, "New team SSE connection");
    let events = observer_service::team_stream(state, id);
    sse_service::to_sse_stream(events, StreamKind::Team(id))
}

#[utoipa::path(
    get,
    path = "/sse/display",
    tag = "sse",
    responses((status = 200, description = "Display projection stream", content_type = "text/event-stream", body = String))
)]
/// Stream the shared display projection.
pub async fn display_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    info!("New display SSE connection");
    let events = observer_service::display_stream(state);
    sse_service::to_sse_stream(events, StreamKind::Display)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/operator", get(operator_stream))
        .route("/sse/team/{id}", get(team_stream))
        .route("/sse/display", get(display_stream))
}
