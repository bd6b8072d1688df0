use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod operator;
pub mod public;
pub mod sse;
pub mod team;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(operator::router(state.clone()))
        .merge(team::router())
        .merge(public::router());

    api_router.merge(docs::router()).with_state(state)
}
