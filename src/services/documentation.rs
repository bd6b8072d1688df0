use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Vibe Live Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::operator_stream,
        crate::routes::sse::team_stream,
        crate::routes::sse::display_stream,
        crate::routes::operator::sign_in,
        crate::routes::operator::sign_out,
        crate::routes::operator::start_session,
        crate::routes::operator::pause_session,
        crate::routes::operator::resume_session,
        crate::routes::operator::stop_session,
        crate::routes::operator::reveal_session,
        crate::routes::operator::close_session,
        crate::routes::operator::operator_view,
        crate::routes::operator::inspect_team,
        crate::routes::operator::grade_submission,
        crate::routes::operator::unlock_reset,
        crate::routes::operator::lock_reset,
        crate::routes::operator::confirm_reset,
        crate::routes::team::register_team,
        crate::routes::team::get_team,
        crate::routes::team::team_view,
        crate::routes::team::submit,
        crate::routes::public::get_session,
        crate::routes::public::get_challenges,
        crate::routes::public::get_display,
        crate::routes::public::get_leaderboard,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::sse::StreamError,
            crate::dto::views::OperatorView,
            crate::dto::views::TeamView,
            crate::dto::views::DisplayView,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent projection streams"),
        (name = "operator", description = "Operator console: session commands, grading and reset"),
        (name = "team", description = "Team registration and submissions"),
        (name = "public", description = "Read-only session state"),
    )
)]
pub struct ApiDoc;
