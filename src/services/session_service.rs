//! Operator commands driving the shared session document. Every command goes through the
//! coordinator's plan/apply/abort cycle so only one write is in flight at a time.

use std::time::Duration;

use tracing::info;
use validator::Validate;

use crate::{
    dto::{
        operator::{PauseSessionRequest, SessionCommandResponse, StartSessionRequest},
        views::TimerView,
    },
    error::ServiceError,
    services::projection,
    state::{SessionCommand, SharedState},
};

/// Start (or restart) the countdown.
pub async fn start(
    state: &SharedState,
    request: StartSessionRequest,
) -> Result<SessionCommandResponse, ServiceError> {
    request.validate()?;
    let duration = request
        .duration_minutes
        .map(|minutes| Duration::from_secs(minutes * 60))
        .unwrap_or_else(|| state.config().default_duration());

    run_command(state, SessionCommand::Start { duration }, "started").await
}

/// Freeze the countdown at the value the operator saw.
pub async fn pause(
    state: &SharedState,
    request: PauseSessionRequest,
) -> Result<SessionCommandResponse, ServiceError> {
    request.validate()?;
    let command = SessionCommand::Pause {
        observed_remaining: request.remaining_seconds,
    };
    run_command(state, command, "paused").await
}

/// Continue a paused countdown.
pub async fn resume(state: &SharedState) -> Result<SessionCommandResponse, ServiceError> {
    run_command(state, SessionCommand::Resume, "resumed").await
}

/// Abort the round and go back to idle.
pub async fn stop(state: &SharedState) -> Result<SessionCommandResponse, ServiceError> {
    run_command(state, SessionCommand::Stop, "stopped").await
}

/// Show the results; repeating it changes nothing.
pub async fn reveal(state: &SharedState) -> Result<SessionCommandResponse, ServiceError> {
    run_command(state, SessionCommand::Reveal, "revealed").await
}

/// Lock the session for good.
pub async fn close(state: &SharedState) -> Result<SessionCommandResponse, ServiceError> {
    run_command(state, SessionCommand::Close, "closed").await
}

/// Session timer as stored right now.
pub async fn current_timer(state: &SharedState) -> Result<TimerView, ServiceError> {
    let session = state.repository().await?.load_config().await?;
    Ok(projection::current_timer(&session, state.now()))
}

async fn run_command(
    state: &SharedState,
    command: SessionCommand,
    message: &str,
) -> Result<SessionCommandResponse, ServiceError> {
    let repository = state.repository().await?;
    let label = command.label();

    let (_, next) = state
        .run_transition(command, |plan| async move {
            repository.apply_session_patch(&plan.patch).await?;
            Ok(())
        })
        .await?;

    let version = state.snapshot().await.version;
    info!(command = label, version, "session command applied");

    Ok(SessionCommandResponse {
        message: message.into(),
        version,
        timer: projection::current_timer(&next, state.now()),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dto::views::SessionPhaseView,
        state::{
            session::{MAX_SESSION_MINUTES, MAX_SESSION_SECONDS, SessionConfig, SessionStatus},
            test_support::memory_state,
        },
    };

    fn start_minutes(minutes: u64) -> StartSessionRequest {
        StartSessionRequest {
            duration_minutes: Some(minutes),
        }
    }

    #[tokio::test]
    async fn late_observer_sees_the_reconciled_countdown() {
        let (state, _, clock) = memory_state().await;
        start(&state, start_minutes(25)).await.unwrap();

        clock.advance(Duration::from_secs(10 * 60));
        let timer = current_timer(&state).await.unwrap();
        assert_eq!(timer.phase, SessionPhaseView::Running);
        assert!((899..=900).contains(&timer.remaining_seconds));
    }

    #[tokio::test]
    async fn pause_then_resume_keeps_the_remaining_value() {
        let (state, _, clock) = memory_state().await;
        start(&state, start_minutes(5)).await.unwrap();
        clock.advance(Duration::from_secs(40));

        let paused = pause(&state, PauseSessionRequest::default()).await.unwrap();
        assert_eq!(paused.timer.phase, SessionPhaseView::Paused);
        assert_eq!(paused.timer.remaining_seconds, 260);

        let resumed = resume(&state).await.unwrap();
        assert_eq!(resumed.timer.phase, SessionPhaseView::Running);
        assert!(resumed.timer.remaining_seconds.abs_diff(260) <= 1);
        assert_eq!(resumed.version, 3);
    }

    #[tokio::test]
    async fn pause_prefers_the_value_the_operator_saw() {
        let (state, _, _) = memory_state().await;
        start(&state, start_minutes(5)).await.unwrap();

        let paused = pause(
            &state,
            PauseSessionRequest {
                remaining_seconds: Some(123),
            },
        )
        .await
        .unwrap();
        assert_eq!(paused.timer.remaining_seconds, 123);

        let stored = state.repository().await.unwrap().load_config().await.unwrap();
        assert_eq!(stored.remaining_seconds, Some(123));
        assert!(!stored.is_running);
    }

    #[tokio::test]
    async fn out_of_order_commands_are_rejected() {
        let (state, _, _) = memory_state().await;
        assert!(matches!(resume(&state).await, Err(ServiceError::InvalidState(_))));
        assert!(matches!(
            pause(&state, PauseSessionRequest::default()).await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(stop(&state).await, Err(ServiceError::InvalidState(_))));
    }

    #[tokio::test]
    async fn reveal_is_idempotent_and_keeps_timer_fields() {
        let (state, _, _) = memory_state().await;
        start(&state, start_minutes(5)).await.unwrap();
        let repository = state.repository().await.unwrap();
        let before = repository.load_config().await.unwrap();

        reveal(&state).await.unwrap();
        let once = repository.load_config().await.unwrap();
        reveal(&state).await.unwrap();
        let twice = repository.load_config().await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.status, SessionStatus::Revealed);
        assert_eq!(once.end_time, before.end_time);
        assert_eq!(once.is_running, before.is_running);
    }

    #[tokio::test]
    async fn stop_and_close_write_the_idle_timer() {
        let (state, _, _) = memory_state().await;
        start(&state, start_minutes(5)).await.unwrap();
        stop(&state).await.unwrap();

        let repository = state.repository().await.unwrap();
        assert_eq!(repository.load_config().await.unwrap(), SessionConfig::default());

        close(&state).await.unwrap();
        let closed = repository.load_config().await.unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert!(matches!(close(&state).await, Err(ServiceError::InvalidState(_))));
    }

    fn pause_at(seconds: u64) -> PauseSessionRequest {
        PauseSessionRequest {
            remaining_seconds: Some(seconds),
        }
    }

    #[tokio::test]
    async fn start_duration_bounds() {
        let (state, _, _) = memory_state().await;
        assert!(matches!(
            start(&state, start_minutes(0)).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            start(&state, start_minutes(MAX_SESSION_MINUTES + 1)).await,
            Err(ServiceError::InvalidInput(_))
        ));

        let longest = start(&state, start_minutes(MAX_SESSION_MINUTES)).await.unwrap();
        assert_eq!(longest.timer.remaining_seconds, MAX_SESSION_SECONDS);
        assert!(longest.timer.end_time.is_some());
    }

    #[tokio::test]
    async fn pause_value_bounds() {
        let (state, _, _) = memory_state().await;
        start(&state, start_minutes(5)).await.unwrap();

        for rejected in [MAX_SESSION_SECONDS + 1, u64::MAX] {
            assert!(matches!(
                pause(&state, pause_at(rejected)).await,
                Err(ServiceError::InvalidInput(_))
            ));
        }
        assert!(state.snapshot().await.pending.is_none());
        assert!(state.snapshot().await.config.is_running);

        let paused = pause(&state, pause_at(MAX_SESSION_SECONDS)).await.unwrap();
        assert_eq!(paused.timer.remaining_seconds, MAX_SESSION_SECONDS);

        let resumed = resume(&state).await.unwrap();
        assert_eq!(resumed.timer.remaining_seconds, MAX_SESSION_SECONDS);
        let timer = current_timer(&state).await.unwrap();
        assert!(timer.end_time.is_some());
        assert_eq!(timer.phase, SessionPhaseView::Running);
    }

    #[tokio::test]
    async fn pause_at_zero_resumes_into_a_finished_countdown() {
        let (state, _, _) = memory_state().await;
        start(&state, start_minutes(5)).await.unwrap();

        let paused = pause(&state, pause_at(0)).await.unwrap();
        assert!(paused.timer.finished);

        let resumed = resume(&state).await.unwrap();
        assert_eq!(resumed.timer.phase, SessionPhaseView::Running);
        assert_eq!(resumed.timer.remaining_seconds, 0);
        assert!(resumed.timer.finished);
    }

    #[tokio::test]
    async fn store_failures_surface_and_leave_no_pending_command() {
        let (state, store, _) = memory_state().await;
        state.repository().await.unwrap().load_config().await.unwrap();
        store.set_online(false);

        assert!(matches!(
            start(&state, start_minutes(5)).await,
            Err(ServiceError::Unavailable(_))
        ));
        assert!(state.snapshot().await.pending.is_none());
    }
}
