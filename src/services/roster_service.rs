//! Team registration, submission intake, grading and the guarded reset.

use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::storage::StorageError,
    dto::{
        format_system_time,
        operator::{
            ActionResponse, GradeRequest, ResetConfirmRequest, ResetResponse, ResetUnlockResponse,
        },
        team::{
            RegisterTeamRequest, SubmissionOutcome, SubmissionReceipt, SubmissionRequest,
            TeamRegistration,
        },
        views::{ChallengeCard, LeaderboardEntry, TeamInspection, TeamSummary},
    },
    error::ServiceError,
    services::projection,
    state::{
        SessionCommand, SharedState,
        roster::{ChallengeId, ChallengeState, Team},
        session::{SessionConfig, SessionStatus},
        timer::displayed_remaining,
    },
};

/// Join the session, or resume the team behind a cached id.
pub async fn register(
    state: &SharedState,
    request: RegisterTeamRequest,
) -> Result<TeamRegistration, ServiceError> {
    request.validate()?;
    let repository = state.repository().await?;
    let catalog = state.config().catalog();

    if let Some(id) = request.team_id {
        if let Some(team) = repository.find_team(id).await? {
            info!(team_id = %id, "team resumed");
            return Ok(TeamRegistration {
                team: TeamSummary::from_team(&team, catalog),
                resumed: true,
            });
        }
        info!(team_id = %id, "cached team id is unknown; registering a new team");
    }

    let session = repository.load_config().await?;
    if session.status == SessionStatus::Closed {
        return Err(ServiceError::SessionClosed(
            "registrations are closed".into(),
        ));
    }

    let team = Team::new(Uuid::new_v4(), request.name.trim(), state.now());
    repository.insert_team(&team).await?;
    info!(team_id = %team.id, name = %team.name, "team registered");

    Ok(TeamRegistration {
        team: TeamSummary::from_team(&team, catalog),
        resumed: false,
    })
}

/// Current state of a single team.
pub async fn team(state: &SharedState, team_id: Uuid) -> Result<TeamSummary, ServiceError> {
    let team = find_team(state, team_id).await?;
    Ok(TeamSummary::from_team(&team, state.config().catalog()))
}

/// Queue a challenge for review.
///
/// Submitting a challenge that is already pending or completed writes nothing.
pub async fn submit(
    state: &SharedState,
    team_id: Uuid,
    request: SubmissionRequest,
) -> Result<SubmissionReceipt, ServiceError> {
    let repository = state.repository().await?;
    let now = state.now();

    let session = repository.load_config().await?;
    ensure_accepting_submissions(&session, displayed_remaining(&session, now))?;

    request.validate()?;
    let catalog = state.config().catalog();
    if !catalog.contains(request.challenge_id) {
        return Err(ServiceError::InvalidInput(format!(
            "unknown challenge `{}`",
            request.challenge_id
        )));
    }

    let team = repository
        .find_team(team_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("team `{team_id}` not found")))?;

    let (outcome, team) = match settled_outcome(&team, request.challenge_id) {
        Some(outcome) => (outcome, team),
        None => match repository
            .record_submission(team_id, request.challenge_id, request.url.trim(), now)
            .await
        {
            Ok(team) => {
                info!(
                    team_id = %team_id,
                    challenge_id = request.challenge_id,
                    "submission queued for review"
                );
                (SubmissionOutcome::Submitted, team)
            }
            // pending or graded since the read above
            Err(StorageError::PreconditionFailed { .. }) => {
                let team = find_team(state, team_id).await?;
                let outcome = settled_outcome(&team, request.challenge_id)
                    .unwrap_or(SubmissionOutcome::AlreadyPending);
                (outcome, team)
            }
            Err(err) => return Err(missing_team(err, team_id)),
        },
    };

    Ok(SubmissionReceipt {
        outcome,
        team: TeamSummary::from_team(&team, catalog),
    })
}

/// Credit a pending challenge. A repeated grade fails instead of crediting twice.
pub async fn grade(
    state: &SharedState,
    team_id: Uuid,
    request: GradeRequest,
) -> Result<TeamSummary, ServiceError> {
    request.validate()?;
    let repository = state.repository().await?;
    let team = repository
        .find_team(team_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("team `{team_id}` not found")))?;

    if !team.pending_challenge_ids.contains(&request.challenge_id) {
        return Err(not_pending(team_id, request.challenge_id));
    }

    let team = match repository
        .record_grade(team_id, request.challenge_id, request.points)
        .await
    {
        Ok(team) => team,
        Err(StorageError::PreconditionFailed { .. }) => {
            warn!(
                team_id = %team_id,
                challenge_id = request.challenge_id,
                "grade lost the race against another grade"
            );
            return Err(not_pending(team_id, request.challenge_id));
        }
        Err(err) => return Err(missing_team(err, team_id)),
    };

    info!(
        team_id = %team_id,
        challenge_id = request.challenge_id,
        points = request.points,
        score = team.score,
        "submission graded"
    );
    Ok(TeamSummary::from_team(&team, state.config().catalog()))
}

/// Detail panel for one team.
pub async fn inspect(state: &SharedState, team_id: Uuid) -> Result<TeamInspection, ServiceError> {
    let team = find_team(state, team_id).await?;
    let catalog = state.config().catalog();
    Ok(TeamInspection {
        team: TeamSummary::from_team(&team, catalog),
        challenges: ChallengeCard::for_team(&team, catalog),
    })
}

/// Top teams once results are revealed.
pub async fn leaderboard(state: &SharedState) -> Result<Vec<LeaderboardEntry>, ServiceError> {
    let repository = state.repository().await?;
    let session = repository.load_config().await?;
    if session.status != SessionStatus::Revealed {
        return Err(ServiceError::InvalidState(
            "leaderboard is hidden until results are revealed".into(),
        ));
    }

    let size = state.config().leaderboard_size();
    let teams = repository.top_teams(size).await?;
    Ok(projection::leaderboard(&teams, size))
}

/// First reset step: hand out a short-lived confirmation token.
pub async fn unlock_reset(state: &SharedState) -> Result<ResetUnlockResponse, ServiceError> {
    let grant = state.reset_guard().unlock(state.now()).await;
    info!("reset unlocked");
    Ok(ResetUnlockResponse {
        token: grant.token,
        expires_at: format_system_time(grant.expires_at),
    })
}

/// Cancel a pending reset unlock.
pub async fn lock_reset(state: &SharedState) -> Result<ActionResponse, ServiceError> {
    state.reset_guard().lock().await;
    Ok(ActionResponse {
        message: "reset locked".into(),
    })
}

/// Second reset step: delete every team and put the session back to idle.
pub async fn confirm_reset(
    state: &SharedState,
    request: ResetConfirmRequest,
) -> Result<ResetResponse, ServiceError> {
    request.validate()?;
    state
        .reset_guard()
        .confirm(&request.token, state.now())
        .await?;

    let repository = state.repository().await?;
    let (teams_removed, _) = state
        .run_transition(SessionCommand::Reset, |_plan| async move {
            let removed = repository.delete_all_teams().await?;
            repository.overwrite_config(&SessionConfig::default()).await?;
            Ok(removed)
        })
        .await?;

    warn!(teams_removed, "session reset");
    Ok(ResetResponse {
        message: "session reset".into(),
        teams_removed,
    })
}

fn ensure_accepting_submissions(session: &SessionConfig, remaining: u64) -> Result<(), ServiceError> {
    if session.status != SessionStatus::Active {
        return Err(ServiceError::SessionClosed(
            "submissions are only accepted while the session is active".into(),
        ));
    }
    if remaining == 0 {
        return Err(ServiceError::SessionClosed("time is up".into()));
    }
    Ok(())
}

async fn find_team(state: &SharedState, team_id: Uuid) -> Result<Team, ServiceError> {
    state
        .repository()
        .await?
        .find_team(team_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("team `{team_id}` not found")))
}

/// Receipt for a challenge that is already queued or graded, `None` when it is open.
fn settled_outcome(team: &Team, challenge_id: ChallengeId) -> Option<SubmissionOutcome> {
    match team.challenge_state(challenge_id) {
        ChallengeState::Completed => Some(SubmissionOutcome::AlreadyCompleted),
        ChallengeState::Pending => Some(SubmissionOutcome::AlreadyPending),
        ChallengeState::Available => None,
    }
}

fn not_pending(team_id: Uuid, challenge_id: u32) -> ServiceError {
    ServiceError::NotFound(format!(
        "challenge `{challenge_id}` is not pending for team `{team_id}`"
    ))
}

/// A team deleted between the read and the update is reported as missing.
fn missing_team(err: StorageError, team_id: Uuid) -> ServiceError {
    match err {
        StorageError::MissingDocument { .. } => {
            ServiceError::NotFound(format!("team `{team_id}` not found"))
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dto::operator::StartSessionRequest,
        services::session_service,
        state::{clock::ManualClock, test_support::memory_state},
    };

    async fn active_state() -> (SharedState, ManualClock) {
        let (state, _, clock) = memory_state().await;
        session_service::start(
            &state,
            StartSessionRequest {
                duration_minutes: Some(25),
            },
        )
        .await
        .unwrap();
        (state, clock)
    }

    async fn join(state: &SharedState, name: &str) -> Uuid {
        register(
            state,
            RegisterTeamRequest {
                name: name.into(),
                team_id: None,
            },
        )
        .await
        .unwrap()
        .team
        .id
    }

    fn submission(challenge_id: u32) -> SubmissionRequest {
        SubmissionRequest {
            challenge_id,
            url: "https://github.com/byte-me/sorts".into(),
        }
    }

    fn points(challenge_id: u32, points: u32) -> GradeRequest {
        GradeRequest {
            challenge_id,
            points,
        }
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let (state, _) = active_state().await;
        let result = register(
            &state,
            RegisterTeamRequest {
                name: "   ".into(),
                team_id: None,
            },
        )
        .await;
        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn cached_ids_resume_the_same_team() {
        let (state, _) = active_state().await;
        let id = join(&state, "Byte Me").await;

        let again = register(
            &state,
            RegisterTeamRequest {
                name: "ignored".into(),
                team_id: Some(id),
            },
        )
        .await
        .unwrap();
        assert!(again.resumed);
        assert_eq!(again.team.id, id);
        assert_eq!(again.team.name, "Byte Me");

        let fresh = register(
            &state,
            RegisterTeamRequest {
                name: "Null Pointers".into(),
                team_id: Some(Uuid::new_v4()),
            },
        )
        .await
        .unwrap();
        assert!(!fresh.resumed);
        assert_ne!(fresh.team.id, id);
    }

    #[tokio::test]
    async fn closed_sessions_refuse_new_teams() {
        let (state, _) = active_state().await;
        let id = join(&state, "Byte Me").await;
        session_service::close(&state).await.unwrap();

        let result = register(
            &state,
            RegisterTeamRequest {
                name: "Late".into(),
                team_id: None,
            },
        )
        .await;
        assert!(matches!(result, Err(ServiceError::SessionClosed(_))));

        let resumed = register(
            &state,
            RegisterTeamRequest {
                name: "Byte Me".into(),
                team_id: Some(id),
            },
        )
        .await
        .unwrap();
        assert!(resumed.resumed);
    }

    #[tokio::test]
    async fn submissions_queue_once() {
        let (state, _) = active_state().await;
        let id = join(&state, "Byte Me").await;

        let receipt = submit(&state, id, submission(3)).await.unwrap();
        assert_eq!(receipt.outcome, SubmissionOutcome::Submitted);
        assert_eq!(receipt.team.pending_challenge_ids, vec![3]);
        assert!(receipt.team.pending_submission);
        assert!(receipt.team.last_active_at.is_some());

        let again = submit(&state, id, submission(3)).await.unwrap();
        assert_eq!(again.outcome, SubmissionOutcome::AlreadyPending);
    }

    #[tokio::test]
    async fn submissions_are_validated() {
        let (state, _) = active_state().await;
        let id = join(&state, "Byte Me").await;

        assert!(matches!(
            submit(&state, id, submission(99)).await,
            Err(ServiceError::InvalidInput(_))
        ));
        let bad_url = SubmissionRequest {
            challenge_id: 1,
            url: "not a link".into(),
        };
        assert!(matches!(
            submit(&state, id, bad_url).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            submit(&state, Uuid::new_v4(), submission(1)).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn submissions_stop_when_the_clock_hits_zero() {
        let (state, clock) = active_state().await;
        let id = join(&state, "Byte Me").await;

        clock.advance(Duration::from_secs(25 * 60));
        assert!(matches!(
            submit(&state, id, submission(1)).await,
            Err(ServiceError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn submissions_need_an_active_session() {
        let (state, _, _) = memory_state().await;
        let id = join(&state, "Byte Me").await;
        assert!(matches!(
            submit(&state, id, submission(1)).await,
            Err(ServiceError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn grading_moves_the_challenge_and_credits_once() {
        let (state, _) = active_state().await;
        let id = join(&state, "Byte Me").await;
        submit(&state, id, submission(3)).await.unwrap();

        let graded = grade(&state, id, points(3, 20)).await.unwrap();
        assert_eq!(graded.score, 20);
        assert_eq!(graded.completed_challenges, vec![3]);
        assert!(graded.pending_challenge_ids.is_empty());
        assert!(!graded.pending_submission);

        assert!(matches!(
            grade(&state, id, points(3, 20)).await,
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(team(&state, id).await.unwrap().score, 20);

        let resubmitted = submit(&state, id, submission(3)).await.unwrap();
        assert_eq!(resubmitted.outcome, SubmissionOutcome::AlreadyCompleted);
    }

    #[tokio::test]
    async fn completed_and_pending_never_overlap() {
        let (state, _) = active_state().await;
        let id = join(&state, "Byte Me").await;

        for (challenge, first_time) in [(1, true), (2, true), (1, false), (3, true)] {
            submit(&state, id, submission(challenge)).await.unwrap();
            let graded = grade(&state, id, points(challenge, 10)).await;
            if first_time {
                assert!(graded.is_ok());
            } else {
                assert!(matches!(graded, Err(ServiceError::NotFound(_))));
            }
            let again = submit(&state, id, submission(challenge)).await.unwrap();
            assert_eq!(again.outcome, SubmissionOutcome::AlreadyCompleted);

            let summary = team(&state, id).await.unwrap();
            assert!(
                summary
                    .completed_challenges
                    .iter()
                    .all(|done| !summary.pending_challenge_ids.contains(done))
            );
        }
        assert_eq!(team(&state, id).await.unwrap().score, 30);
    }

    #[tokio::test]
    async fn pending_teams_lead_the_review_queue() {
        let (state, clock) = active_state().await;
        let waiting = join(&state, "Waiting").await;
        clock.advance(Duration::from_secs(5));
        join(&state, "Newer").await;
        clock.advance(Duration::from_secs(5));
        join(&state, "Newest").await;
        submit(&state, waiting, submission(2)).await.unwrap();

        let inspection = inspect(&state, waiting).await.unwrap();
        assert_eq!(inspection.team.pending_challenge_ids, vec![2]);

        let mut teams = state.repository().await.unwrap().list_teams().await.unwrap();
        crate::state::roster::sort_review_queue(&mut teams, state.config().catalog());
        assert_eq!(teams[0].id, waiting);
    }

    #[tokio::test]
    async fn leaderboard_is_hidden_until_reveal() {
        let (state, _) = active_state().await;
        let id = join(&state, "Byte Me").await;
        submit(&state, id, submission(1)).await.unwrap();
        grade(&state, id, points(1, 10)).await.unwrap();

        assert!(matches!(
            leaderboard(&state).await,
            Err(ServiceError::InvalidState(_))
        ));
        session_service::reveal(&state).await.unwrap();
        let board = leaderboard(&state).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].score, 10);
    }

    #[tokio::test]
    async fn reset_requires_a_fresh_unlock() {
        let (state, clock) = active_state().await;
        join(&state, "Byte Me").await;
        join(&state, "Null Pointers").await;

        let wrong = ResetConfirmRequest {
            token: "guess".into(),
        };
        assert!(matches!(
            confirm_reset(&state, wrong).await,
            Err(ServiceError::Unauthorized(_))
        ));

        let grant = unlock_reset(&state).await.unwrap();
        clock.advance(state.config().reset_unlock_ttl());
        let expired = ResetConfirmRequest { token: grant.token };
        assert!(matches!(
            confirm_reset(&state, expired).await,
            Err(ServiceError::Unauthorized(_))
        ));

        let grant = unlock_reset(&state).await.unwrap();
        lock_reset(&state).await.unwrap();
        let locked = ResetConfirmRequest { token: grant.token };
        assert!(matches!(
            confirm_reset(&state, locked).await,
            Err(ServiceError::Unauthorized(_))
        ));

        let repository = state.repository().await.unwrap();
        assert_eq!(repository.list_teams().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn confirmed_reset_wipes_teams_and_session() {
        let (state, _) = active_state().await;
        let id = join(&state, "Byte Me").await;
        submit(&state, id, submission(1)).await.unwrap();
        join(&state, "Null Pointers").await;

        let grant = unlock_reset(&state).await.unwrap();
        let response = confirm_reset(&state, ResetConfirmRequest { token: grant.token })
            .await
            .unwrap();
        assert_eq!(response.teams_removed, 2);

        let repository = state.repository().await.unwrap();
        assert!(repository.list_teams().await.unwrap().is_empty());
        assert_eq!(repository.load_config().await.unwrap(), SessionConfig::default());
        assert!(!state.reset_guard().is_unlocked(state.now()).await);
    }
}
