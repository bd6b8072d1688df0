//! Pure builders turning session and roster snapshots into observer views.

use std::time::SystemTime;

use uuid::Uuid;

use crate::{
    config::AppConfig,
    dto::{
        format_system_time,
        views::{
            ChallengeCard, ChallengeSummary, DisplayView, LeaderboardEntry, OperatorView,
            SessionPhaseView, TeamInspection, TeamScreen, TeamSummary, TeamView, TimerView,
        },
    },
    state::{
        Snapshot,
        roster::{Team, leaderboard_order, roster_metrics, sort_review_queue},
        session::{SessionConfig, SessionPhase},
        timer::displayed_remaining,
    },
};

const CRITICAL_THRESHOLD_SECS: u64 = 60;

/// Inputs shared by every projection.
#[derive(Clone, Copy)]
pub struct ProjectionContext<'a> {
    pub config: &'a AppConfig,
    pub now: SystemTime,
    pub degraded: bool,
}

/// Console-local state: nothing here is ever written to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorLocalState {
    search: Option<String>,
    inspect: Option<Uuid>,
}

impl OperatorLocalState {
    /// Normalise the console filters; a blank search means no filter.
    pub fn new(search: Option<String>, inspect: Option<Uuid>) -> Self {
        Self {
            search: search
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            inspect,
        }
    }

    /// Active name filter.
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    /// Team whose detail panel is open.
    pub fn inspect(&self) -> Option<Uuid> {
        self.inspect
    }
}

/// Timer view for a countdown whose displayed value is already known.
pub fn timer_view(session: &SessionConfig, remaining: u64, now: SystemTime) -> TimerView {
    let phase = session.phase();
    TimerView {
        phase: phase.into(),
        is_running: phase == SessionPhase::Running,
        remaining_seconds: remaining,
        end_time: session
            .end_time
            .filter(|_| phase == SessionPhase::Running)
            .map(format_system_time),
        server_time: format_system_time(now),
        critical: remaining > 0 && remaining < CRITICAL_THRESHOLD_SECS,
        finished: remaining == 0,
    }
}

/// Timer view computed from the session document alone.
pub fn current_timer(session: &SessionConfig, now: SystemTime) -> TimerView {
    timer_view(session, displayed_remaining(session, now), now)
}

/// Projection for a single team client.
pub fn team_view(ctx: ProjectionContext<'_>, timer: TimerView, team: Option<&Team>) -> TeamView {
    let catalog = ctx.config.catalog();
    let screen = match (team, timer.phase) {
        (None, _) => TeamScreen::Login,
        (Some(_), SessionPhaseView::Idle) => TeamScreen::Standby,
        (Some(_), phase @ (SessionPhaseView::Revealed | SessionPhaseView::Closed)) => {
            TeamScreen::Locked { phase }
        }
        (Some(team), SessionPhaseView::Running | SessionPhaseView::Paused) => TeamScreen::Board {
            challenges: ChallengeCard::for_team(team, catalog),
            can_submit: timer.remaining_seconds > 0,
        },
    };

    TeamView {
        timer,
        degraded: ctx.degraded,
        team: team.map(|team| TeamSummary::from_team(team, catalog)),
        screen,
    }
}

/// Projection for the operator console.
pub fn operator_view(
    ctx: ProjectionContext<'_>,
    timer: TimerView,
    coordinator: &Snapshot,
    teams: &[Team],
    local: &OperatorLocalState,
    reset_unlocked: bool,
) -> OperatorView {
    let catalog = ctx.config.catalog();

    let mut ordered = teams.to_vec();
    sort_review_queue(&mut ordered, catalog);
    let queue = ordered
        .iter()
        .filter(|team| local.search().is_none_or(|needle| team.matches_search(needle)))
        .map(|team| TeamSummary::from_team(team, catalog))
        .collect();

    let inspected = local.inspect().and_then(|id| {
        teams.iter().find(|team| team.id == id).map(|team| TeamInspection {
            team: TeamSummary::from_team(team, catalog),
            challenges: ChallengeCard::for_team(team, catalog),
        })
    });

    OperatorView {
        timer,
        degraded: ctx.degraded,
        version: coordinator.version,
        pending_command: coordinator
            .pending
            .as_ref()
            .map(|command| command.label().to_string()),
        metrics: roster_metrics(teams, catalog).into(),
        queue,
        search: local.search().map(str::to_string),
        inspected,
        challenges: catalog
            .challenges()
            .iter()
            .map(ChallengeSummary::from)
            .collect(),
        grading_presets: ctx.config.grading_presets().to_vec(),
        default_duration_minutes: ctx.config.default_duration().as_secs() / 60,
        reset_unlocked,
    }
}

/// Rank `teams` by score and keep the first `size`.
pub fn leaderboard(teams: &[Team], size: usize) -> Vec<LeaderboardEntry> {
    let mut ranked: Vec<&Team> = teams.iter().collect();
    ranked.sort_by(|a, b| leaderboard_order(a, b));
    ranked
        .into_iter()
        .take(size)
        .enumerate()
        .map(|(index, team)| LeaderboardEntry {
            rank: index + 1,
            team_id: team.id,
            name: team.name.clone(),
            score: team.score,
            completed: team.completed_challenges.len(),
        })
        .collect()
}

/// Projection for the shared public display.
pub fn display_view(
    ctx: ProjectionContext<'_>,
    timer: TimerView,
    team_count: usize,
    leaderboard: Option<Vec<LeaderboardEntry>>,
) -> DisplayView {
    let leaderboard = leaderboard.filter(|_| timer.phase == SessionPhaseView::Revealed);
    DisplayView {
        timer,
        degraded: ctx.degraded,
        team_count,
        leaderboard,
    }
}
