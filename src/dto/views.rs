//! Read-only projections streamed to the operator console, team clients and the display.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::format_system_time,
    state::{
        roster::{Challenge, ChallengeCatalog, ChallengeId, ChallengeState, RosterMetrics, Team},
        session::SessionPhase,
    },
};

/// Session phase as rendered by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhaseView {
    Idle,
    Running,
    Paused,
    Revealed,
    Closed,
}

impl From<SessionPhase> for SessionPhaseView {
    fn from(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Idle => Self::Idle,
            SessionPhase::Running => Self::Running,
            SessionPhase::Paused => Self::Paused,
            SessionPhase::Revealed => Self::Revealed,
            SessionPhase::Closed => Self::Closed,
        }
    }
}

/// Countdown state as computed by the server at `server_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TimerView {
    pub phase: SessionPhaseView,
    pub is_running: bool,
    /// Seconds left, already reconciled against the server clock.
    pub remaining_seconds: u64,
    /// Absolute deadline (RFC 3339) while running, so clients can tick locally.
    pub end_time: Option<String>,
    /// Server wall-clock time the projection was computed at (RFC 3339).
    pub server_time: String,
    /// Less than a minute left.
    pub critical: bool,
    /// Nothing left on the clock.
    pub finished: bool,
}

/// Catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChallengeSummary {
    pub id: ChallengeId,
    pub name: String,
    pub description: String,
}

impl From<&Challenge> for ChallengeSummary {
    fn from(challenge: &Challenge) -> Self {
        Self {
            id: challenge.id,
            name: challenge.name.clone(),
            description: challenge.description.clone(),
        }
    }
}

/// Progress marker on a challenge card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStateView {
    Available,
    Pending,
    Completed,
}

impl From<ChallengeState> for ChallengeStateView {
    fn from(state: ChallengeState) -> Self {
        match state {
            ChallengeState::Available => Self::Available,
            ChallengeState::Pending => Self::Pending,
            ChallengeState::Completed => Self::Completed,
        }
    }
}

/// Catalog entry annotated with one team's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChallengeCard {
    pub id: ChallengeId,
    pub name: String,
    pub description: String,
    pub state: ChallengeStateView,
}

impl ChallengeCard {
    /// One card per catalog entry, in catalog order.
    pub fn for_team(team: &Team, catalog: &ChallengeCatalog) -> Vec<Self> {
        catalog
            .challenges()
            .iter()
            .map(|challenge| Self {
                id: challenge.id,
                name: challenge.name.clone(),
                description: challenge.description.clone(),
                state: team.challenge_state(challenge.id).into(),
            })
            .collect()
    }
}

/// Public representation of a team document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TeamSummary {
    pub id: Uuid,
    pub name: String,
    pub score: u64,
    pub completed_challenges: Vec<ChallengeId>,
    pub pending_challenge_ids: Vec<ChallengeId>,
    pub submission_url: Option<String>,
    pub pending_submission: bool,
    pub joined_at: String,
    pub last_active_at: Option<String>,
    /// Completed every challenge of the catalog.
    pub finished: bool,
}

impl TeamSummary {
    /// Render `team` against `catalog`.
    pub fn from_team(team: &Team, catalog: &ChallengeCatalog) -> Self {
        Self {
            id: team.id,
            name: team.name.clone(),
            score: team.score,
            completed_challenges: team.completed_challenges.iter().copied().collect(),
            pending_challenge_ids: team.pending_challenge_ids.iter().copied().collect(),
            submission_url: team.submission_url.clone(),
            pending_submission: team.pending_submission,
            joined_at: format_system_time(team.joined_at),
            last_active_at: team.last_active_at.map(format_system_time),
            finished: team.is_complete(catalog),
        }
    }
}

/// What the team client should render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum TeamScreen {
    /// No registered team behind this client.
    Login,
    /// Waiting for the operator to start.
    Standby,
    /// Results are out or the session is over.
    Locked { phase: SessionPhaseView },
    /// Competing.
    Board {
        challenges: Vec<ChallengeCard>,
        /// Turns false the moment the countdown reaches zero.
        can_submit: bool,
    },
}

/// Projection pushed on `/sse/team/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TeamView {
    pub timer: TimerView,
    pub degraded: bool,
    pub team: Option<TeamSummary>,
    pub screen: TeamScreen,
}

/// Counters shown above the review queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct RosterMetricsView {
    pub total: usize,
    pub pending_review: usize,
    pub active: usize,
    pub finished: usize,
}

impl From<RosterMetrics> for RosterMetricsView {
    fn from(metrics: RosterMetrics) -> Self {
        Self {
            total: metrics.total,
            pending_review: metrics.pending_review,
            active: metrics.active,
            finished: metrics.finished,
        }
    }
}

/// Detail panel for the team the operator is looking at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TeamInspection {
    pub team: TeamSummary,
    pub challenges: Vec<ChallengeCard>,
}

/// Projection pushed on `/sse/operator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OperatorView {
    pub timer: TimerView,
    pub degraded: bool,
    /// Number of confirmed session transitions.
    pub version: usize,
    /// Command whose store write is still in flight.
    pub pending_command: Option<String>,
    pub metrics: RosterMetricsView,
    /// Teams in review order, filtered by `search` when set.
    pub queue: Vec<TeamSummary>,
    pub search: Option<String>,
    pub inspected: Option<TeamInspection>,
    pub challenges: Vec<ChallengeSummary>,
    pub grading_presets: Vec<u32>,
    pub default_duration_minutes: u64,
    pub reset_unlocked: bool,
}

/// Row of the revealed leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    pub team_id: Uuid,
    pub name: String,
    pub score: u64,
    pub completed: usize,
}

/// Projection pushed on `/sse/display`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DisplayView {
    pub timer: TimerView,
    pub degraded: bool,
    pub team_count: usize,
    /// Only present once results are revealed.
    pub leaderboard: Option<Vec<LeaderboardEntry>>,
}
