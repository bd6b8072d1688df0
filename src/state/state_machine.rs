use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;
use uuid::Uuid;

use super::{
    session::{MAX_SESSION_SECONDS, SessionConfig, SessionPatch, SessionPhase, SessionStatus},
    timer::displayed_remaining,
};

/// Operator commands that drive the session document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start (or restart) the countdown for the given duration.
    Start {
        /// Length of the countdown.
        duration: Duration,
    },
    /// Freeze the countdown.
    Pause {
        /// Remaining seconds the operator saw when pausing, if captured.
        observed_remaining: Option<u64>,
    },
    /// Continue a paused countdown.
    Resume,
    /// Abort the round and go back to idle.
    Stop,
    /// Show the results.
    Reveal,
    /// Lock the session for good.
    Close,
    /// Wipe the session back to its initial document.
    Reset,
}

impl SessionCommand {
    /// Short label used in logs and the pending overlay.
    pub fn label(&self) -> &'static str {
        match self {
            SessionCommand::Start { .. } => "start",
            SessionCommand::Pause { .. } => "pause",
            SessionCommand::Resume => "resume",
            SessionCommand::Stop => "stop",
            SessionCommand::Reveal => "reveal",
            SessionCommand::Close => "close",
            SessionCommand::Reset => "reset",
        }
    }
}

/// Error returned when a command cannot be applied from the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {command:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// Phase of the confirmed document when the command arrived.
    pub from: SessionPhase,
    /// The rejected command.
    pub command: SessionCommand,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
    /// The countdown deadline does not fit in a timestamp.
    DeadlineOutOfRange,
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// Version changed since the plan was created.
    VersionMismatch {
        /// Version the plan would produce.
        expected: usize,
        /// Version the machine would produce now.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned transition.
pub type PlanId = Uuid;

/// A validated transition whose store write has not been acknowledged yet.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the plan was computed from.
    pub from: SessionPhase,
    /// Command that triggered the plan.
    pub command: SessionCommand,
    /// Fields to write to the session document.
    pub patch: SessionPatch,
    /// Version number after applying this plan.
    pub version_next: usize,
    /// When the plan was created.
    pub pending_since: Instant,
}

/// Point-in-time view of the machine, including the in-flight command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Last confirmed session document.
    pub config: SessionConfig,
    /// Phase derived from `config`.
    pub phase: SessionPhase,
    /// Number of applied transitions.
    pub version: usize,
    /// Command currently being written, if any.
    pub pending: Option<SessionCommand>,
}

/// Coordinator-side mirror of the session document with plan/apply/abort semantics.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    confirmed: SessionConfig,
    version: usize,
    pending: Option<Plan>,
}

impl SessionStateMachine {
    /// Create a machine mirroring the default idle document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current confirmed phase.
    pub fn phase(&self) -> SessionPhase {
        self.confirmed.phase()
    }

    /// Last confirmed session document.
    pub fn config(&self) -> &SessionConfig {
        &self.confirmed
    }

    /// Replace the confirmed document with a fresher snapshot read from the store.
    pub fn observe(&mut self, config: SessionConfig) {
        self.confirmed = config;
    }

    /// Create a snapshot of the machine.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            config: self.confirmed.clone(),
            phase: self.confirmed.phase(),
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.command.clone()),
        }
    }

    /// Validate `command` against the confirmed document and record it as pending.
    pub fn plan(&mut self, command: SessionCommand, now: SystemTime) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let patch = self.compute_transition(&command, now)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase(),
            command,
            patch,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Confirm a planned transition after its write was acknowledged.
    /// Returns the resulting document.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionConfig, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.confirmed = plan.patch.apply_to(&self.confirmed);
        self.version = plan.version_next;

        Ok(self.confirmed.clone())
    }

    /// Drop a planned transition whose write failed.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn compute_transition(
        &self,
        command: &SessionCommand,
        now: SystemTime,
    ) -> Result<SessionPatch, PlanError> {
        let config = &self.confirmed;
        let patch = match (config.phase(), command) {
            (_, SessionCommand::Start { duration }) => SessionPatch {
                status: Some(SessionStatus::Active),
                is_running: Some(true),
                end_time: Some(Some(deadline(now, *duration)?)),
                remaining_seconds: Some(None),
            },
            (SessionPhase::Running, SessionCommand::Pause { observed_remaining }) => {
                let remaining = observed_remaining
                    .unwrap_or_else(|| displayed_remaining(config, now))
                    .min(MAX_SESSION_SECONDS);
                SessionPatch {
                    is_running: Some(false),
                    remaining_seconds: Some(Some(remaining)),
                    ..SessionPatch::default()
                }
            }
            (SessionPhase::Paused, SessionCommand::Resume) => {
                let remaining = config.remaining_seconds.unwrap_or(0).min(MAX_SESSION_SECONDS);
                SessionPatch {
                    is_running: Some(true),
                    end_time: Some(Some(deadline(now, Duration::from_secs(remaining))?)),
                    remaining_seconds: Some(None),
                    ..SessionPatch::default()
                }
            }
            (SessionPhase::Running | SessionPhase::Paused, SessionCommand::Stop) => {
                SessionPatch::idle(SessionStatus::Idle)
            }
            (_, SessionCommand::Reveal) => SessionPatch {
                status: Some(SessionStatus::Revealed),
                ..SessionPatch::default()
            },
            (from, SessionCommand::Close) if from != SessionPhase::Closed => {
                SessionPatch::idle(SessionStatus::Closed)
            }
            (_, SessionCommand::Reset) => SessionPatch::idle(SessionStatus::Idle),
            (from, command) => {
                return Err(PlanError::InvalidTransition(InvalidTransition {
                    from,
                    command: command.clone(),
                }));
            }
        };

        Ok(patch)
    }
}

fn deadline(now: SystemTime, left: Duration) -> Result<SystemTime, PlanError> {
    now.checked_add(left).ok_or(PlanError::DeadlineOutOfRange)
}
