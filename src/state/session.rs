use std::time::SystemTime;

/// Longest countdown a session may run, in minutes.
pub const MAX_SESSION_MINUTES: u64 = 600;
/// [`MAX_SESSION_MINUTES`] in seconds; also the cap on a frozen remaining value.
pub const MAX_SESSION_SECONDS: u64 = MAX_SESSION_MINUTES * 60;

/// Lifecycle status persisted in the session document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    /// Nobody is competing yet (or the session was stopped).
    #[default]
    Idle,
    /// The countdown is running or paused.
    Active,
    /// Results are shown; submissions are locked.
    Revealed,
    /// Terminal state; no new registrations.
    Closed,
}

/// Phase derived from status and the running flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// `status = idle`.
    Idle,
    /// `status = active`, countdown ticking towards `end_time`.
    Running,
    /// `status = active`, countdown frozen at `remaining_seconds`.
    Paused,
    /// `status = revealed`.
    Revealed,
    /// `status = closed`.
    Closed,
}

/// The shared session document.
///
/// While running only `end_time` is meaningful, while paused only `remaining_seconds` is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Whether the countdown is ticking; only meaningful when active.
    pub is_running: bool,
    /// Absolute deadline of a running countdown.
    pub end_time: Option<SystemTime>,
    /// Frozen remaining seconds of a paused countdown.
    pub remaining_seconds: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            is_running: false,
            end_time: None,
            remaining_seconds: Some(0),
        }
    }
}

impl SessionConfig {
    /// Phase derived from `status` and `is_running`.
    pub fn phase(&self) -> SessionPhase {
        match self.status {
            SessionStatus::Idle => SessionPhase::Idle,
            SessionStatus::Active if self.is_running => SessionPhase::Running,
            SessionStatus::Active => SessionPhase::Paused,
            SessionStatus::Revealed => SessionPhase::Revealed,
            SessionStatus::Closed => SessionPhase::Closed,
        }
    }
}

/// Partial write to the session document produced by a transition.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionPatch {
    /// New status.
    pub status: Option<SessionStatus>,
    /// New running flag.
    pub is_running: Option<bool>,
    /// New deadline.
    pub end_time: Option<Option<SystemTime>>,
    /// New frozen remaining seconds.
    pub remaining_seconds: Option<Option<u64>>,
}

impl SessionPatch {
    /// Patch that puts every field back to its idle value.
    pub fn idle(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            is_running: Some(false),
            end_time: Some(None),
            remaining_seconds: Some(Some(0)),
        }
    }

    /// Whether the patch writes nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge this patch over `config`.
    pub fn apply_to(&self, config: &SessionConfig) -> SessionConfig {
        SessionConfig {
            status: self.status.unwrap_or(config.status),
            is_running: self.is_running.unwrap_or(config.is_running),
            end_time: self.end_time.unwrap_or(config.end_time),
            remaining_seconds: self.remaining_seconds.unwrap_or(config.remaining_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn default_document_is_idle_with_zero_remaining() {
        let config = SessionConfig::default();
        assert_eq!(config.phase(), SessionPhase::Idle);
        assert_eq!(config.end_time, None);
        assert_eq!(config.remaining_seconds, Some(0));
    }

    #[test]
    fn patch_only_touches_named_fields() {
        let end = SystemTime::UNIX_EPOCH + Duration::from_secs(60);
        let config = SessionConfig {
            status: SessionStatus::Active,
            is_running: true,
            end_time: Some(end),
            remaining_seconds: None,
        };

        let reveal = SessionPatch {
            status: Some(SessionStatus::Revealed),
            ..SessionPatch::default()
        };
        let next = reveal.apply_to(&config);

        assert_eq!(next.status, SessionStatus::Revealed);
        assert!(next.is_running);
        assert_eq!(next.end_time, Some(end));
        assert!(SessionPatch::default().is_empty());
        assert!(!reveal.is_empty());
    }
}
