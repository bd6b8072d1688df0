use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

/// How long an operator token stays valid after sign-in.
pub const OPERATOR_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Operator sign-in gate backed by a shared password.
pub struct OperatorGate {
    password: Option<String>,
    ttl: Duration,
    /// Token to expiry.
    sessions: DashMap<String, SystemTime>,
    revocations: watch::Sender<u64>,
}

impl OperatorGate {
    /// Create a gate issuing tokens valid for `ttl`; without a password nobody can sign in.
    pub fn new(password: Option<String>, ttl: Duration) -> Self {
        let (revocations, _rx) = watch::channel(0);
        Self {
            password: password.filter(|value| !value.is_empty()),
            ttl,
            sessions: DashMap::new(),
            revocations,
        }
    }

    /// Whether sign-in is possible at all.
    pub fn is_enabled(&self) -> bool {
        self.password.is_some()
    }

    /// Exchange the password for an opaque token.
    pub fn sign_in(&self, password: &str, now: SystemTime) -> Option<String> {
        let expected = self.password.as_deref()?;
        if expected != password {
            return None;
        }

        let token = Uuid::new_v4().to_string();
        let expires_at = now.checked_add(self.ttl).unwrap_or(now);
        self.sessions.insert(token.clone(), expires_at);
        Some(token)
    }

    /// Revoke a token. Returns whether it was known.
    pub fn sign_out(&self, token: &str) -> bool {
        let known = self.sessions.remove(token).is_some();
        if known {
            self.revocations.send_modify(|count| *count += 1);
        }
        known
    }

    /// Whether `token` belongs to a signed-in operator at `now`. Expired tokens are dropped.
    pub fn is_operator(&self, token: &str, now: SystemTime) -> bool {
        self.sessions.remove_if(token, |_, expires_at| now >= *expires_at);
        self.sessions.contains_key(token)
    }

    /// Notified after every sign-out.
    pub fn revocations(&self) -> watch::Receiver<u64> {
        self.revocations.subscribe()
    }
}

/// Confirmation token handed out by [`ResetGuard::unlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetUnlock {
    /// Token to pass back to [`ResetGuard::confirm`].
    pub token: String,
    /// When the token stops being accepted.
    pub expires_at: SystemTime,
}

/// Why a reset confirmation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResetConfirmError {
    /// The guard is locked.
    #[error("reset is locked")]
    Locked,
    /// The unlock window elapsed.
    #[error("reset confirmation expired")]
    Expired,
    /// The token does not match the current unlock.
    #[error("reset confirmation token does not match")]
    TokenMismatch,
}

/// Two-step safety lock in front of the destructive reset.
pub struct ResetGuard {
    ttl: Duration,
    unlock: Mutex<Option<ResetUnlock>>,
}

impl ResetGuard {
    /// Create a locked guard whose unlocks live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            unlock: Mutex::new(None),
        }
    }

    /// Open the guard, replacing any previous unlock.
    pub async fn unlock(&self, now: SystemTime) -> ResetUnlock {
        let grant = ResetUnlock {
            token: Uuid::new_v4().to_string(),
            expires_at: now.checked_add(self.ttl).unwrap_or(now),
        };
        *self.unlock.lock().await = Some(grant.clone());
        grant
    }

    /// Close the guard.
    pub async fn lock(&self) {
        self.unlock.lock().await.take();
    }

    /// Whether a still valid unlock exists.
    pub async fn is_unlocked(&self, now: SystemTime) -> bool {
        self.unlock
            .lock()
            .await
            .as_ref()
            .is_some_and(|grant| grant.expires_at > now)
    }

    /// Consume the unlock if `token` matches and has not expired.
    pub async fn confirm(&self, token: &str, now: SystemTime) -> Result<(), ResetConfirmError> {
        let mut guard = self.unlock.lock().await;
        let grant = guard.as_ref().ok_or(ResetConfirmError::Locked)?;

        if grant.expires_at <= now {
            guard.take();
            return Err(ResetConfirmError::Expired);
        }
        if grant.token != token {
            return Err(ResetConfirmError::TokenMismatch);
        }

        guard.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn sign_in_requires_the_configured_password() {
        let gate = OperatorGate::new(Some("hunter2".into()), OPERATOR_SESSION_TTL);
        assert!(gate.sign_in("nope", at(0)).is_none());

        let token = gate.sign_in("hunter2", at(0)).unwrap();
        assert!(gate.is_operator(&token, at(1)));
        assert!(gate.sign_out(&token));
        assert!(!gate.is_operator(&token, at(2)));
        assert!(!gate.sign_out(&token));
    }

    #[test]
    fn tokens_expire_after_the_ttl() {
        let gate = OperatorGate::new(Some("hunter2".into()), Duration::from_secs(60));
        let token = gate.sign_in("hunter2", at(0)).unwrap();

        assert!(gate.is_operator(&token, at(59)));
        assert!(!gate.is_operator(&token, at(60)));
        assert!(!gate.sign_out(&token));
    }

    #[test]
    fn sign_out_notifies_watchers() {
        let gate = OperatorGate::new(Some("hunter2".into()), OPERATOR_SESSION_TTL);
        let mut revocations = gate.revocations();
        let token = gate.sign_in("hunter2", at(0)).unwrap();

        assert!(!revocations.has_changed().unwrap());
        gate.sign_out("unknown");
        assert!(!revocations.has_changed().unwrap());
        gate.sign_out(&token);
        assert!(revocations.has_changed().unwrap());
    }

    #[test]
    fn gate_without_password_rejects_everyone() {
        let gate = OperatorGate::new(Some(String::new()), OPERATOR_SESSION_TTL);
        assert!(!gate.is_enabled());
        assert!(gate.sign_in("", at(0)).is_none());
    }

    #[tokio::test]
    async fn reset_needs_a_fresh_matching_token() {
        let guard = ResetGuard::new(Duration::from_secs(30));
        assert_eq!(guard.confirm("x", at(0)).await, Err(ResetConfirmError::Locked));

        let grant = guard.unlock(at(0)).await;
        assert!(guard.is_unlocked(at(10)).await);
        assert_eq!(
            guard.confirm("other", at(1)).await,
            Err(ResetConfirmError::TokenMismatch)
        );

        guard.confirm(&grant.token, at(2)).await.unwrap();
        assert!(!guard.is_unlocked(at(3)).await);
    }

    #[tokio::test]
    async fn expired_or_locked_unlocks_are_refused() {
        let guard = ResetGuard::new(Duration::from_secs(30));
        let grant = guard.unlock(at(0)).await;
        assert_eq!(
            guard.confirm(&grant.token, at(31)).await,
            Err(ResetConfirmError::Expired)
        );

        let grant = guard.unlock(at(40)).await;
        guard.lock().await;
        assert_eq!(
            guard.confirm(&grant.token, at(41)).await,
            Err(ResetConfirmError::Locked)
        );
    }
}
