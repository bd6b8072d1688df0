pub mod clock;
pub mod operator;
pub mod roster;
pub mod session;
pub mod state_machine;
pub mod timer;

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tracing::warn;

use crate::{
    config::AppConfig,
    dao::{document_store::DocumentStore, session_repository::SessionRepository},
    error::ServiceError,
};

pub use self::state_machine::{
    AbortError, ApplyError, Plan, PlanError, PlanId, SessionCommand, Snapshot,
};
use self::{
    clock::{SharedClock, SystemClock},
    operator::{OPERATOR_SESSION_TTL, OperatorGate, ResetGuard},
    session::SessionConfig,
    state_machine::SessionStateMachine,
};

pub type SharedState = Arc<AppState>;
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Central application state: store handle, session coordinator and operator gates.
pub struct AppState {
    store: RwLock<Option<Arc<dyn DocumentStore>>>,
    config: Arc<AppConfig>,
    clock: SharedClock,
    session: RwLock<SessionStateMachine>,
    session_updates: watch::Sender<Snapshot>,
    degraded: watch::Sender<bool>,
    transition_gate: Mutex<()>,
    transition_timeout: Option<Duration>,
    operators: OperatorGate,
    reset_guard: ResetGuard,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, operator_password: Option<String>) -> SharedState {
        Self::with_clock(config, operator_password, Arc::new(SystemClock))
    }

    /// Same as [`AppState::new`] with an explicit time source.
    pub fn with_clock(
        config: AppConfig,
        operator_password: Option<String>,
        clock: SharedClock,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let session = SessionStateMachine::new();
        let (session_tx, _rx) = watch::channel(session.snapshot());
        Arc::new(Self {
            store: RwLock::new(None),
            reset_guard: ResetGuard::new(config.reset_unlock_ttl()),
            config: Arc::new(config),
            clock,
            session: RwLock::new(session),
            session_updates: session_tx,
            degraded: degraded_tx,
            transition_gate: Mutex::new(()),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
            operators: OperatorGate::new(operator_password, OPERATOR_SESSION_TTL),
        })
    }

    /// Obtain a handle to the current document store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn DocumentStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Session-scoped repository over the installed store, or [`ServiceError::Degraded`].
    pub async fn repository(&self) -> Result<SessionRepository, ServiceError> {
        let store = self.store().await.ok_or(ServiceError::Degraded)?;
        Ok(SessionRepository::new(store, self.config.session_id()))
    }

    /// Install a new document store and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn DocumentStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current document store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Static configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Time source shared by every observer.
    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    /// Current time according to [`AppState::clock`].
    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    /// Signed-in operator registry.
    pub fn operators(&self) -> &OperatorGate {
        &self.operators
    }

    /// Safety lock in front of the reset.
    pub fn reset_guard(&self) -> &ResetGuard {
        &self.reset_guard
    }

    /// Subscribe to coordinator snapshots, including the pending command overlay.
    pub fn session_watcher(&self) -> watch::Receiver<Snapshot> {
        self.session_updates.subscribe()
    }

    /// Snapshot of the session coordinator.
    pub async fn snapshot(&self) -> Snapshot {
        let sm = self.session.read().await;
        sm.snapshot()
    }

    /// Update and broadcast the degraded flag when the value changes.
    fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    fn publish(&self, sm: &SessionStateMachine) {
        self.session_updates.send_replace(sm.snapshot());
    }

    async fn observe_session(&self, config: SessionConfig) {
        let mut sm = self.session.write().await;
        if sm.config() != &config {
            sm.observe(config);
            self.publish(&sm);
        }
    }

    /// Plan a transition against the freshly observed document.
    async fn plan_transition(&self, command: SessionCommand) -> Result<Plan, PlanError> {
        let mut sm = self.session.write().await;
        let plan = sm.plan(command, self.clock.now())?;
        self.publish(&sm);
        Ok(plan)
    }

    /// Apply the planned transition, returning the resulting document.
    async fn apply_planned_transition(&self, plan_id: PlanId) -> Result<SessionConfig, ApplyError> {
        let mut sm = self.session.write().await;
        let result = sm.apply(plan_id);
        self.publish(&sm);
        result
    }

    /// Abort a planned transition.
    async fn abort_transition(&self, plan_id: PlanId) -> Result<(), AbortError> {
        let mut sm = self.session.write().await;
        let result = sm.abort(plan_id);
        self.publish(&sm);
        result
    }

    /// Run `command` through plan, store write and apply/abort under the transition gate.
    ///
    /// `work` receives the plan and performs the store write; the session document is read
    /// fresh before planning so the precondition is checked against the store's state.
    pub async fn run_transition<F, Fut, T>(
        &self,
        command: SessionCommand,
        work: F,
    ) -> Result<(T, SessionConfig), ServiceError>
    where
        F: FnOnce(Plan) -> Fut,
        Fut: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.transition_gate.lock().await;
        let current = self.repository().await?.load_config().await?;
        self.observe_session(current).await;

        let plan = self.plan_transition(command.clone()).await?;
        let plan_id = plan.id;

        let work_future = work(plan);
        let outcome = if let Some(limit) = self.transition_timeout {
            match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(abort_err) = self.abort_transition(plan_id).await {
                        warn!(
                            command = ?command,
                            plan_id = %plan_id,
                            error = ?abort_err,
                            "failed to abort transition after timeout"
                        );
                    }
                    drop(gate);
                    return Err(ServiceError::Timeout);
                }
            }
        } else {
            work_future.await
        };

        match outcome {
            Ok(value) => {
                let next = self.apply_planned_transition(plan_id).await?;
                drop(gate);
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_transition(plan_id).await {
                    warn!(
                        command = ?command,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{session::SessionPhase, test_support::memory_state, *};

    fn start() -> SessionCommand {
        SessionCommand::Start {
            duration: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn state_starts_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default(), None);
        assert!(state.is_degraded());
        assert!(matches!(state.repository().await, Err(ServiceError::Degraded)));

        let (state, _, _) = memory_state().await;
        assert!(!state.is_degraded());
        state.clear_store().await;
        assert!(state.is_degraded());
    }

    #[tokio::test]
    async fn successful_work_applies_the_plan() {
        let (state, _, _) = memory_state().await;
        let repository = state.repository().await.unwrap();

        let (_, next) = state
            .run_transition(start(), |plan| async move {
                repository.apply_session_patch(&plan.patch).await?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(next.phase(), SessionPhase::Running);
        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.version, 1);
        assert!(snapshot.pending.is_none());
    }

    #[tokio::test]
    async fn failed_work_aborts_and_clears_the_overlay() {
        let (state, _, _) = memory_state().await;
        let mut updates = state.session_watcher();

        let err = state
            .run_transition(start(), |_plan| async move {
                Err::<(), _>(ServiceError::InvalidInput("boom".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let snapshot = updates.borrow_and_update().clone();
        assert!(snapshot.pending.is_none());
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.phase, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn invalid_commands_are_rejected_before_any_write() {
        let (state, _, _) = memory_state().await;
        let result = state
            .run_transition(SessionCommand::Resume, |_plan| async move {
                Err::<(), _>(ServiceError::Timeout)
            })
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    }
}
