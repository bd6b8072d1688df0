//! Live observer projections. Each connection runs one cooperative loop holding one
//! subscription per document of interest and one countdown; every store notification,
//! countdown tick and degraded-mode flip re-renders the full projection.

use std::{future::Future, time::Duration};

use async_stream::stream;
use futures::{Stream, StreamExt, stream::BoxStream};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{session_repository::SessionRepository, storage::StorageResult},
    dto::{
        sse::{ServerEvent, StreamError},
        views::{DisplayView, LeaderboardEntry, OperatorView, TeamView, TimerView},
    },
    error::ServiceError,
    services::projection::{self, OperatorLocalState, ProjectionContext},
    state::{
        SharedState,
        roster::Team,
        session::{SessionConfig, SessionPhase},
        timer::{Countdown, displayed_remaining},
    },
};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
const STREAM_ERROR_EVENT: &str = "stream_error";
const SIGNED_OUT_EVENT: &str = "signed_out";

/// Everything a projection needs to render once.
struct Frame<'a, S> {
    state: &'a SharedState,
    repository: Option<&'a SessionRepository>,
    session: &'a SessionConfig,
    remaining: u64,
    source: &'a S,
}

impl<'a, S> Frame<'a, S> {
    fn context(&self) -> ProjectionContext<'a> {
        ProjectionContext {
            config: self.state.config(),
            now: self.state.now(),
            degraded: self.state.is_degraded(),
        }
    }

    fn timer(&self) -> TimerView {
        projection::timer_view(self.session, self.remaining, self.state.now())
    }
}

/// A role-specific projection over the session document plus one more source.
trait Projector: Send + 'static {
    /// Role-specific documents besides the session document.
    type Source: Default + Send + Sync + 'static;
    type View: Serialize + Send;

    /// SSE event name.
    const EVENT: &'static str;
    /// Re-render when the coordinator's pending overlay changes.
    const FOLLOWS_COORDINATOR: bool = false;
    /// Re-check [`Projector::is_authorized`] after every operator sign-out.
    const FOLLOWS_SIGN_OUT: bool = false;

    /// Whether the viewer may still receive frames; the stream ends once this turns false.
    fn is_authorized(&self, _state: &SharedState) -> bool {
        true
    }

    fn subscribe(
        &self,
        repository: &SessionRepository,
    ) -> BoxStream<'static, StorageResult<Self::Source>>;

    fn load(
        &self,
        repository: &SessionRepository,
    ) -> impl Future<Output = StorageResult<Self::Source>> + Send;

    fn render(
        &mut self,
        frame: Frame<'_, Self::Source>,
    ) -> impl Future<Output = Self::View> + Send;
}

struct OperatorProjector {
    local: OperatorLocalState,
    /// `None` when the caller already checked the operator.
    token: Option<String>,
}

impl Projector for OperatorProjector {
    type Source = Vec<Team>;
    type View = OperatorView;

    const EVENT: &'static str = "operator_view";
    const FOLLOWS_COORDINATOR: bool = true;
    const FOLLOWS_SIGN_OUT: bool = true;

    fn is_authorized(&self, state: &SharedState) -> bool {
        match &self.token {
            Some(token) => state.operators().is_operator(token, state.now()),
            None => true,
        }
    }

    fn subscribe(&self, repository: &SessionRepository) -> BoxStream<'static, StorageResult<Vec<Team>>> {
        repository.watch_teams()
    }

    async fn load(&self, repository: &SessionRepository) -> StorageResult<Vec<Team>> {
        repository.list_teams().await
    }

    async fn render(&mut self, frame: Frame<'_, Vec<Team>>) -> OperatorView {
        let coordinator = frame.state.snapshot().await;
        let reset_unlocked = frame
            .state
            .reset_guard()
            .is_unlocked(frame.state.now())
            .await;
        projection::operator_view(
            frame.context(),
            frame.timer(),
            &coordinator,
            frame.source,
            &self.local,
            reset_unlocked,
        )
    }
}

struct TeamProjector {
    team_id: Uuid,
}

impl Projector for TeamProjector {
    type Source = Option<Team>;
    type View = TeamView;

    const EVENT: &'static str = "team_view";

    fn subscribe(
        &self,
        repository: &SessionRepository,
    ) -> BoxStream<'static, StorageResult<Option<Team>>> {
        repository.watch_team(self.team_id)
    }

    async fn load(&self, repository: &SessionRepository) -> StorageResult<Option<Team>> {
        repository.find_team(self.team_id).await
    }

    async fn render(&mut self, frame: Frame<'_, Option<Team>>) -> TeamView {
        projection::team_view(frame.context(), frame.timer(), frame.source.as_ref())
    }
}

/// Keeps the leaderboard read at most once per transition into `revealed`.
#[derive(Default)]
struct DisplayProjector {
    leaderboard: Option<Vec<LeaderboardEntry>>,
}

impl Projector for DisplayProjector {
    type Source = Vec<Team>;
    type View = DisplayView;

    const EVENT: &'static str = "display_view";

    fn subscribe(&self, repository: &SessionRepository) -> BoxStream<'static, StorageResult<Vec<Team>>> {
        repository.watch_teams()
    }

    async fn load(&self, repository: &SessionRepository) -> StorageResult<Vec<Team>> {
        repository.list_teams().await
    }

    async fn render(&mut self, frame: Frame<'_, Vec<Team>>) -> DisplayView {
        if frame.session.phase() != SessionPhase::Revealed {
            self.leaderboard = None;
        } else if self.leaderboard.is_none() {
            if let Some(repository) = frame.repository {
                let size = frame.state.config().leaderboard_size();
                match repository.top_teams(size).await {
                    Ok(teams) => self.leaderboard = Some(projection::leaderboard(&teams, size)),
                    Err(err) => warn!(error = %err, "failed to read the leaderboard"),
                }
            }
        }

        projection::display_view(
            frame.context(),
            frame.timer(),
            frame.source.len(),
            self.leaderboard.clone(),
        )
    }
}

/// Live operator console projection for the operator holding `token`.
pub fn operator_stream(
    state: SharedState,
    local: OperatorLocalState,
    token: String,
) -> impl Stream<Item = ServerEvent> + Send + 'static {
    observe(
        state,
        OperatorProjector {
            local,
            token: Some(token),
        },
    )
}

/// Live projection for one team client.
pub fn team_stream(state: SharedState, team_id: Uuid) -> impl Stream<Item = ServerEvent> + Send + 'static {
    observe(state, TeamProjector { team_id })
}

/// Live projection for the shared display.
pub fn display_stream(state: SharedState) -> impl Stream<Item = ServerEvent> + Send + 'static {
    observe(state, DisplayProjector::default())
}

/// One-shot operator console projection.
pub async fn operator_snapshot(
    state: &SharedState,
    local: OperatorLocalState,
) -> Result<OperatorView, ServiceError> {
    snapshot(state, OperatorProjector { local, token: None }).await
}

/// One-shot team projection.
pub async fn team_snapshot(state: &SharedState, team_id: Uuid) -> Result<TeamView, ServiceError> {
    snapshot(state, TeamProjector { team_id }).await
}

/// One-shot display projection.
pub async fn display_snapshot(state: &SharedState) -> Result<DisplayView, ServiceError> {
    snapshot(state, DisplayProjector::default()).await
}

async fn snapshot<P: Projector>(state: &SharedState, mut projector: P) -> Result<P::View, ServiceError> {
    let repository = state.repository().await?;
    let session = repository.load_config().await?;
    let source = projector.load(&repository).await?;
    let remaining = displayed_remaining(&session, state.now());

    let frame = Frame {
        state,
        repository: Some(&repository),
        session: &session,
        remaining,
        source: &source,
    };
    Ok(projector.render(frame).await)
}

enum Wake<S> {
    Session(Option<StorageResult<SessionConfig>>),
    Source(Option<StorageResult<S>>),
    Tick,
    Coordinator(bool),
    SignOut(bool),
    Degraded(bool),
}

fn observe<P: Projector>(
    state: SharedState,
    mut projector: P,
) -> impl Stream<Item = ServerEvent> + Send + 'static {
    stream! {
        let mut degraded = state.degraded_watcher();
        let mut coordinator = state.session_watcher();
        let mut sign_outs = state.operators().revocations();

        'connection: loop {
            degraded.borrow_and_update();
            if !projector.is_authorized(&state) {
                if let Some(event) = signed_out::<P>() {
                    yield event;
                }
                break;
            }

            let Ok(repository) = state.repository().await else {
                let session = SessionConfig::default();
                let source = P::Source::default();
                let frame = Frame {
                    state: &state,
                    repository: None,
                    session: &session,
                    remaining: 0,
                    source: &source,
                };
                if let Some(event) = encode::<P>(&projector.render(frame).await) {
                    yield event;
                }
                let alive = tokio::select! {
                    changed = degraded.changed() => changed.is_ok(),
                    changed = sign_outs.changed(), if P::FOLLOWS_SIGN_OUT => changed.is_ok(),
                };
                if !alive {
                    break;
                }
                continue;
            };

            let mut session_updates = repository.watch_config();
            let mut source_updates = projector.subscribe(&repository);
            let mut countdown = Countdown::new(SessionConfig::default(), state.clock());
            let mut latest_session: Option<SessionConfig> = None;
            let mut latest_source: Option<P::Source> = None;

            loop {
                let wake = tokio::select! {
                    update = session_updates.next() => Wake::Session(update),
                    update = source_updates.next() => Wake::Source(update),
                    _ = countdown.changed() => Wake::Tick,
                    changed = coordinator.changed(), if P::FOLLOWS_COORDINATOR => {
                        Wake::Coordinator(changed.is_ok())
                    }
                    changed = sign_outs.changed(), if P::FOLLOWS_SIGN_OUT => {
                        Wake::SignOut(changed.is_ok())
                    }
                    changed = degraded.changed() => Wake::Degraded(changed.is_ok()),
                };

                match wake {
                    Wake::Session(Some(Ok(session))) => {
                        countdown.reconcile(&session);
                        latest_session = Some(session);
                    }
                    Wake::Source(Some(Ok(source))) => latest_source = Some(source),
                    Wake::Tick | Wake::Coordinator(true) | Wake::SignOut(true) => {}
                    Wake::Coordinator(false) | Wake::SignOut(false) | Wake::Degraded(false) => {
                        break 'connection;
                    }
                    Wake::Degraded(true) => continue 'connection,
                    Wake::Session(Some(Err(err))) | Wake::Source(Some(Err(err))) => {
                        warn!(stream = P::EVENT, error = %err, "projection subscription failed; resubscribing");
                        let payload = StreamError {
                            message: err.to_string(),
                        };
                        if let Ok(event) = ServerEvent::json(Some(STREAM_ERROR_EVENT.to_string()), &payload) {
                            yield event;
                        }
                        sleep(RESUBSCRIBE_DELAY).await;
                        continue 'connection;
                    }
                    Wake::Session(None) | Wake::Source(None) => {
                        debug!(stream = P::EVENT, "projection subscription ended; resubscribing");
                        sleep(RESUBSCRIBE_DELAY).await;
                        continue 'connection;
                    }
                }

                if !projector.is_authorized(&state) {
                    if let Some(event) = signed_out::<P>() {
                        yield event;
                    }
                    break 'connection;
                }

                if let (Some(session), Some(source)) = (&latest_session, &latest_source) {
                    let frame = Frame {
                        state: &state,
                        repository: Some(&repository),
                        session,
                        remaining: countdown.remaining(),
                        source,
                    };
                    if let Some(event) = encode::<P>(&projector.render(frame).await) {
                        yield event;
                    }
                }
            }
        }
    }
}

fn signed_out<P: Projector>() -> Option<ServerEvent> {
    debug!(stream = P::EVENT, "viewer signed out; closing projection");
    let payload = StreamError {
        message: "operator token is no longer valid".into(),
    };
    ServerEvent::json(Some(SIGNED_OUT_EVENT.to_string()), &payload).ok()
}

fn encode<P: Projector>(view: &P::View) -> Option<ServerEvent> {
    match ServerEvent::json(Some(P::EVENT.to_string()), view) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(stream = P::EVENT, error = %err, "failed to serialise projection");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use futures::{Stream, StreamExt};
    use serde_json::Value;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::document_store::memory::MemoryDocumentStore,
        dto::{
            operator::{GradeRequest, SignInRequest, StartSessionRequest},
            team::{RegisterTeamRequest, SubmissionRequest},
        },
        services::{auth_service, roster_service, session_service},
        state::{
            AppState,
            test_support::{OPERATOR_PASSWORD, memory_state},
        },
    };

    /// Pull events until one satisfies `accept`, returning its payload.
    async fn wait_for<S>(stream: &mut S, accept: impl Fn(&Value) -> bool) -> Value
    where
        S: Stream<Item = ServerEvent> + Unpin,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = stream.next().await.expect("stream ended");
                let payload: Value = serde_json::from_str(&event.data).unwrap();
                if accept(&payload) {
                    return payload;
                }
            }
        })
        .await
        .expect("no matching projection in time")
    }

    async fn join(state: &SharedState, name: &str) -> Uuid {
        roster_service::register(
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

    async fn start(state: &SharedState) {
        session_service::start(
            state,
            StartSessionRequest {
                duration_minutes: Some(25),
            },
        )
        .await
        .unwrap();
    }

    fn operator_token(state: &SharedState) -> String {
        auth_service::sign_in(
            state,
            SignInRequest {
                password: OPERATOR_PASSWORD.into(),
            },
        )
        .unwrap()
        .token
    }

    #[tokio::test]
    async fn operator_stream_follows_the_roster() {
        let (state, _, _) = memory_state().await;
        let token = operator_token(&state);
        let mut stream = Box::pin(operator_stream(
            state.clone(),
            OperatorLocalState::default(),
            token,
        ));

        let first = wait_for(&mut stream, |_| true).await;
        assert_eq!(first["metrics"]["total"], 0);
        assert_eq!(first["degraded"], false);

        join(&state, "Byte Me").await;
        let view = wait_for(&mut stream, |view| view["metrics"]["total"] == 1).await;
        assert_eq!(view["queue"][0]["name"], "Byte Me");
    }

    #[tokio::test]
    async fn operator_stream_ends_after_sign_out() {
        let (state, _, _) = memory_state().await;
        let token = operator_token(&state);
        let mut stream = Box::pin(operator_stream(
            state.clone(),
            OperatorLocalState::default(),
            token.clone(),
        ));
        wait_for(&mut stream, |_| true).await;

        auth_service::sign_out(&state, &token);
        let last = timeout(Duration::from_secs(5), async {
            let mut last = None;
            while let Some(event) = stream.next().await {
                last = event.event;
            }
            last
        })
        .await
        .expect("stream kept running after sign-out");
        assert_eq!(last.as_deref(), Some(SIGNED_OUT_EVENT));
    }

    #[tokio::test]
    async fn team_stream_moves_from_standby_to_board() {
        let (state, _, _) = memory_state().await;
        let id = join(&state, "Byte Me").await;
        let mut stream = Box::pin(team_stream(state.clone(), id));

        wait_for(&mut stream, |view| view["screen"]["screen"] == "standby").await;
        start(&state).await;
        let board = wait_for(&mut stream, |view| view["screen"]["screen"] == "board").await;
        assert_eq!(board["screen"]["can_submit"], true);
        assert_eq!(board["timer"]["phase"], "running");
    }

    #[tokio::test]
    async fn unknown_teams_see_the_login_screen() {
        let (state, _, _) = memory_state().await;
        let view = team_snapshot(&state, Uuid::new_v4()).await.unwrap();
        assert!(view.team.is_none());
        assert_eq!(
            serde_json::to_value(&view.screen).unwrap()["screen"],
            "login"
        );
    }

    #[tokio::test]
    async fn display_reads_the_leaderboard_on_reveal() {
        let (state, _, _) = memory_state().await;
        start(&state).await;
        let id = join(&state, "Byte Me").await;
        roster_service::submit(
            &state,
            id,
            SubmissionRequest {
                challenge_id: 1,
                url: "https://github.com/byte-me/bubble".into(),
            },
        )
        .await
        .unwrap();
        roster_service::grade(
            &state,
            id,
            GradeRequest {
                challenge_id: 1,
                points: 20,
            },
        )
        .await
        .unwrap();

        let mut stream = Box::pin(display_stream(state.clone()));
        let live = wait_for(&mut stream, |view| view["team_count"] == 1).await;
        assert!(live["leaderboard"].is_null());

        session_service::reveal(&state).await.unwrap();
        let revealed = wait_for(&mut stream, |view| !view["leaderboard"].is_null()).await;
        assert_eq!(revealed["leaderboard"][0]["score"], 20);
        assert_eq!(revealed["timer"]["phase"], "revealed");

        let snapshot = display_snapshot(&state).await.unwrap();
        assert_eq!(snapshot.leaderboard.map(|board| board.len()), Some(1));
    }

    #[tokio::test]
    async fn degraded_observers_recover_when_the_store_returns() {
        let state = AppState::new(AppConfig::default(), None);
        let mut stream = Box::pin(display_stream(state.clone()));

        let offline = wait_for(&mut stream, |_| true).await;
        assert_eq!(offline["degraded"], true);

        state
            .install_store(Arc::new(MemoryDocumentStore::new()))
            .await;
        let online = wait_for(&mut stream, |view| view["degraded"] == false).await;
        assert_eq!(online["team_count"], 0);
    }

    #[tokio::test]
    async fn operator_snapshot_applies_local_filters() {
        let (state, _, _) = memory_state().await;
        let id = join(&state, "Byte Me").await;
        join(&state, "Null Pointers").await;

        let view = operator_snapshot(
            &state,
            OperatorLocalState::new(Some("null".into()), Some(id)),
        )
        .await
        .unwrap();
        assert_eq!(view.queue.len(), 1);
        assert_eq!(view.metrics.total, 2);
        assert_eq!(view.inspected.map(|panel| panel.team.id), Some(id));
    }
}
