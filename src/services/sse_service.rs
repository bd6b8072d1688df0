use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::{
    dto::{operator::OperatorStreamQuery, sse::ServerEvent},
    error::ServiceError,
    services::{
        auth_service, observer_service,
        projection::OperatorLocalState,
    },
    state::SharedState,
};

/// Identifies the observer behind an SSE connection for teardown logging.
#[derive(Clone, Copy)]
pub enum StreamKind {
    Operator,
    Team(Uuid),
    Display,
}

/// Authorise and open the operator projection; it ends once the token is signed out.
pub fn subscribe_operator(
    state: &SharedState,
    query: OperatorStreamQuery,
) -> Result<impl Stream<Item = ServerEvent> + Send + 'static + use<>, ServiceError> {
    let token = query
        .token
        .ok_or_else(|| ServiceError::Unauthorized("missing operator token".into()))?;
    auth_service::authorize(state, Some(&token))?;
    let local = OperatorLocalState::new(query.search, query.inspect);
    Ok(observer_service::operator_stream(state.clone(), local, token))
}

/// Forward a projection stream into an SSE response, tearing the projection down once
/// the client disconnects.
pub fn to_sse_stream<S>(
    events: S,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ServerEvent> + Send + 'static,
{
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: drives the projection and pushes into mpsc
    tokio::spawn(async move {
        let mut events = Box::pin(events);
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = events.next() => {
                    let Some(payload) = next else {
                        break;
                    };

                    let mut event = Event::default().data(payload.data);
                    if let Some(name) = payload.event {
                        event = event.event(name);
                    }

                    if tx.send(Ok(event)).await.is_err() {
                        break;
                    }
                }
            }
        }

        match kind {
            StreamKind::Operator => tracing::info!("Operator SSE stream disconnected"),
            StreamKind::Team(team_id) => {
                tracing::info!(team_id = %team_id, "Team SSE stream disconnected")
            }
            StreamKind::Display => tracing::info!("Display SSE stream disconnected"),
        }
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::memory_state;

    #[tokio::test]
    async fn operator_stream_requires_a_signed_in_token() {
        let (state, _, _) = memory_state().await;
        for token in [Some("forged".to_string()), None] {
            let query = OperatorStreamQuery {
                token,
                search: None,
                inspect: None,
            };
            assert!(matches!(
                subscribe_operator(&state, query),
                Err(ServiceError::Unauthorized(_))
            ));
        }
    }
}
