//! Typed accessors over the document store for the session document and team roster.

use std::{sync::Arc, time::SystemTime};

use futures::{StreamExt, stream::BoxStream};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{
        document_store::{
            CollectionQuery, Document, DocumentPath, DocumentStore, DocumentUpdate, SortDirection,
            StoredDocument, WriteMode,
        },
        models::{
            SessionConfigEntity, TeamEntity, fields, session_patch_fields, timestamp_millis,
        },
        storage::{StorageError, StorageResult},
    },
    state::{
        roster::{ChallengeId, Team},
        session::{SessionConfig, SessionPatch},
    },
};

/// Collection holding the session singleton.
pub const SYSTEM_COLLECTION: &str = "system";
/// Id of the session singleton.
pub const CONFIG_DOCUMENT_ID: &str = "config";

/// Session-scoped view of a [`DocumentStore`].
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn DocumentStore>,
    teams_collection: String,
}

impl SessionRepository {
    /// Bind the repository to `session_id` on `store`.
    pub fn new(store: Arc<dyn DocumentStore>, session_id: &str) -> Self {
        Self {
            store,
            teams_collection: format!("sessions/{session_id}/teams"),
        }
    }

    fn config_path() -> DocumentPath {
        DocumentPath::new(SYSTEM_COLLECTION, CONFIG_DOCUMENT_ID)
    }

    fn team_path(&self, id: Uuid) -> DocumentPath {
        DocumentPath::new(self.teams_collection.clone(), id.to_string())
    }

    fn teams_query(&self) -> CollectionQuery {
        CollectionQuery::all(self.teams_collection.clone())
    }

    /// Read the session document, creating the default one when it does not exist yet.
    pub async fn load_config(&self) -> StorageResult<SessionConfig> {
        let path = Self::config_path();
        match self.store.read(&path).await? {
            Some(document) => decode_config(&path, document),
            None => {
                let config = SessionConfig::default();
                self.store
                    .write(&path, encode(&path, &SessionConfigEntity::from(&config))?, WriteMode::Merge)
                    .await?;
                debug!("created default session document");
                Ok(config)
            }
        }
    }

    /// Merge the fields of `patch` into the session document.
    pub async fn apply_session_patch(&self, patch: &SessionPatch) -> StorageResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.store
            .write(&Self::config_path(), session_patch_fields(patch), WriteMode::Merge)
            .await
    }

    /// Overwrite the whole session document.
    pub async fn overwrite_config(&self, config: &SessionConfig) -> StorageResult<()> {
        let path = Self::config_path();
        let document = encode(&path, &SessionConfigEntity::from(config))?;
        self.store.write(&path, document, WriteMode::Replace).await
    }

    /// Persist a freshly registered team.
    pub async fn insert_team(&self, team: &Team) -> StorageResult<()> {
        let path = self.team_path(team.id);
        let document = encode(&path, &TeamEntity::from(team))?;
        self.store.write(&path, document, WriteMode::Replace).await
    }

    /// Look a team up by id.
    pub async fn find_team(&self, id: Uuid) -> StorageResult<Option<Team>> {
        let path = self.team_path(id);
        self.store
            .read(&path)
            .await?
            .map(|document| decode_team(&path, id, document))
            .transpose()
    }

    /// Every registered team in store order.
    pub async fn list_teams(&self) -> StorageResult<Vec<Team>> {
        let documents = self.store.query(&self.teams_query()).await?;
        Ok(decode_teams(&self.teams_collection, documents))
    }

    /// The `limit` best teams by score.
    pub async fn top_teams(&self, limit: usize) -> StorageResult<Vec<Team>> {
        let query = self
            .teams_query()
            .order_by(fields::SCORE, SortDirection::Descending)
            .limit(limit);
        let documents = self.store.query(&query).await?;
        Ok(decode_teams(&self.teams_collection, documents))
    }

    /// Add `challenge` to the pending set and record the evidence link, provided it is
    /// neither pending nor completed yet.
    pub async fn record_submission(
        &self,
        id: Uuid,
        challenge: ChallengeId,
        url: &str,
        now: SystemTime,
    ) -> StorageResult<Team> {
        let path = self.team_path(id);
        let update = DocumentUpdate::new()
            .require_absent(fields::PENDING_CHALLENGE_IDS, challenge)
            .require_absent(fields::COMPLETED_CHALLENGES, challenge)
            .array_union(fields::PENDING_CHALLENGE_IDS, vec![Value::from(challenge)])
            .set(fields::SUBMISSION_URL, url)
            .set(fields::PENDING_SUBMISSION, true)
            .set(fields::LAST_ACTIVE_AT, timestamp_millis(now));
        let document = self.store.update(&path, update).await?;
        decode_team(&path, id, document)
    }

    /// Credit `points` for `challenge`, provided it is still pending.
    pub async fn record_grade(
        &self,
        id: Uuid,
        challenge: ChallengeId,
        points: u32,
    ) -> StorageResult<Team> {
        let path = self.team_path(id);
        let update = DocumentUpdate::new()
            .require_contains(fields::PENDING_CHALLENGE_IDS, challenge)
            .increment(fields::SCORE, i64::from(points))
            .array_remove(fields::PENDING_CHALLENGE_IDS, vec![Value::from(challenge)])
            .array_union(fields::COMPLETED_CHALLENGES, vec![Value::from(challenge)])
            .set(fields::PENDING_SUBMISSION, false);
        let document = self.store.update(&path, update).await?;
        decode_team(&path, id, document)
    }

    /// Delete every team document, returning how many were removed.
    pub async fn delete_all_teams(&self) -> StorageResult<usize> {
        let documents = self.store.query(&self.teams_query()).await?;
        let mut removed = 0;
        for document in documents {
            let path = DocumentPath::new(self.teams_collection.clone(), document.id);
            if self.store.delete(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Live session document; a missing document reads as the default.
    pub fn watch_config(&self) -> BoxStream<'static, StorageResult<SessionConfig>> {
        let path = Self::config_path();
        self.store
            .subscribe_document(&path)
            .map(move |update| match update? {
                Some(document) => decode_config(&path, document),
                None => Ok(SessionConfig::default()),
            })
            .boxed()
    }

    /// Live team document; `None` once the team is deleted.
    pub fn watch_team(&self, id: Uuid) -> BoxStream<'static, StorageResult<Option<Team>>> {
        let path = self.team_path(id);
        self.store
            .subscribe_document(&path)
            .map(move |update| {
                update?
                    .map(|document| decode_team(&path, id, document))
                    .transpose()
            })
            .boxed()
    }

    /// Live roster.
    pub fn watch_teams(&self) -> BoxStream<'static, StorageResult<Vec<Team>>> {
        let collection = self.teams_collection.clone();
        self.store
            .subscribe_query(&self.teams_query())
            .map(move |update| Ok(decode_teams(&collection, update?)))
            .boxed()
    }
}

fn encode<T: Serialize>(path: &DocumentPath, entity: &T) -> StorageResult<Document> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Ok(Document::new()),
        Err(source) => Err(StorageError::Malformed {
            path: path.to_string(),
            source,
        }),
    }
}

fn decode<T: DeserializeOwned>(path: &DocumentPath, document: Document) -> StorageResult<T> {
    serde_json::from_value(Value::Object(document)).map_err(|source| StorageError::Malformed {
        path: path.to_string(),
        source,
    })
}

fn decode_config(path: &DocumentPath, document: Document) -> StorageResult<SessionConfig> {
    decode::<SessionConfigEntity>(path, document).map(SessionConfig::from)
}

fn decode_team(path: &DocumentPath, id: Uuid, document: Document) -> StorageResult<Team> {
    decode::<TeamEntity>(path, document).map(|entity| entity.into_team(id))
}

/// Skips documents whose id is not a team id instead of failing the whole roster.
fn decode_teams(collection: &str, documents: Vec<StoredDocument>) -> Vec<Team> {
    documents
        .into_iter()
        .filter_map(|document| {
            let path = DocumentPath::new(collection, document.id.clone());
            let Ok(id) = Uuid::parse_str(&document.id) else {
                warn!(path = %path, "ignoring team document with a non-uuid id");
                return None;
            };
            match decode_team(&path, id, document.fields) {
                Ok(team) => Some(team),
                Err(err) => {
                    warn!(path = %path, error = %err, "ignoring unreadable team document");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{
        dao::document_store::memory::MemoryDocumentStore,
        state::session::SessionStatus,
    };

    fn repository() -> (SessionRepository, MemoryDocumentStore) {
        let store = MemoryDocumentStore::new();
        (SessionRepository::new(Arc::new(store.clone()), "vibe-live"), store)
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn first_read_creates_the_default_document() {
        let (repository, store) = repository();

        assert_eq!(repository.load_config().await.unwrap(), SessionConfig::default());
        let stored = store
            .read(&DocumentPath::new(SYSTEM_COLLECTION, CONFIG_DOCUMENT_ID))
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn patches_merge_into_the_session_document() {
        let (repository, _) = repository();
        repository.load_config().await.unwrap();

        let patch = SessionPatch {
            status: Some(SessionStatus::Active),
            is_running: Some(true),
            end_time: Some(Some(at(1_500))),
            remaining_seconds: Some(None),
        };
        repository.apply_session_patch(&patch).await.unwrap();

        let config = repository.load_config().await.unwrap();
        assert_eq!(config, patch.apply_to(&SessionConfig::default()));
    }

    #[tokio::test]
    async fn grading_twice_fails_the_precondition() {
        let (repository, _) = repository();
        let team = Team::new(Uuid::new_v4(), "Off By One", at(0));
        repository.insert_team(&team).await.unwrap();

        repository
            .record_submission(team.id, 3, "https://example.com/3", at(10))
            .await
            .unwrap();
        let graded = repository.record_grade(team.id, 3, 20).await.unwrap();
        assert_eq!(graded.score, 20);
        assert!(graded.completed_challenges.contains(&3));
        assert!(graded.pending_challenge_ids.is_empty());
        assert!(!graded.pending_submission);

        let err = repository.record_grade(team.id, 3, 20).await.unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed { .. }));
        let reloaded = repository.find_team(team.id).await.unwrap().unwrap();
        assert_eq!(reloaded.score, 20);
    }

    #[tokio::test]
    async fn submission_after_grade_leaves_the_document_untouched() {
        let (repository, store) = repository();
        let team = Team::new(Uuid::new_v4(), "Race Condition", at(0));
        repository.insert_team(&team).await.unwrap();

        repository
            .record_submission(team.id, 3, "https://example.com/a", at(10))
            .await
            .unwrap();
        let err = repository
            .record_submission(team.id, 3, "https://example.com/again", at(15))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed { .. }));

        repository.record_grade(team.id, 3, 20).await.unwrap();
        let err = repository
            .record_submission(team.id, 3, "https://example.com/b", at(20))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed { .. }));

        let raw = store.read(&repository.team_path(team.id)).await.unwrap().unwrap();
        assert_eq!(raw.get("pendingChallengeIds"), Some(&json!([])));
        assert_eq!(raw.get("completedChallenges"), Some(&json!([3])));
        assert_eq!(raw.get("pendingSubmission"), Some(&json!(false)));
        assert_eq!(raw.get("submissionUrl"), Some(&json!("https://example.com/a")));
    }

    #[tokio::test]
    async fn top_teams_orders_by_score() {
        let (repository, _) = repository();
        for (name, score) in [("low", 10), ("high", 50), ("mid", 30)] {
            let mut team = Team::new(Uuid::new_v4(), name, at(0));
            team.score = score;
            repository.insert_team(&team).await.unwrap();
        }

        let names: Vec<_> = repository
            .top_teams(2)
            .await
            .unwrap()
            .into_iter()
            .map(|team| team.name)
            .collect();
        assert_eq!(names, ["high", "mid"]);
    }

    #[tokio::test]
    async fn roster_skips_foreign_documents() {
        let (repository, store) = repository();
        repository
            .insert_team(&Team::new(Uuid::new_v4(), "real", at(0)))
            .await
            .unwrap();
        store
            .write(
                &DocumentPath::new("sessions/vibe-live/teams", "not-a-uuid"),
                Document::new(),
                WriteMode::Replace,
            )
            .await
            .unwrap();

        assert_eq!(repository.list_teams().await.unwrap().len(), 1);
        assert_eq!(repository.delete_all_teams().await.unwrap(), 2);
        assert!(repository.list_teams().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn watch_team_reports_deletion() {
        let (repository, _) = repository();
        let team = Team::new(Uuid::new_v4(), "watched", at(0));
        repository.insert_team(&team).await.unwrap();

        let mut updates = repository.watch_team(team.id);
        assert_eq!(updates.next().await.unwrap().unwrap(), Some(team));

        repository.delete_all_teams().await.unwrap();
        assert_eq!(updates.next().await.unwrap().unwrap(), None);
    }
}
