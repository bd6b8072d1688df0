use std::{sync::Arc, time::Duration};

use async_stream::try_stream;
use futures::{Stream, future::BoxFuture, stream::BoxStream};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, from_value};
use tracing::debug;

use crate::dao::{
    document_store::{
        CollectionQuery, Document, DocumentPath, DocumentStore, DocumentUpdate, StoredDocument,
        WriteMode,
        ops::{apply_update, run_query, write_fields},
    },
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, ChangeFilter, ChangesResponse, CouchDocument, DatabaseInfo, END_SUFFIX,
        collection_prefix, doc_id, local_id, seq_param,
    },
};

/// [`DocumentStore`] persisted in a CouchDB database.
///
/// Writes carry the last seen `_rev` and retry on conflicts; subscriptions follow the
/// `_changes` feed in long-poll mode.
#[derive(Clone)]
pub struct CouchDocumentStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    longpoll_timeout: Duration,
    conflict_retries: usize,
}

impl CouchDocumentStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            database: Arc::from(config.database),
            auth: config
                .credentials
                .map(|(user, pass)| (Arc::<str>::from(user), Arc::<str>::from(pass))),
            longpoll_timeout: config.longpoll_timeout,
            conflict_retries: config.conflict_retries.max(1),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.with_auth(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .with_auth(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412 means another instance created it in between.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn decode<T>(response: reqwest::Response, path: &str) -> CouchResult<T>
    where
        T: DeserializeOwned,
    {
        response
            .json::<T>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: path.to_string(),
                source,
            })
    }

    async fn get_document(&self, doc_id: &str) -> CouchResult<Option<CouchDocument>> {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Self::decode(response, doc_id).await.map(Some),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document(&self, document: &CouchDocument) -> CouchResult<()> {
        let response = self
            .request(Method::PUT, &document.id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: document.id.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: document.id.clone(),
            }),
            status if status.is_success() => Ok(()),
            other => Err(CouchDaoError::RequestStatus {
                path: document.id.clone(),
                status: other,
            }),
        }
    }

    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<bool> {
        let response = self
            .request(Method::DELETE, doc_id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: doc_id.to_string(),
            }),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_collection(&self, collection: &str) -> CouchResult<Vec<StoredDocument>> {
        const ALL_DOCS: &str = "_all_docs";
        let prefix = collection_prefix(collection);
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload: AllDocsResponse = Self::decode(response, ALL_DOCS).await?;

        let mut documents = Vec::with_capacity(payload.rows.len());
        for row in payload.rows {
            let (Some(doc), Some(id)) = (row.doc, local_id(&row.id, &prefix)) else {
                continue;
            };
            let parsed: CouchDocument =
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: row.id.clone(),
                    source,
                })?;
            documents.push(StoredDocument {
                id: id.to_string(),
                fields: parsed.into_fields(),
            });
        }

        Ok(documents)
    }

    async fn update_seq(&self) -> CouchResult<Value> {
        let url = self.database_url();
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: url,
                status: response.status(),
            });
        }

        let info: DatabaseInfo = Self::decode(response, &url).await?;
        Ok(info.update_seq)
    }

    async fn poll_changes(&self, since: &Value, filter: &ChangeFilter) -> CouchResult<ChangesResponse> {
        const CHANGES: &str = "_changes";
        let query = [
            ("feed", "longpoll".to_string()),
            ("since", seq_param(since)),
            ("timeout", self.longpoll_timeout.as_millis().to_string()),
            ("filter", filter.name().to_string()),
        ];

        let response = self
            .request(Method::POST, CHANGES)
            .query(&query)
            .json(&filter.body())
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        Self::decode(response, CHANGES).await
    }

    async fn write_document(
        &self,
        path: &DocumentPath,
        fields: Document,
        mode: WriteMode,
    ) -> StorageResult<()> {
        let doc_id = doc_id(path);
        for _ in 0..self.conflict_retries {
            let existing = self.get_document(&doc_id).await?;
            let rev = existing.as_ref().and_then(|doc| doc.rev.clone());
            let next = write_fields(existing.map(CouchDocument::into_fields), fields.clone(), mode);

            match self
                .put_document(&CouchDocument::new(doc_id.clone(), rev, next))
                .await
            {
                Ok(()) => return Ok(()),
                Err(CouchDaoError::Conflict { .. }) => {
                    debug!(doc_id = %doc_id, "revision conflict on write, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(CouchDaoError::ConflictRetriesExhausted {
            path: doc_id,
            attempts: self.conflict_retries,
        }
        .into())
    }

    async fn update_document(
        &self,
        path: &DocumentPath,
        update: &DocumentUpdate,
    ) -> StorageResult<Document> {
        let doc_id = doc_id(path);
        for _ in 0..self.conflict_retries {
            let existing =
                self.get_document(&doc_id)
                    .await?
                    .ok_or_else(|| StorageError::MissingDocument {
                        path: path.to_string(),
                    })?;
            let rev = existing.rev.clone();
            let next = apply_update(path, &existing.into_fields(), update)?;

            match self
                .put_document(&CouchDocument::new(doc_id.clone(), rev, next.clone()))
                .await
            {
                Ok(()) => return Ok(next),
                Err(CouchDaoError::Conflict { .. }) => {
                    debug!(doc_id = %doc_id, "revision conflict on update, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(CouchDaoError::ConflictRetriesExhausted {
            path: doc_id,
            attempts: self.conflict_retries,
        }
        .into())
    }

    async fn remove_document(&self, path: &DocumentPath) -> StorageResult<bool> {
        let doc_id = doc_id(path);
        for _ in 0..self.conflict_retries {
            let Some(rev) = self
                .get_document(&doc_id)
                .await?
                .and_then(|existing| existing.rev)
            else {
                return Ok(false);
            };

            match self.delete_document(&doc_id, &rev).await {
                Ok(removed) => return Ok(removed),
                Err(CouchDaoError::Conflict { .. }) => {
                    debug!(doc_id = %doc_id, "revision conflict on delete, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(CouchDaoError::ConflictRetriesExhausted {
            path: doc_id,
            attempts: self.conflict_retries,
        }
        .into())
    }

    fn document_changes(
        &self,
        path: DocumentPath,
    ) -> impl Stream<Item = StorageResult<Option<Document>>> + Send + 'static {
        let store = self.clone();
        try_stream! {
            let doc_id = doc_id(&path);
            let filter = ChangeFilter::Document(doc_id.clone());
            let mut since = store.update_seq().await.map_err(StorageError::from)?;
            let initial = store.get_document(&doc_id).await.map_err(StorageError::from)?;
            yield initial.map(CouchDocument::into_fields);

            loop {
                let changes = store
                    .poll_changes(&since, &filter)
                    .await
                    .map_err(StorageError::from)?;
                since = changes.last_seq;
                if !changes.results.iter().any(|row| row.id == doc_id) {
                    continue;
                }

                let current = store.get_document(&doc_id).await.map_err(StorageError::from)?;
                yield current.map(CouchDocument::into_fields);
            }
        }
    }

    fn query_changes(
        &self,
        query: CollectionQuery,
    ) -> impl Stream<Item = StorageResult<Vec<StoredDocument>>> + Send + 'static {
        let store = self.clone();
        try_stream! {
            let prefix = collection_prefix(&query.collection);
            let filter = ChangeFilter::Prefix(prefix.clone());
            let mut since = store.update_seq().await.map_err(StorageError::from)?;
            let initial = store
                .list_collection(&query.collection)
                .await
                .map_err(StorageError::from)?;
            yield run_query(&query, initial);

            loop {
                let changes = store
                    .poll_changes(&since, &filter)
                    .await
                    .map_err(StorageError::from)?;
                since = changes.last_seq;
                if !changes.results.iter().any(|row| row.id.starts_with(&prefix)) {
                    continue;
                }

                let current = store
                    .list_collection(&query.collection)
                    .await
                    .map_err(StorageError::from)?;
                yield run_query(&query, current);
            }
        }
    }
}

impl DocumentStore for CouchDocumentStore {
    fn read(&self, path: &DocumentPath) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let store = self.clone();
        let doc_id = doc_id(path);
        Box::pin(async move {
            let document = store.get_document(&doc_id).await?;
            Ok(document.map(CouchDocument::into_fields))
        })
    }

    fn query(
        &self,
        query: &CollectionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<StoredDocument>>> {
        let store = self.clone();
        let query = query.clone();
        Box::pin(async move {
            let documents = store.list_collection(&query.collection).await?;
            Ok(run_query(&query, documents))
        })
    }

    fn write(
        &self,
        path: &DocumentPath,
        fields: Document,
        mode: WriteMode,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let path = path.clone();
        Box::pin(async move { store.write_document(&path, fields, mode).await })
    }

    fn update(
        &self,
        path: &DocumentPath,
        update: DocumentUpdate,
    ) -> BoxFuture<'static, StorageResult<Document>> {
        let store = self.clone();
        let path = path.clone();
        Box::pin(async move { store.update_document(&path, &update).await })
    }

    fn delete(&self, path: &DocumentPath) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let path = path.clone();
        Box::pin(async move { store.remove_document(&path).await })
    }

    fn subscribe_document(
        &self,
        path: &DocumentPath,
    ) -> BoxStream<'static, StorageResult<Option<Document>>> {
        Box::pin(self.document_changes(path.clone()))
    }

    fn subscribe_query(
        &self,
        query: &CollectionQuery,
    ) -> BoxStream<'static, StorageResult<Vec<StoredDocument>>> {
        Box::pin(self.query_changes(query.clone()))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.update_seq().await?;
            Ok(())
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
