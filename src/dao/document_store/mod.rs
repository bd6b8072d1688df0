//! Schema-agnostic document store the session data lives in.
//!
//! Documents are JSON objects grouped in collections. Writes are last-write-wins except for
//! [`DocumentStore::update`], which applies its field operations atomically and only when
//! every precondition holds.

#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
pub mod ops;

use std::fmt;

use futures::{future::BoxFuture, stream::BoxStream};
use serde_json::{Map, Value};

use crate::dao::storage::StorageResult;

/// Body of a stored document.
pub type Document = Map<String, Value>;

/// Address of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    /// Collection the document belongs to.
    pub collection: String,
    /// Document id inside the collection.
    pub id: String,
}

impl DocumentPath {
    /// Build a path from its parts.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document together with its id, as returned by queries.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Document id inside its collection.
    pub id: String,
    /// Document body.
    pub fields: Document,
}

/// Sort direction of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Read over a whole collection with optional ordering and limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    /// Collection to read.
    pub collection: String,
    /// Field and direction to sort by; documents missing the field sort last.
    pub order_by: Option<(String, SortDirection)>,
    /// Maximum number of documents returned.
    pub limit: Option<usize>,
}

impl CollectionQuery {
    /// Every document of `collection` in store order.
    pub fn all(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            order_by: None,
            limit: None,
        }
    }

    /// Sort by `field`.
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    /// Return at most `limit` documents.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// How [`DocumentStore::write`] combines the new fields with an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the document entirely.
    Replace,
    /// Overwrite only the given top-level fields, creating the document when absent.
    Merge,
}

/// Single field operation of an atomic update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Overwrite the field.
    Set(Value),
    /// Add to a numeric field, treating a missing field as zero.
    Increment(i64),
    /// Append values not already present.
    ArrayUnion(Vec<Value>),
    /// Remove every occurrence of the values.
    ArrayRemove(Vec<Value>),
}

/// Condition checked against the current document before an update is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The array field must contain `value`.
    ArrayContains {
        /// Array field to inspect.
        field: String,
        /// Value that must be present.
        value: Value,
    },
    /// The array field must not contain `value`; a missing field counts as empty.
    ArrayExcludes {
        /// Array field to inspect.
        field: String,
        /// Value that must be absent.
        value: Value,
    },
}

/// Atomic set of field operations guarded by preconditions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentUpdate {
    /// Conditions that must all hold.
    pub preconditions: Vec<Precondition>,
    /// Operations applied in order.
    pub ops: Vec<(String, FieldOp)>,
}

impl DocumentUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the array `field` to contain `value`.
    pub fn require_contains(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.preconditions.push(Precondition::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Require the array `field` not to contain `value`.
    pub fn require_absent(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.preconditions.push(Precondition::ArrayExcludes {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Overwrite `field`.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push((field.into(), FieldOp::Set(value.into())));
        self
    }

    /// Add `delta` to `field`.
    pub fn increment(mut self, field: impl Into<String>, delta: i64) -> Self {
        self.ops.push((field.into(), FieldOp::Increment(delta)));
        self
    }

    /// Set-union `values` into the array `field`.
    pub fn array_union(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.ops.push((field.into(), FieldOp::ArrayUnion(values)));
        self
    }

    /// Remove `values` from the array `field`.
    pub fn array_remove(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.ops.push((field.into(), FieldOp::ArrayRemove(values)));
        self
    }
}

/// Abstraction over the persistence layer holding the shared session documents.
///
/// Subscriptions yield a full snapshot first and then one per change notification. They end
/// with an error when the backend becomes unreachable; callers resubscribe to restart them.
pub trait DocumentStore: Send + Sync {
    /// Fetch one document; `None` when it does not exist.
    fn read(&self, path: &DocumentPath) -> BoxFuture<'static, StorageResult<Option<Document>>>;
    /// Documents of a collection, ordered and limited as `query` asks.
    fn query(
        &self,
        query: &CollectionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<StoredDocument>>>;
    /// Replace the document or merge `fields` into it, creating it when absent.
    fn write(
        &self,
        path: &DocumentPath,
        fields: Document,
        mode: WriteMode,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Apply `update` atomically and return the resulting document.
    ///
    /// Nothing is written when a precondition fails (`PreconditionFailed`) or the document
    /// does not exist (`MissingDocument`).
    fn update(
        &self,
        path: &DocumentPath,
        update: DocumentUpdate,
    ) -> BoxFuture<'static, StorageResult<Document>>;
    /// Delete a document, returning whether it existed.
    fn delete(&self, path: &DocumentPath) -> BoxFuture<'static, StorageResult<bool>>;
    /// Current content of one document, then its content after every change.
    fn subscribe_document(
        &self,
        path: &DocumentPath,
    ) -> BoxStream<'static, StorageResult<Option<Document>>>;
    /// Current result of `query`, then the full result again after every change.
    fn subscribe_query(
        &self,
        query: &CollectionQuery,
    ) -> BoxStream<'static, StorageResult<Vec<StoredDocument>>>;
    /// Cheap round trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish a dropped connection in place.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
