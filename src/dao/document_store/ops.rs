//! Backend-independent document manipulation shared by every [`DocumentStore`] backend.
//!
//! [`DocumentStore`]: super::DocumentStore

use std::cmp::Ordering;

use serde_json::Value;

use crate::dao::storage::{StorageError, StorageResult};

use super::{
    CollectionQuery, Document, DocumentPath, DocumentUpdate, FieldOp, Precondition,
    SortDirection, StoredDocument, WriteMode,
};

/// Combine `fields` with the `existing` document according to `mode`.
pub fn write_fields(existing: Option<Document>, fields: Document, mode: WriteMode) -> Document {
    match (mode, existing) {
        (WriteMode::Merge, Some(mut document)) => {
            document.extend(fields);
            document
        }
        _ => fields,
    }
}

/// Check the preconditions of `update` and apply its operations to a copy of `document`.
///
/// The original document is left untouched when a precondition fails.
pub fn apply_update(
    path: &DocumentPath,
    document: &Document,
    update: &DocumentUpdate,
) -> StorageResult<Document> {
    for precondition in &update.preconditions {
        let (field, value, wanted) = match precondition {
            Precondition::ArrayContains { field, value } => (field, value, true),
            Precondition::ArrayExcludes { field, value } => (field, value, false),
        };
        let present = document
            .get(field)
            .and_then(Value::as_array)
            .is_some_and(|items| items.contains(value));
        if present != wanted {
            let reason = if wanted {
                format!("`{field}` does not contain {value}")
            } else {
                format!("`{field}` already contains {value}")
            };
            return Err(StorageError::PreconditionFailed {
                path: path.to_string(),
                reason,
            });
        }
    }

    let mut next = document.clone();
    for (field, op) in &update.ops {
        apply_op(&mut next, field, op);
    }
    Ok(next)
}

fn apply_op(document: &mut Document, field: &str, op: &FieldOp) {
    match op {
        FieldOp::Set(value) => {
            document.insert(field.to_string(), value.clone());
        }
        FieldOp::Increment(delta) => {
            let current = document.get(field).and_then(Value::as_i64).unwrap_or(0);
            document.insert(field.to_string(), Value::from(current.saturating_add(*delta)));
        }
        FieldOp::ArrayUnion(values) => {
            let mut items = take_array(document, field);
            for value in values {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            document.insert(field.to_string(), Value::Array(items));
        }
        FieldOp::ArrayRemove(values) => {
            let mut items = take_array(document, field);
            items.retain(|item| !values.contains(item));
            document.insert(field.to_string(), Value::Array(items));
        }
    }
}

fn take_array(document: &mut Document, field: &str) -> Vec<Value> {
    match document.remove(field) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Order and truncate `documents` as requested by `query`. The sort is stable.
pub fn run_query(query: &CollectionQuery, mut documents: Vec<StoredDocument>) -> Vec<StoredDocument> {
    if let Some((field, direction)) = &query.order_by {
        documents.sort_by(|a, b| {
            let left = a.fields.get(field).filter(|value| !value.is_null());
            let right = b.fields.get(field).filter(|value| !value.is_null());
            match (left, right) {
                (Some(left), Some(right)) => {
                    let ordering = compare_values(left, right);
                    match direction {
                        SortDirection::Ascending => ordering,
                        SortDirection::Descending => ordering.reverse(),
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
    }

    if let Some(limit) = query.limit {
        documents.truncate(limit);
    }
    documents
}

/// Total order over JSON scalars: booleans, then numbers, then strings; anything else ties.
fn compare_values(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Bool(_) => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            _ => 3,
        }
    }

    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.total_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => rank(left).cmp(&rank(right)),
    }
}
