/// Document store abstraction and its backends.
pub mod document_store;
/// Stored document shapes.
pub mod models;
/// Typed session and roster accessors.
pub mod session_repository;
/// Storage abstraction layer for database operations.
pub mod storage;
