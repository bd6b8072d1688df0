/// Operator sign-in and token checks.
pub mod auth_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Live observer projections.
pub mod observer_service;
/// Pure view builders shared by the observers.
pub mod projection;
/// Registration, submissions, grading and reset.
pub mod roster_service;
/// Session commands through the coordinator.
pub mod session_service;
/// Server-Sent Events forwarding.
pub mod sse_service;
/// Document store connection supervisor.
pub mod storage_supervisor;
