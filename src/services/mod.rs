/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Read-only room and lobby projections.
pub mod projection_service;
/// Room membership, host controls and answers.
pub mod room_service;
/// Storage connection supervisor with backoff and deck seeding.
pub mod storage_supervisor;
