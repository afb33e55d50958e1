/// Persisted entity definitions.
pub mod models;
/// Room, deck and event persistence behind a backend-agnostic trait.
pub mod room_store;
/// Storage error types shared by every backend.
pub mod storage;
