/// Persisted wallet state.
///
/// `models` holds the record types written to the key/value store and the
/// public views handed to UI contexts; `repository` holds typed access
/// functions over a `KeyValueStore`.
pub mod models;
pub mod repository;
