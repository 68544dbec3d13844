/// Durable key/value storage for the wallet.
///
/// Backends hold JSON values under string keys, the same shape as the
/// extension's local storage area. Everything secret is already encrypted
/// before it reaches a backend. Multi-key writes and removals are applied
/// as a unit so paired records never end up half-updated.
pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Human-readable backend name, used in log lines.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes every entry, or none of them.
    async fn set(&self, entries: Vec<(String, Value)>) -> Result<()>;

    /// Removes every listed key. Missing keys are not an error.
    async fn remove(&self, keys: &[&str]) -> Result<()>;

    /// Keys starting with `prefix`, in lexical order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}
