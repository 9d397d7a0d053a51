//! Abstract key-value store interface, used for ephemeral state (search
//! indexing debounce markers, job idempotency keys, rate limits) that
//! doesn't belong in the relational store.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Atomically set `key` to `value` only if absent (or expired); returns
    /// whether this call won the race. Used by the search debounce window.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) -> Result<bool>;
}
