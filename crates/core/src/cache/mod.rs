//! Fast ephemeral cache shared by all request handlers

mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;

pub use memory::MemoryCache;

/// Redis-like key space with hashes, lists and sorted sets.
///
/// Every operation is atomic with respect to the key it touches.
#[async_trait]
pub trait FastCache: Send + Sync {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Empty when the key is absent or expired
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;

    /// Write `fields` only if every `(field, value)` in `expected` matches
    async fn hash_compare_and_set(
        &self,
        key: &str,
        expected: &[(&str, &str)],
        fields: &[(&str, String)],
    ) -> Result<bool>;

    async fn hash_delete_field(&self, key: &str, field: &str) -> Result<()>;

    /// Read the whole hash and delete the key in one step
    async fn hash_take(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Append to the list, dropping the oldest entries beyond `max_len`
    async fn list_push(&self, key: &str, value: String, max_len: usize) -> Result<()>;

    /// Pop the oldest entry, waiting up to `timeout` for one to arrive
    async fn list_pop_blocking(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()>;

    /// Members with `min <= score <= max`, lowest score first
    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>>;

    /// Remove every member or none; false if any was missing
    async fn zrem_all(&self, key: &str, members: &[&str]) -> Result<bool>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;
}
