use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::FastCache;
use crate::error::Result;

/// In-process cache for single-node deployments and tests.
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Wakes blocked list pops, one permit per push.
    waiters: HashMap<String, Arc<Notify>>,
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    SortedSet(HashMap<String, i64>),
}

impl Inner {
    /// Live entry for `key`, dropping it first if it has expired
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = matches!(
            self.entries.get(key),
            Some(Entry { expires_at: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn hash(&mut self, key: &str) -> Option<&mut HashMap<String, String>> {
        match self.live(key) {
            Some(Entry { value: Value::Hash(h), .. }) => Some(h),
            _ => None,
        }
    }

    fn list(&mut self, key: &str) -> Option<&mut VecDeque<String>> {
        match self.live(key) {
            Some(Entry { value: Value::List(l), .. }) => Some(l),
            _ => None,
        }
    }

    fn sorted_set(&mut self, key: &str) -> Option<&mut HashMap<String, i64>> {
        match self.live(key) {
            Some(Entry { value: Value::SortedSet(z), .. }) => Some(z),
            _ => None,
        }
    }

    fn waiter(&mut self, key: &str) -> Arc<Notify> {
        self.waiters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn try_pop(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let list = inner.list(key)?;
        let value = list.pop_front();
        if list.is_empty() {
            inner.entries.remove(key);
        }
        value
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FastCache for MemoryCache {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        Ok(inner.hash(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut inner = self.inner.lock();
        Ok(inner.hash(key).map(|h| h.clone()).unwrap_or_default())
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.hash(key).is_none() {
            inner
                .entries
                .insert(key.to_string(), Entry::new(Value::Hash(HashMap::new())));
        }
        if let Some(hash) = inner.hash(key) {
            for (field, value) in fields {
                hash.insert(field.to_string(), value.clone());
            }
        }
        Ok(())
    }

    async fn hash_compare_and_set(
        &self,
        key: &str,
        expected: &[(&str, &str)],
        fields: &[(&str, String)],
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(hash) = inner.hash(key) else {
            return Ok(false);
        };
        if expected
            .iter()
            .any(|(field, value)| hash.get(*field).map(String::as_str) != Some(*value))
        {
            return Ok(false);
        }
        for (f, value) in fields {
            hash.insert(f.to_string(), value.clone());
        }
        Ok(true)
    }

    async fn hash_delete_field(&self, key: &str, field: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(hash) = inner.hash(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn hash_take(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut inner = self.inner.lock();
        if inner.hash(key).is_none() {
            return Ok(HashMap::new());
        }
        match inner.entries.remove(key) {
            Some(Entry { value: Value::Hash(h), .. }) => Ok(h),
            _ => Ok(HashMap::new()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.lock().entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.live(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn list_push(&self, key: &str, value: String, max_len: usize) -> Result<()> {
        let notify = {
            let mut inner = self.inner.lock();
            if inner.list(key).is_none() {
                inner
                    .entries
                    .insert(key.to_string(), Entry::new(Value::List(VecDeque::new())));
            }
            if let Some(list) = inner.list(key) {
                list.push_back(value);
                while list.len() > max_len.max(1) {
                    list.pop_front();
                }
            }
            inner.waiter(key)
        };
        notify.notify_one();
        Ok(())
    }

    async fn list_pop_blocking(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.try_pop(key) {
                return Ok(Some(value));
            }
            let notify = self.inner.lock().waiter(key);
            // A push between the check above and this await leaves a stored permit.
            if tokio::time::timeout_at(deadline, notify.notified()).await.is_err() {
                return Ok(self.try_pop(key));
            }
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.sorted_set(key).is_none() {
            inner
                .entries
                .insert(key.to_string(), Entry::new(Value::SortedSet(HashMap::new())));
        }
        if let Some(set) = inner.sorted_set(key) {
            set.insert(member.to_string(), score);
        }
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>> {
        let mut inner = self.inner.lock();
        let mut members: Vec<(String, i64)> = inner
            .sorted_set(key)
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| (min..=max).contains(*score))
                    .map(|(member, score)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(members)
    }

    async fn zrem_all(&self, key: &str, members: &[&str]) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.sorted_set(key) else {
            return Ok(members.is_empty());
        };
        if !members.iter().all(|m| set.contains_key(*m)) {
            return Ok(false);
        }
        for member in members {
            set.remove(*member);
        }
        Ok(true)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        Ok(inner
            .sorted_set(key)
            .map_or(false, |set| set.remove(member).is_some()))
    }
}
