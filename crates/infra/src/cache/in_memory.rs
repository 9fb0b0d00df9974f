use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CacheBackend, CacheError};

#[derive(Debug, Default)]
struct State {
    sets: HashMap<String, HashSet<String>>,
    values: HashMap<String, (String, Option<Instant>)>,
}

/// In-memory cache with Redis set semantics.
///
/// Intended for tests/dev. `add_member` runs under a write lock, so it is
/// atomic in the same sense as `SADD`.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    state: RwLock<State>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members in `set` (test helper).
    pub fn set_len(&self, set: &str) -> usize {
        self.state
            .read()
            .map(|s| s.sets.get(set).map(HashSet::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn poisoned() -> CacheError {
        CacheError::Command("lock poisoned".to_string())
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn is_member(&self, set: &str, member: &str) -> Result<bool, CacheError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.sets.get(set).is_some_and(|s| s.contains(member)))
    }

    async fn add_member(&self, set: &str, member: &str) -> Result<bool, CacheError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        Ok(state
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let expired = match state.values.get(key) {
            Some((_, Some(deadline))) => Instant::now() >= *deadline,
            Some((_, None)) => false,
            None => return Ok(None),
        };
        if expired {
            state.values.remove(key);
            return Ok(None);
        }
        Ok(state.values.get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> Result<(), CacheError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let deadline = expiry.map(|ttl| Instant::now() + ttl);
        state
            .values
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn release(&self) {}
}
