//! Key/set cache boundary.
//!
//! The dedup gate only needs set membership and atomic set insertion. Plain
//! key/value `get`/`set` with optional expiry is exposed for ancillary caching.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use jobsink_core::ErrorKind;

use crate::connection::Unavailable;

pub use in_memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;

/// Cache operation error, already classified for the pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Unavailable(#[from] Unavailable),

    #[error("cache command timed out: {0}")]
    Timeout(String),

    #[error("cache command failed: {0}")]
    Command(String),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::Unavailable(_) => ErrorKind::BackendUnavailable,
            CacheError::Timeout(_) | CacheError::Command(_) => ErrorKind::BackendOperationError,
        }
    }
}

/// Shared key/set cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Liveness check; also primes the underlying connection.
    async fn ping(&self) -> Result<(), CacheError>;

    /// `SISMEMBER set member`.
    async fn is_member(&self, set: &str, member: &str) -> Result<bool, CacheError>;

    /// `SADD set member`; `true` iff this call added the member.
    ///
    /// Must be atomic at the backend: of any number of concurrent callers
    /// adding the same member, exactly one observes `true`.
    async fn add_member(&self, set: &str, member: &str) -> Result<bool, CacheError>;

    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// `SET key value [EX seconds]`.
    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> Result<(), CacheError>;

    /// Drop any cached connection.
    async fn release(&self);
}

#[async_trait]
impl<C> CacheBackend for Arc<C>
where
    C: CacheBackend + ?Sized,
{
    async fn ping(&self) -> Result<(), CacheError> {
        (**self).ping().await
    }

    async fn is_member(&self, set: &str, member: &str) -> Result<bool, CacheError> {
        (**self).is_member(set, member).await
    }

    async fn add_member(&self, set: &str, member: &str) -> Result<bool, CacheError> {
        (**self).add_member(set, member).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> Result<(), CacheError> {
        (**self).set(key, value, expiry).await
    }

    async fn release(&self) {
        (**self).release().await
    }
}
