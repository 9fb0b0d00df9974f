//! Redis-backed cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument};

use crate::connection::ConnectionManager;
use crate::connection::redis::RedisDialer;

use super::{CacheBackend, CacheError};

/// Default bound on a single cache command.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(5000);

/// Cache backed by a shared Redis [`ConnectionManager`].
///
/// Every command acquires a probed handle first, so a dropped connection is
/// replaced on the next command rather than failing forever.
#[derive(Debug, Clone)]
pub struct RedisCache {
    manager: Arc<ConnectionManager<RedisDialer>>,
    operation_timeout: Duration,
}

impl RedisCache {
    pub fn new(manager: Arc<ConnectionManager<RedisDialer>>) -> Self {
        Self {
            manager,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<RedisDialer>> {
        &self.manager
    }

    async fn run<T, F, Fut>(&self, command: &str, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.manager.acquire().await?;
        match tokio::time::timeout(self.operation_timeout, f(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_redis_error(command, e)),
            Err(_) => Err(CacheError::Timeout(format!(
                "{command} exceeded {} ms",
                self.operation_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn ping(&self) -> Result<(), CacheError> {
        self.manager.acquire().await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn is_member(&self, set: &str, member: &str) -> Result<bool, CacheError> {
        let member_found: bool = self
            .run("SISMEMBER", |mut conn| async move { conn.sismember(set, member).await })
            .await?;
        debug!(set, member, member_found, "checked membership");
        Ok(member_found)
    }

    #[instrument(skip(self), err)]
    async fn add_member(&self, set: &str, member: &str) -> Result<bool, CacheError> {
        let added: i64 = self
            .run("SADD", |mut conn| async move { conn.sadd(set, member).await })
            .await?;
        Ok(added == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.run("GET", |mut conn| async move { conn.get(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = expiry {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        self.run("SET", |mut conn| async move { cmd.query_async::<_, ()>(&mut conn).await })
            .await?;
        debug!(key, expiry_secs = expiry.map(|d| d.as_secs()), "set cache key");
        Ok(())
    }

    async fn release(&self) {
        self.manager.release().await;
    }
}

/// Map a Redis error onto the cache taxonomy.
///
/// Socket timeouts are checked first, since they are I/O errors too. Other
/// I/O-level failures mean the connection is gone (the next `acquire()`
/// will probe and re-dial); everything else is a command failure.
fn map_redis_error(command: &str, err: redis::RedisError) -> CacheError {
    if err.is_timeout() {
        CacheError::Timeout(format!("{command} failed: {err}"))
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        CacheError::Unavailable(crate::connection::Unavailable::new(
            "redis",
            format!("{command} failed: {err}"),
        ))
    } else {
        CacheError::Command(format!("{command} failed: {err}"))
    }
}
