//! Postgres dialer: a small SQLx pool probed with `SELECT 1`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{DEFAULT_CONNECT_TIMEOUT, Dialer, Unavailable, redact_url};

const BACKEND: &str = "postgres";

/// Dials Postgres by building a connection pool.
///
/// The pool itself is the shared handle; SQLx handles per-query connection
/// checkout. Pool checkout is bounded by the same timeout as dialing.
#[derive(Debug, Clone)]
pub struct PostgresDialer {
    url: String,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PostgresDialer {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            url: database_url.into(),
            max_connections: 5,
            acquire_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

#[async_trait]
impl Dialer for PostgresDialer {
    type Handle = PgPool;

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn endpoint(&self) -> String {
        redact_url(&self.url)
    }

    async fn dial(&self) -> Result<PgPool, Unavailable> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.url)
            .await
            .map_err(|e| Unavailable::new(BACKEND, e.to_string()))
    }

    async fn probe(&self, handle: &PgPool) -> Result<(), Unavailable> {
        sqlx::query("SELECT 1")
            .execute(handle)
            .await
            .map(|_| ())
            .map_err(|e| Unavailable::new(BACKEND, format!("liveness probe failed: {e}")))
    }

    async fn close(&self, handle: PgPool) {
        handle.close().await;
    }
}
