//! Redis dialer: one multiplexed async connection shared by all callers.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{Dialer, Unavailable, redact_url};

const BACKEND: &str = "redis";

/// Dials Redis and probes it with `PING`.
#[derive(Debug, Clone)]
pub struct RedisDialer {
    // An unparsable URL is kept as an error and surfaces as `Unavailable` on
    // the first dial, so construction never fails.
    client: Result<redis::Client, String>,
    url: String,
}

impl RedisDialer {
    pub fn new(redis_url: impl Into<String>) -> Self {
        let url = redis_url.into();
        let client = redis::Client::open(url.as_str()).map_err(|e| format!("invalid redis url: {e}"));
        Self { client, url }
    }
}

#[async_trait]
impl Dialer for RedisDialer {
    type Handle = MultiplexedConnection;

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn endpoint(&self) -> String {
        redact_url(&self.url)
    }

    async fn dial(&self) -> Result<MultiplexedConnection, Unavailable> {
        let client = self
            .client
            .as_ref()
            .map_err(|reason| Unavailable::new(BACKEND, reason.clone()))?;

        client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| Unavailable::new(BACKEND, e.to_string()))
    }

    async fn probe(&self, handle: &MultiplexedConnection) -> Result<(), Unavailable> {
        let mut conn = handle.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Unavailable::new(BACKEND, format!("PING failed: {e}")))?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(Unavailable::new(BACKEND, format!("unexpected PING reply: {pong}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_url_is_unavailable_at_dial_time() {
        let dialer = RedisDialer::new("not a url");
        let err = dialer.dial().await.unwrap_err();
        assert_eq!(err.backend, "redis");
        assert!(err.reason.contains("invalid redis url"));
    }

    #[test]
    fn endpoint_hides_the_password() {
        let dialer = RedisDialer::new("redis://:hunter2@cache:6379/0");
        assert_eq!(dialer.endpoint(), "redis://:***@cache:6379/0");
    }
}
