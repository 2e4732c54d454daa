use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::counter_store::{CounterStore, StoreError};
use crate::error::GateError;

/// `INCR` and the first-hit `EXPIRE` run as one script so a counter can never
/// be left without a TTL.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Counter store shared by every instance that points at the same Redis.
pub struct RedisCounterStore {
    client: Client,
    prefix: String,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCounterStore {
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self, GateError> {
        let client = Client::open(redis_url)
            .map_err(|e| GateError::Redis(format!("Failed to create Redis client: {}", e)))?;

        Ok(Self {
            client,
            prefix: prefix.into(),
            connection: Mutex::new(None),
        })
    }

    fn counter_key(&self, key: &str) -> String {
        format!("{}:fixed_window:{}", self.prefix, key)
    }

    /// Return the cached connection, dialing Redis if there is none yet.
    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to Redis: {}", e)))?;
        debug!("connected to redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the cached connection so the next call reconnects.
    async fn reset_connection(&self) {
        *self.connection.lock().await = None;
    }

    async fn eval_increment(&self, key: &str, window_secs: u64) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;

        let result: RedisResult<u64> = redis::cmd("EVAL")
            .arg(INCREMENT_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(window_secs)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(count) => Ok(count),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    self.reset_connection().await;
                }
                Err(StoreError::Unavailable(format!("Script execution failed: {}", e)))
            }
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        // Redis expiry has whole-second resolution.
        let window_secs = window.as_secs().max(1);
        let key = self.counter_key(key);
        self.eval_increment(&key, window_secs).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "redis ping failed");
                self.reset_connection().await;
                Err(StoreError::Unavailable(format!("Ping failed: {}", e)))
            }
        }
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
