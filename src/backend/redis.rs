//! Redis adapter: the production key-value backend.
//!
//! All traffic goes through one multiplexed connection, and every
//! multi-key method packs its commands into a single pipeline. The
//! connection is dropped on `close()` and never re-established here;
//! recovery means building a fresh backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{Backend, BackendError, KvWrite};

/// Keys fetched per SCAN page during prefix deletion.
const SCAN_PAGE: usize = 200;

/// PX/PEXPIRE argument for a TTL. Redis rejects expire times below 1,
/// so one millisecond is the narrowest window the engine can express.
fn px_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl From<redis::RedisError> for BackendError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            BackendError::Io(err.to_string())
        } else {
            BackendError::Protocol(err.to_string())
        }
    }
}

/// Key-value backend over a redis server.
pub struct RedisBackend {
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisBackend {
    /// Connect to the given URL (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        debug!(url, "Connected to redis backend");
        Ok(Self {
            connection: RwLock::new(Some(connection)),
        })
    }

    /// Clone the live connection handle, or fail when already released.
    async fn conn(&self) -> Result<MultiplexedConnection, BackendError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(BackendError::Closed)
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, BackendError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("GET").arg(key);
        }
        let replies: Vec<Option<Vec<u8>>> = pipe.query_async(&mut conn).await?;
        Ok(replies)
    }

    async fn put_many(&self, entries: &[KvWrite]) -> Result<(), BackendError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for entry in entries {
            let cmd = pipe.cmd("SET").arg(&entry.key).arg(entry.value.as_slice());
            if let Some(ttl) = entry.ttl {
                cmd.arg("PX").arg(px_millis(ttl));
            }
            cmd.ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, BackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError> {
        let mut conn = self.conn().await?;
        let pattern = format!("{prefix}*");
        let mut removed = 0u64;
        let mut cursor = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_PAGE)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += count;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<u64, BackendError> {
        // DBSIZE spans every namespace sharing the logical database and
        // cluster deployments cannot aggregate it; report the unknown
        // sentinel rather than a misleading number.
        self.conn().await?;
        Ok(0)
    }

    async fn hash_get_many(
        &self,
        container: &str,
        fields: &[String],
    ) -> Result<Vec<Option<Vec<u8>>>, BackendError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let replies: Vec<Option<Vec<u8>>> = redis::cmd("HMGET")
            .arg(container)
            .arg(fields)
            .query_async(&mut conn)
            .await?;
        Ok(replies)
    }

    async fn hash_put_many(
        &self,
        container: &str,
        entries: &[(String, Vec<u8>)],
        outer_ttl: Duration,
    ) -> Result<(), BackendError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        {
            let cmd = pipe.cmd("HSET").arg(container);
            for (field, value) in entries {
                cmd.arg(field.as_str()).arg(value.as_slice());
            }
            cmd.ignore();
        }
        pipe.cmd("PEXPIRE")
            .arg(container)
            .arg(px_millis(outer_ttl))
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn hash_delete_many(
        &self,
        container: &str,
        fields: &[String],
    ) -> Result<u64, BackendError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("HDEL")
            .arg(container)
            .arg(fields)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn hash_len(&self, container: &str) -> Result<u64, BackendError> {
        let mut conn = self.conn().await?;
        let len: u64 = redis::cmd("HLEN")
            .arg(container)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn close(&self) {
        if self.connection.write().await.take().is_some() {
            debug!("Released redis connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expire_argument_floored_at_one_millisecond() {
        assert_eq!(px_millis(Duration::ZERO), 1);
        // Sub-millisecond windows round down to zero before the floor.
        assert_eq!(px_millis(Duration::from_micros(400)), 1);
        assert_eq!(px_millis(Duration::from_millis(5_000)), 5_000);
    }
}
