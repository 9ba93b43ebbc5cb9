//! Thin typed adapter over the shared Redis store.
//!
//! All coordination between workers happens through this module: plain
//! commands for one-shot reads and writes, and WATCH-scoped optimistic
//! transactions for the critical sections. A WATCH sequence must run on a
//! single pooled connection held for its whole duration; EXEC clears the
//! watch list even when the transaction aborts, and early exits call
//! [`unwatch`] before the connection returns to the pool.

use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tracing::debug;

use crate::config::ConnectConfig;
use crate::error::QueueError;

/// Pooled Redis handle shared by every queue of a client.
#[derive(Clone)]
pub(crate) struct Store {
    pool: Pool,
}

impl Store {
    /// Build a pool from the connection settings and verify it with a ping.
    pub(crate) async fn connect(config: &ConnectConfig) -> Result<Self, QueueError> {
        let url = config.url();
        debug!(host = %config.host, port = config.port, pool_size = config.pool_size, "Connecting to store");

        let pool = PoolConfig::from_url(url)
            .builder()
            .map_err(|e| QueueError::Pool(format!("Failed to create pool builder: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| QueueError::Pool(format!("Failed to create pool: {e}")))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| QueueError::Pool(format!("Failed to get connection: {e}")))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self { pool })
    }

    /// Check out a connection. Watch sequences hold it across every step.
    pub(crate) async fn conn(&self) -> Result<Connection, QueueError> {
        self.pool
            .get()
            .await
            .map_err(|e| QueueError::Pool(format!("Failed to get connection: {e}")))
    }

    pub(crate) async fn list_push(&self, key: &str, value: &str) -> Result<i64, QueueError> {
        let mut conn = self.conn().await?;
        let len: i64 = conn.rpush(key, value).await?;
        Ok(len)
    }

    pub(crate) async fn list_range(&self, key: &str) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(key, 0, -1).await?)
    }

    pub(crate) async fn list_len(&self, key: &str) -> Result<i64, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(key).await?)
    }

    pub(crate) async fn set_add(&self, key: &str, member: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.sadd(key, member).await?;
        Ok(())
    }

    pub(crate) async fn set_members(&self, key: &str) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.smembers(key).await?)
    }

    pub(crate) async fn hash_incr(&self, key: &str, field: &str, by: i64) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.hincr(key, field, by).await?;
        Ok(())
    }

    pub(crate) async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.hset(key, field, value).await?;
        Ok(())
    }

    pub(crate) async fn hash_delete(&self, key: &str, field: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.hdel(key, field).await?;
        Ok(())
    }

    pub(crate) async fn hash_all(
        &self,
        key: &str,
    ) -> Result<std::collections::HashMap<String, String>, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.hgetall(key).await?)
    }

    pub(crate) async fn sorted_rev_range(
        &self,
        key: &str,
    ) -> Result<Vec<(String, i64)>, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.zrevrange_withscores(key, 0, -1).await?)
    }
}

/// Begin an optimistic watch on the given keys.
pub(crate) async fn watch(conn: &mut Connection, keys: &[String]) -> Result<(), QueueError> {
    let mut cmd = redis::cmd("WATCH");
    for key in keys {
        cmd.arg(key);
    }
    let _: () = cmd.query_async(conn).await?;
    Ok(())
}

/// Release a watch without running a transaction.
pub(crate) async fn unwatch(conn: &mut Connection) -> Result<(), QueueError> {
    let _: () = redis::cmd("UNWATCH").query_async(conn).await?;
    Ok(())
}
