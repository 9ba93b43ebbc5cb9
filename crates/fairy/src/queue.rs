//! Named queue handle: enqueue, worker registration, reschedule, and
//! read-only introspection.

use std::collections::HashMap;
use std::sync::Arc;

use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::handler::Handler;
use crate::keys::Keys;
use crate::stats::{
    QueueStatistics, RawCounters, FIELD_FINISHED, FIELD_PENDING_TIME, FIELD_PROCESSING_TIME,
    FIELD_TOTAL,
};
use crate::store::{self, Store};
use crate::task::{group_key, FailedTask, FinishedTask, ProcessingTask, QueuedTask, SlowTask};
use crate::worker::{Worker, WorkerHandle};

/// Handle to one named queue.
///
/// Handles are cheap to share; all state lives in the store, so any number
/// of processes may hold a handle to the same queue concurrently.
pub struct Queue {
    name: String,
    keys: Keys,
    config: QueueConfig,
    store: Store,
}

impl Queue {
    pub(crate) fn new(store: Store, name: &str, config: QueueConfig) -> Self {
        Self {
            name: name.to_string(),
            keys: Keys::new(name),
            config,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append a task to the ingress list. `args[0]` is the group id.
    ///
    /// Completion of the future is the store's acknowledgement; ordering of
    /// concurrent enqueues is the store's append order.
    pub async fn enqueue(&self, args: Vec<Value>) -> Result<(), QueueError> {
        group_key(&args)?;
        let raw = QueuedTask::new(args).encode()?;
        self.store.list_push(&self.keys.source(), &raw).await?;
        self.store
            .hash_incr(&self.keys.statistics(), FIELD_TOTAL, 1)
            .await?;
        debug!(queue = %self.name, "Enqueued task");
        Ok(())
    }

    /// Register a handler, spawning one worker that polls this queue until
    /// shut down.
    pub fn register<H: Handler>(&self, handler: H) -> WorkerHandle {
        Worker::spawn(
            self.store.clone(),
            self.keys.clone(),
            self.config.clone(),
            Arc::new(handler),
        )
    }

    /// Re-ingest every failed task and every blocked group's survivors into
    /// the ingress list, clearing `FAILED` and `BLOCKED`.
    ///
    /// The whole collapse commits as one optimistic transaction, retried on
    /// conflict. Failed records enter `SOURCE` first, then blocked tails;
    /// original cross-group enqueue order is not preserved.
    pub async fn reschedule(&self) -> Result<(), QueueError> {
        let source = self.keys.source();
        let failed_key = self.keys.failed();
        let blocked_key = self.keys.blocked();
        let mut conn = self.store.conn().await?;

        loop {
            store::watch(&mut conn, &[failed_key.clone(), blocked_key.clone()]).await?;

            let failed: Vec<String> = conn.lrange(&failed_key, 0, -1).await?;
            let blocked: Vec<String> = conn.smembers(&blocked_key).await?;
            let queued_keys: Vec<String> =
                blocked.iter().map(|g| self.keys.queued(g)).collect();
            if !queued_keys.is_empty() {
                store::watch(&mut conn, &queued_keys).await?;
            }

            let buffer = match self.requeue_buffer(&mut conn, &failed, &queued_keys).await {
                Ok(buffer) => buffer,
                Err(e) => {
                    let _ = store::unwatch(&mut conn).await;
                    return Err(e);
                }
            };

            let mut pipe = redis::pipe();
            pipe.atomic();
            if !buffer.is_empty() {
                pipe.rpush(&source, &buffer).ignore();
            }
            pipe.del(&failed_key).ignore();
            for key in &queued_keys {
                pipe.del(key).ignore();
            }
            pipe.del(&blocked_key).ignore();

            let result: Option<()> = pipe.query_async(&mut conn).await?;
            match result {
                Some(()) => {
                    info!(
                        queue = %self.name,
                        requeued = buffer.len(),
                        groups = queued_keys.len(),
                        "Rescheduled failed and blocked tasks"
                    );
                    return Ok(());
                }
                None => {
                    debug!(queue = %self.name, "Reschedule conflicted, retrying");
                }
            }
        }
    }

    /// Failed records with their terminal positions stripped, followed by
    /// the tail of every blocked group (the head is already in `FAILED`).
    async fn requeue_buffer(
        &self,
        conn: &mut deadpool_redis::Connection,
        failed: &[String],
        queued_keys: &[String],
    ) -> Result<Vec<String>, QueueError> {
        let mut buffer = Vec::with_capacity(failed.len());
        for raw in failed {
            buffer.push(FailedTask::decode(raw)?.to_queued().encode()?);
        }
        for key in queued_keys {
            let tail: Vec<String> = conn.lrange(key, 1, -1).await?;
            buffer.extend(tail);
        }
        Ok(buffer)
    }

    /// Aggregate counters, failure and blockage totals, and derived averages.
    pub async fn statistics(&self) -> Result<QueueStatistics, QueueError> {
        let mut conn = self.store.conn().await?;

        let (fields, failed_tasks, blocked): (HashMap<String, i64>, i64, Vec<String>) =
            redis::pipe()
                .atomic()
                .hgetall(self.keys.statistics())
                .llen(self.keys.failed())
                .smembers(self.keys.blocked())
                .query_async(&mut conn)
                .await?;

        let counters = RawCounters {
            total: fields.get(FIELD_TOTAL).copied().unwrap_or(0),
            finished: fields.get(FIELD_FINISHED).copied().unwrap_or(0),
            total_pending_time: fields.get(FIELD_PENDING_TIME).copied().unwrap_or(0),
            total_processing_time: fields.get(FIELD_PROCESSING_TIME).copied().unwrap_or(0),
        };

        let blocked_lengths: Vec<i64> = if blocked.is_empty() {
            Vec::new()
        } else {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for group in &blocked {
                pipe.llen(self.keys.queued(group));
            }
            pipe.query_async(&mut conn).await?
        };

        Ok(QueueStatistics::derive(
            counters,
            failed_tasks,
            &blocked_lengths,
        ))
    }

    /// Last finished tasks, newest first.
    pub async fn recently_finished_tasks(&self) -> Result<Vec<FinishedTask>, QueueError> {
        self.store
            .list_range(&self.keys.recent())
            .await?
            .iter()
            .map(|raw| FinishedTask::decode(raw))
            .collect()
    }

    /// Terminal failure records in archive order.
    pub async fn failed_tasks(&self) -> Result<Vec<FailedTask>, QueueError> {
        self.store
            .list_range(&self.keys.failed())
            .await?
            .iter()
            .map(|raw| FailedTask::decode(raw))
            .collect()
    }

    /// Group ids currently blocked by a head-of-line failure.
    pub async fn blocked_groups(&self) -> Result<Vec<Value>, QueueError> {
        self.store
            .set_members(&self.keys.blocked())
            .await?
            .iter()
            .map(|member| {
                serde_json::from_str(member)
                    .map_err(|e| QueueError::Deserialization(format!("blocked group id: {e}")))
            })
            .collect()
    }

    /// Slowest retained tasks, slowest first.
    pub async fn slowest_tasks(&self) -> Result<Vec<SlowTask>, QueueError> {
        self.store
            .sorted_rev_range(&self.keys.slowest())
            .await?
            .iter()
            .map(|(member, score)| SlowTask::decode(member, *score))
            .collect()
    }

    /// Tasks currently in flight.
    pub async fn processing_tasks(&self) -> Result<Vec<ProcessingTask>, QueueError> {
        self.store
            .hash_all(&self.keys.processing())
            .await?
            .into_iter()
            .map(|(token, raw)| ProcessingTask::decode(token, &raw))
            .collect()
    }
}
