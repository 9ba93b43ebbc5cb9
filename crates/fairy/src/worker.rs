//! Worker runtime: the dispatch and process loops.
//!
//! One registered handler drives one worker task. Each iteration promotes
//! the head of `SOURCE` into the tail of its group's list under an optimistic
//! watch; the worker that causes `QUEUED:g` to transition from empty to
//! non-empty owns that group's head and processes it, draining successors
//! until the group empties. There is no per-group lock to leak, so a crashed
//! worker never strands the dispatch protocol itself.

use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::handler::{FailureDirective, Handler};
use crate::keys::Keys;
use crate::stats::{FIELD_FINISHED, FIELD_PENDING_TIME, FIELD_PROCESSING_TIME};
use crate::store::{self, Store};
use crate::task::{now_ms, FailedTask, FinishedTask, QueuedTask, SlowTask};

/// Handle to a spawned worker.
///
/// Shutdown is observed between dispatch iterations, never mid-group: a
/// worker finishes draining the group it owns before stopping, so no
/// `PROCESSING` entry is left behind by a graceful stop.
pub struct WorkerHandle {
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Request a graceful stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether the worker task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker task to exit.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// A claimed group head: this worker caused `QUEUED:g` to become non-empty.
struct Claim {
    group: String,
    queued_key: String,
    task: QueuedTask,
}

enum Poll {
    Claimed(Claim),
    /// `SOURCE` is empty; sleep before the next poll.
    Empty,
    /// Lost a race or the group is already owned; poll again immediately.
    Restart,
}

/// Per-invocation state carried alongside the task while it is in flight.
struct Invocation {
    token: String,
    queued_time: i64,
    start_time: i64,
    retries_left: u32,
    errors: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum FailureAction {
    Retry,
    ArchiveAndBlock,
    ArchiveAndSkip,
}

/// Failure policy: directive from the handler plus remaining retries.
fn decide(directive: Option<FailureDirective>, retries_left: u32) -> FailureAction {
    match directive {
        Some(FailureDirective::Block) => FailureAction::ArchiveAndBlock,
        Some(FailureDirective::BlockAfterRetry) if retries_left == 0 => {
            FailureAction::ArchiveAndBlock
        }
        None if retries_left == 0 => FailureAction::ArchiveAndSkip,
        _ => FailureAction::Retry,
    }
}

pub(crate) struct Worker {
    id: String,
    store: Store,
    keys: Keys,
    config: QueueConfig,
    handler: Arc<dyn Handler>,
    shutdown: CancellationToken,
}

impl Worker {
    pub(crate) fn spawn(
        store: Store,
        keys: Keys,
        config: QueueConfig,
        handler: Arc<dyn Handler>,
    ) -> WorkerHandle {
        let shutdown = CancellationToken::new();
        let worker = Worker {
            id: format!("worker-{}", Uuid::now_v7().simple()),
            store,
            keys,
            config,
            handler,
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(worker.run());
        WorkerHandle { shutdown, handle }
    }

    async fn run(self) {
        info!(worker = %self.id, queue = %self.keys.queue_name(), "Worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let outcome = match self.poll_once().await {
                Ok(Poll::Claimed(claim)) => self.process_group(claim).await,
                Ok(Poll::Restart) => continue,
                Ok(Poll::Empty) => {
                    if self.idle_sleep(self.config.polling_interval).await {
                        break;
                    }
                    continue;
                }
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                match e {
                    QueueError::MalformedTask(msg) => {
                        error!(
                            worker = %self.id,
                            queue = %self.keys.queue_name(),
                            %msg,
                            "Undecodable task encountered, halting worker"
                        );
                        break;
                    }
                    e => {
                        warn!(
                            worker = %self.id,
                            queue = %self.keys.queue_name(),
                            error = %e,
                            "Store operation failed, backing off"
                        );
                        if self.idle_sleep(self.config.polling_interval).await {
                            break;
                        }
                    }
                }
            }
        }

        info!(worker = %self.id, queue = %self.keys.queue_name(), "Worker stopped");
    }

    /// Sleep, returning early (true) when shutdown is requested.
    async fn idle_sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    /// One dispatch iteration: promote the head of `SOURCE` into its group
    /// list and claim it when the group was previously empty.
    async fn poll_once(&self) -> Result<Poll, QueueError> {
        let source = self.keys.source();
        let watched = [source.clone()];
        let mut conn = self.store.conn().await?;

        store::watch(&mut conn, &watched).await?;

        let head: Option<String> = conn.lindex(&source, 0).await?;
        let raw = match head {
            Some(raw) => raw,
            None => {
                store::unwatch(&mut conn).await?;
                return Ok(Poll::Empty);
            }
        };

        let parsed = QueuedTask::decode(&raw).and_then(|task| {
            let group = task.group()?;
            Ok((task, group))
        });
        let (task, group) = match parsed {
            Ok(pair) => pair,
            Err(e) => {
                let _ = store::unwatch(&mut conn).await;
                return Err(e);
            }
        };
        let queued_key = self.keys.queued(&group);

        let result: Option<(redis::Value, i64)> = redis::pipe()
            .atomic()
            .lpop(&source, None)
            .rpush(&queued_key, &raw)
            .query_async(&mut conn)
            .await?;

        match result {
            // SOURCE moved under us; another worker took the head.
            None => Ok(Poll::Restart),
            Some((_, 1)) => {
                debug!(worker = %self.id, group = %group, "Claimed group head");
                Ok(Poll::Claimed(Claim {
                    group,
                    queued_key,
                    task,
                }))
            }
            Some((_, len)) => {
                debug!(worker = %self.id, group = %group, queued = len, "Group already owned");
                Ok(Poll::Restart)
            }
        }
    }

    /// Process the claimed head, then drain successors until the group
    /// empties or blocks.
    async fn process_group(&self, claim: Claim) -> Result<(), QueueError> {
        let Claim {
            group,
            queued_key,
            mut task,
        } = claim;
        let processing_key = self.keys.processing();

        'group: loop {
            let mut inv = Invocation {
                token: Uuid::now_v7().to_string(),
                queued_time: task.enqueued_at,
                start_time: now_ms(),
                retries_left: self.config.retry_limit,
                errors: Vec::new(),
            };
            self.enter_processing(&processing_key, &inv, &task).await?;

            loop {
                inv.start_time = now_ms();
                debug!(worker = %self.id, group = %group, "Invoking handler");
                match self.handler.handle(&task.args).await {
                    Ok(()) => {
                        self.store.hash_delete(&processing_key, &inv.token).await?;
                        let finish_time = now_ms();
                        let next = self.drain_head(&queued_key).await?;
                        self.record_success(&task, &inv, finish_time).await?;
                        match next {
                            Some(successor) => {
                                task = successor;
                                continue 'group;
                            }
                            None => return Ok(()),
                        }
                    }
                    Err(err) => {
                        inv.errors.push(err.message.clone());
                        match decide(err.directive, inv.retries_left) {
                            FailureAction::Retry => {
                                inv.retries_left -= 1;
                                debug!(
                                    worker = %self.id,
                                    group = %group,
                                    retries_left = inv.retries_left,
                                    error = %err.message,
                                    "Handler failed, retrying"
                                );
                                tokio::time::sleep(self.config.retry_delay).await;
                                continue;
                            }
                            FailureAction::ArchiveAndBlock => {
                                warn!(
                                    worker = %self.id,
                                    group = %group,
                                    attempts = inv.errors.len(),
                                    "Task failed terminally, blocking group"
                                );
                                self.archive(&task, &inv).await?;
                                self.block_group(&processing_key, &inv.token, &group)
                                    .await?;
                                return Ok(());
                            }
                            FailureAction::ArchiveAndSkip => {
                                warn!(
                                    worker = %self.id,
                                    group = %group,
                                    attempts = inv.errors.len(),
                                    "Task failed terminally, skipping"
                                );
                                self.archive(&task, &inv).await?;
                                self.store.hash_delete(&processing_key, &inv.token).await?;
                                match self.drain_head(&queued_key).await? {
                                    Some(successor) => {
                                        task = successor;
                                        continue 'group;
                                    }
                                    None => return Ok(()),
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Record the in-flight entry `[args…, start_time]` under a fresh token.
    async fn enter_processing(
        &self,
        processing_key: &str,
        inv: &Invocation,
        task: &QueuedTask,
    ) -> Result<(), QueueError> {
        let mut entry = task.args.clone();
        entry.push(Value::from(inv.start_time));
        let raw = serde_json::to_string(&entry)?;
        self.store.hash_set(processing_key, &inv.token, &raw).await
    }

    /// Pop the completed head of `QUEUED:g` and peek its successor under an
    /// optimistic watch. Contention is transient and local, so conflicts
    /// retry without sleeping.
    async fn drain_head(&self, queued_key: &str) -> Result<Option<QueuedTask>, QueueError> {
        let watched = [queued_key.to_string()];
        let mut conn = self.store.conn().await?;

        loop {
            store::watch(&mut conn, &watched).await?;

            let result: Option<(redis::Value, Option<String>)> = redis::pipe()
                .atomic()
                .lpop(queued_key, None)
                .lindex(queued_key, 0)
                .query_async(&mut conn)
                .await?;

            match result {
                None => continue,
                Some((_, None)) => return Ok(None),
                Some((_, Some(raw))) => return QueuedTask::decode(&raw).map(Some),
            }
        }
    }

    /// Update counters and the recent/slowest retention structures after a
    /// genuine success.
    async fn record_success(
        &self,
        task: &QueuedTask,
        inv: &Invocation,
        finish_time: i64,
    ) -> Result<(), QueueError> {
        let stats_key = self.keys.statistics();
        let recent_key = self.keys.recent();
        let slowest_key = self.keys.slowest();

        let pending_ms = inv.start_time - inv.queued_time;
        let processing_ms = finish_time - inv.start_time;
        let recent_entry = FinishedTask {
            args: task.args.clone(),
            finished_at: finish_time,
        }
        .encode()?;
        let slow_member = SlowTask::encode_member(&task.args)?;

        let mut conn = self.store.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .hincr(&stats_key, FIELD_FINISHED, 1)
            .ignore()
            .hincr(&stats_key, FIELD_PENDING_TIME, pending_ms)
            .ignore()
            .hincr(&stats_key, FIELD_PROCESSING_TIME, processing_ms)
            .ignore()
            .lpush(&recent_key, &recent_entry)
            .ignore()
            .ltrim(&recent_key, 0, self.config.recent_size as isize - 1)
            .ignore()
            .zadd(&slowest_key, &slow_member, processing_ms)
            .ignore()
            .zremrangebyrank(&slowest_key, 0, -(self.config.slowest_size as isize) - 1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Append the terminal failure record `[args…, queued_time, failed_at,
    /// errors]` to `FAILED`.
    async fn archive(&self, task: &QueuedTask, inv: &Invocation) -> Result<(), QueueError> {
        let record = FailedTask {
            args: task.args.clone(),
            enqueued_at: inv.queued_time,
            failed_at: now_ms(),
            errors: inv.errors.clone(),
        };
        self.store
            .list_push(&self.keys.failed(), &record.encode()?)
            .await?;
        Ok(())
    }

    /// Drop the in-flight entry and mark the group blocked. The group's list
    /// keeps its head; `reschedule` re-ingests the tail and the archived
    /// record together.
    async fn block_group(
        &self,
        processing_key: &str,
        token: &str,
        group: &str,
    ) -> Result<(), QueueError> {
        let blocked_key = self.keys.blocked();
        let mut conn = self.store.conn().await?;
        let _: () = redis::pipe()
            .hdel(processing_key, token)
            .ignore()
            .sadd(&blocked_key, group)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
