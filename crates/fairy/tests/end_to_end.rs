//! End-to-end scenarios against a live Redis.
//!
//! Run with a disposable Redis on localhost:6379:
//! `cargo test -- --ignored`
//!
//! Every test works on a uniquely named queue so runs never interfere.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Barrier, Mutex};

use fairy::{Client, ConnectConfig, Handler, HandlerError, Queue, QueueConfig};

async fn client() -> Client {
    let _ = tracing_subscriber::fmt::try_init();
    Client::connect(ConnectConfig::default())
        .await
        .expect("redis reachable on localhost:6379")
}

fn unique_queue(label: &str) -> String {
    format!("e2e-{label}-{}", uuid::Uuid::now_v7().simple())
}

/// Poll until `check` returns true or a few seconds elapse.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {what}");
}

async fn finished_count(queue: &Queue) -> i64 {
    queue.statistics().await.unwrap().finished
}

/// Records every invocation's arguments, sleeps briefly, succeeds.
struct Recording {
    calls: Arc<Mutex<Vec<Vec<Value>>>>,
    sleep: Duration,
}

impl Recording {
    fn new(sleep: Duration) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            sleep,
        }
    }
}

#[async_trait]
impl Handler for Recording {
    async fn handle(&self, args: &[Value]) -> Result<(), HandlerError> {
        self.calls.lock().await.push(args.to_vec());
        tokio::time::sleep(self.sleep).await;
        Ok(())
    }
}

#[tokio::test]
#[ignore]
async fn single_group_ordering() {
    let client = client().await;
    let queue = client.queue(&unique_queue("order")).await.unwrap();

    for i in 1..=3 {
        queue.enqueue(vec![json!("G"), json!(i)]).await.unwrap();
    }

    let handler = Recording::new(Duration::from_millis(10));
    let calls = handler.calls.clone();
    let worker = queue.register(handler);

    eventually("three finished tasks", || async {
        finished_count(&queue).await == 3
    })
    .await;
    worker.shutdown();
    worker.join().await;

    let calls = calls.lock().await;
    let seen: Vec<i64> = calls.iter().map(|args| args[1].as_i64().unwrap()).collect();
    assert_eq!(seen, vec![1, 2, 3]);

    let stats = queue.statistics().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.finished, 3);
    assert_eq!(stats.pending_tasks, 0);
    assert_eq!(stats.failed_tasks, 0);
    assert!(stats.average_pending_time.is_some());
    assert!(stats.average_processing_time.is_some());

    assert!(queue.processing_tasks().await.unwrap().is_empty());
    assert_eq!(queue.recently_finished_tasks().await.unwrap().len(), 3);
}

/// Blocks every invocation until two handlers are in flight at once.
struct Rendezvous {
    barrier: Arc<Barrier>,
}

#[async_trait]
impl Handler for Rendezvous {
    async fn handle(&self, _args: &[Value]) -> Result<(), HandlerError> {
        self.barrier.wait().await;
        Ok(())
    }
}

#[tokio::test]
#[ignore]
async fn cross_group_parallelism() {
    let client = client().await;
    let queue = client.queue(&unique_queue("parallel")).await.unwrap();

    queue.enqueue(vec![json!("G"), json!(1)]).await.unwrap();
    queue.enqueue(vec![json!("H"), json!(1)]).await.unwrap();

    // The barrier only opens when both handlers overlap in wall time, so
    // completion itself proves cross-group parallelism.
    let barrier = Arc::new(Barrier::new(2));
    let w1 = queue.register(Rendezvous {
        barrier: barrier.clone(),
    });
    let w2 = queue.register(Rendezvous {
        barrier: barrier.clone(),
    });

    eventually("both groups finished concurrently", || async {
        finished_count(&queue).await == 2
    })
    .await;
    w1.shutdown();
    w2.shutdown();
    w1.join().await;
    w2.join().await;
}

/// Fails the first `failures` invocations, succeeds afterwards.
struct FlakyOnce {
    invocations: Arc<AtomicUsize>,
    failures: usize,
}

#[async_trait]
impl Handler for FlakyOnce {
    async fn handle(&self, _args: &[Value]) -> Result<(), HandlerError> {
        let n = self.invocations.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(HandlerError::new("transient"))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
#[ignore]
async fn retry_then_success() {
    let client = client().await;
    let queue = client.queue(&unique_queue("retry")).await.unwrap();

    queue.enqueue(vec![json!("G"), json!(1)]).await.unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let worker = queue.register(FlakyOnce {
        invocations: invocations.clone(),
        failures: 1,
    });

    eventually("task finished after one retry", || async {
        finished_count(&queue).await == 1
    })
    .await;
    worker.shutdown();
    worker.join().await;

    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert!(queue.failed_tasks().await.unwrap().is_empty());
    assert!(queue.blocked_groups().await.unwrap().is_empty());
}

/// Always fails with the given error.
struct AlwaysFail {
    invocations: Arc<AtomicUsize>,
    error: HandlerError,
}

#[async_trait]
impl Handler for AlwaysFail {
    async fn handle(&self, _args: &[Value]) -> Result<(), HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

#[tokio::test]
#[ignore]
async fn block_after_retry() {
    let client = client().await;
    let queue = client.queue(&unique_queue("block")).await.unwrap();

    queue.enqueue(vec![json!("G"), json!(1)]).await.unwrap();
    queue.enqueue(vec![json!("G"), json!(2)]).await.unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let worker = queue.register(AlwaysFail {
        invocations: invocations.clone(),
        error: HandlerError::block_after_retry("x"),
    });

    eventually("group blocked", || async {
        !queue.blocked_groups().await.unwrap().is_empty()
    })
    .await;
    worker.shutdown();
    worker.join().await;

    // retry_limit = 2 means three invocations of (G, 1); (G, 2) never runs.
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    let failed = queue.failed_tasks().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].args, vec![json!("G"), json!(1)]);
    assert_eq!(failed[0].errors, vec!["x", "x", "x"]);

    assert_eq!(queue.blocked_groups().await.unwrap(), vec![json!("G")]);

    let stats = queue.statistics().await.unwrap();
    assert_eq!(stats.blocked.groups, 1);
    // (G, 2) is the lone blocked survivor behind the archived head.
    assert_eq!(stats.blocked.tasks, 1);
    assert_eq!(stats.finished, 0);
}

#[tokio::test]
#[ignore]
async fn reschedule_recovery() {
    let client = client().await;
    let queue = client.queue(&unique_queue("resched")).await.unwrap();

    queue.enqueue(vec![json!("G"), json!(1)]).await.unwrap();
    queue.enqueue(vec![json!("G"), json!(2)]).await.unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let failing = queue.register(AlwaysFail {
        invocations: invocations.clone(),
        error: HandlerError::block_after_retry("x"),
    });
    eventually("group blocked", || async {
        !queue.blocked_groups().await.unwrap().is_empty()
    })
    .await;
    failing.shutdown();
    failing.join().await;

    // Swap in an always-succeeding handler and recover the group.
    let handler = Recording::new(Duration::ZERO);
    let calls = handler.calls.clone();
    let worker = queue.register(handler);
    queue.reschedule().await.unwrap();

    eventually("both tasks finished after reschedule", || async {
        finished_count(&queue).await == 2
    })
    .await;
    worker.shutdown();
    worker.join().await;

    let calls = calls.lock().await;
    let seen: Vec<i64> = calls.iter().map(|args| args[1].as_i64().unwrap()).collect();
    assert_eq!(seen, vec![1, 2]);

    assert!(queue.failed_tasks().await.unwrap().is_empty());
    assert!(queue.blocked_groups().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn non_blocking_skip_drains_group() {
    let client = client().await;
    let config = QueueConfig {
        retry_limit: 1,
        ..Default::default()
    };
    let queue = client
        .queue_with_config(&unique_queue("skip"), config)
        .await
        .unwrap();

    queue.enqueue(vec![json!("G"), json!(1)]).await.unwrap();
    queue.enqueue(vec![json!("G"), json!(2)]).await.unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let worker = queue.register(AlwaysFail {
        invocations: invocations.clone(),
        error: HandlerError::new("boom"),
    });

    eventually("both tasks archived", || async {
        queue.failed_tasks().await.unwrap().len() == 2
    })
    .await;
    worker.shutdown();
    worker.join().await;

    // Two attempts per task, group drained, nothing blocked.
    assert_eq!(invocations.load(Ordering::SeqCst), 4);
    let failed = queue.failed_tasks().await.unwrap();
    assert_eq!(failed[0].args, vec![json!("G"), json!(1)]);
    assert_eq!(failed[1].args, vec![json!("G"), json!(2)]);
    assert_eq!(failed[0].errors.len(), 2);
    assert!(queue.blocked_groups().await.unwrap().is_empty());

    let stats = queue.statistics().await.unwrap();
    assert_eq!(stats.failed_tasks, 2);
    assert_eq!(stats.pending_tasks, 0);
    assert!(queue.processing_tasks().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn zero_retry_limit_archives_after_one_attempt() {
    let client = client().await;
    let config = QueueConfig {
        retry_limit: 0,
        ..Default::default()
    };
    let queue = client
        .queue_with_config(&unique_queue("zero"), config)
        .await
        .unwrap();

    queue.enqueue(vec![json!("G"), json!(1)]).await.unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let worker = queue.register(AlwaysFail {
        invocations: invocations.clone(),
        error: HandlerError::new("boom"),
    });

    eventually("task archived", || async {
        queue.failed_tasks().await.unwrap().len() == 1
    })
    .await;
    worker.shutdown();
    worker.join().await;

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[ignore]
async fn reschedule_on_idle_queue_is_a_no_op() {
    let client = client().await;
    let queue = client.queue(&unique_queue("idle")).await.unwrap();

    queue.reschedule().await.unwrap();

    let stats = queue.statistics().await.unwrap();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.finished, 0);
    assert_eq!(stats.failed_tasks, 0);
    assert_eq!(stats.blocked.groups, 0);
}

#[tokio::test]
#[ignore]
async fn single_arg_task_reaches_handler() {
    let client = client().await;
    let queue = client.queue(&unique_queue("single")).await.unwrap();

    // The lone arg is both group id and payload.
    queue.enqueue(vec![json!("solo")]).await.unwrap();

    let handler = Recording::new(Duration::ZERO);
    let calls = handler.calls.clone();
    let worker = queue.register(handler);

    eventually("task finished", || async {
        finished_count(&queue).await == 1
    })
    .await;
    worker.shutdown();
    worker.join().await;

    let calls = calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], vec![json!("solo")]);
}

/// Sleeps for the duration given in the task's second argument.
struct TimedSleep;

#[async_trait]
impl Handler for TimedSleep {
    async fn handle(&self, args: &[Value]) -> Result<(), HandlerError> {
        let ms = args[1].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}

#[tokio::test]
#[ignore]
async fn slowest_set_evicts_fastest_at_capacity() {
    let client = client().await;
    let config = QueueConfig {
        slowest_size: 2,
        ..Default::default()
    };
    let queue = client
        .queue_with_config(&unique_queue("slowest"), config)
        .await
        .unwrap();

    queue.enqueue(vec![json!("a"), json!(5)]).await.unwrap();
    queue.enqueue(vec![json!("b"), json!(100)]).await.unwrap();
    queue.enqueue(vec![json!("c"), json!(200)]).await.unwrap();

    let worker = queue.register(TimedSleep);
    eventually("all three finished", || async {
        finished_count(&queue).await == 3
    })
    .await;
    worker.shutdown();
    worker.join().await;

    let slowest = queue.slowest_tasks().await.unwrap();
    assert_eq!(slowest.len(), 2);
    // Slowest first; the 5 ms task was evicted.
    assert_eq!(slowest[0].args[0], json!("c"));
    assert_eq!(slowest[1].args[0], json!("b"));
    assert!(slowest[0].processing_time >= slowest[1].processing_time);
}

#[tokio::test]
#[ignore]
async fn queue_registry_and_client_statistics() {
    let client = client().await;
    let name = unique_queue("registry");
    let queue = client.queue(&name).await.unwrap();
    queue.enqueue(vec![json!("G"), json!(1)]).await.unwrap();

    let names = client.queues().await.unwrap();
    assert!(names.contains(&name));

    let all = client.statistics().await.unwrap();
    let (_, stats) = all
        .iter()
        .find(|(n, _)| n == &name)
        .expect("statistics for registered queue");
    assert_eq!(stats.total, 1);
}
