//! fairy: a group-fair task queue on Redis.
//!
//! Tasks of the same group run sequentially in enqueue order with at most
//! one in flight; tasks of different groups run in parallel across any
//! number of workers, in any number of processes sharing the store. Unlike
//! message-group brokers that pin a group to a single consumer, any idle
//! worker may pick up any group whose head is not already executing, so a
//! slow consumer never becomes the bottleneck for its groups.
//!
//! ```no_run
//! use fairy::{Client, ConnectConfig, Handler, HandlerError};
//! use serde_json::{json, Value};
//!
//! struct SendMail;
//!
//! #[async_trait::async_trait]
//! impl Handler for SendMail {
//!     async fn handle(&self, args: &[Value]) -> Result<(), HandlerError> {
//!         // args[0] is the group id (here: the mailbox).
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> Result<(), fairy::QueueError> {
//! let client = Client::connect(ConnectConfig::default()).await?;
//! let queue = client.queue("mail").await?;
//! queue.enqueue(vec![json!("alice@example.com"), json!("hello")]).await?;
//! let worker = queue.register(SendMail);
//! # worker.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod keys;
pub mod queue;
pub mod stats;
pub mod task;
pub mod worker;

mod store;

// Re-exports
pub use client::Client;
pub use config::{ConnectConfig, QueueConfig};
pub use error::QueueError;
pub use handler::{FailureDirective, Handler, HandlerError};
pub use queue::Queue;
pub use stats::{BlockedStatistics, QueueStatistics};
pub use task::{FailedTask, FinishedTask, ProcessingTask, QueuedTask, SlowTask};
pub use worker::WorkerHandle;

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;
