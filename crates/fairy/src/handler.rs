//! Handler trait implemented by task bodies

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// What the engine should do with a group after a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDirective {
    /// Archive immediately and block the group.
    Block,
    /// Retry up to the limit, then archive and block the group.
    BlockAfterRetry,
}

/// Error returned by a handler invocation.
///
/// Without a directive the task is retried up to the queue's limit and then
/// archived while the rest of its group keeps flowing.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub directive: Option<FailureDirective>,
}

impl HandlerError {
    /// A retryable, non-blocking failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            directive: None,
        }
    }

    /// Archive on first occurrence and block the group.
    pub fn block(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            directive: Some(FailureDirective::Block),
        }
    }

    /// Retry up to the limit, then archive and block the group.
    pub fn block_after_retry(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            directive: Some(FailureDirective::BlockAfterRetry),
        }
    }
}

/// A task body. One registered handler drives one worker.
///
/// The handler receives only the user-supplied arguments; engine metadata
/// never reaches it. Returning `Ok` completes the task, `Err` drives the
/// retry/blocking state machine according to the error's directive.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, args: &[Value]) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, args: &[Value]) -> Result<(), HandlerError> {
        (**self).handle(args).await
    }
}
