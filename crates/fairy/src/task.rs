//! Task tuples and their wire encodings.
//!
//! A task is an ordered tuple of user-supplied JSON values; by convention the
//! first position is the group identifier. Every element stored in a Redis
//! list is the task's JSON-array encoding with metadata timestamps appended
//! as extra trailing positions. The positional contract per location:
//!
//! | location              | shape                                              |
//! |-----------------------|----------------------------------------------------|
//! | `SOURCE`, `QUEUED:g`  | `[args…, enqueued_at_ms]`                          |
//! | `PROCESSING` value    | `[args…, start_time_ms]`                           |
//! | `FAILED`              | `[args…, enqueued_at_ms, failed_at_ms, [errors…]]` |
//! | `RECENT`              | `[args…, finished_at_ms]`                          |
//! | `SLOWEST` member      | `[args…]`, score = processing duration ms          |

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::error::QueueError;

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Derive the group key string for a task's first argument.
///
/// The compact JSON encoding of the group value is used both as the
/// `QUEUED:<group>` key suffix and as the `BLOCKED` set member, so key
/// derivation and introspection decode agree for non-string group ids.
pub(crate) fn group_key(args: &[Value]) -> Result<String, QueueError> {
    let group = args
        .first()
        .ok_or_else(|| QueueError::MalformedTask("task has no arguments".to_string()))?;
    Ok(group.to_string())
}

fn decode_array(raw: &str) -> Result<Vec<Value>, QueueError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(values)) => Ok(values),
        Ok(other) => Err(QueueError::MalformedTask(format!(
            "expected JSON array, got {other}"
        ))),
        Err(e) => Err(QueueError::MalformedTask(format!("undecodable task: {e}"))),
    }
}

fn take_ms(values: &mut Vec<Value>, what: &str) -> Result<i64, QueueError> {
    values
        .pop()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| QueueError::MalformedTask(format!("missing {what} position")))
}

/// A task inside `SOURCE` or a `QUEUED:<group>` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedTask {
    /// User-supplied arguments; `args[0]` is the group id.
    pub args: Vec<Value>,
    /// Milliseconds timestamp recorded at enqueue.
    pub enqueued_at: i64,
}

impl QueuedTask {
    /// Build a fresh task from user arguments, stamping the enqueue time.
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            args,
            enqueued_at: now_ms(),
        }
    }

    pub fn decode(raw: &str) -> Result<Self, QueueError> {
        let mut values = decode_array(raw)?;
        let enqueued_at = take_ms(&mut values, "enqueued_at")?;
        Ok(Self {
            args: values,
            enqueued_at,
        })
    }

    pub fn encode(&self) -> Result<String, QueueError> {
        let mut values = self.args.clone();
        values.push(Value::from(self.enqueued_at));
        Ok(serde_json::to_string(&values)?)
    }

    /// Group key string for this task (see [`group_key`]).
    pub fn group(&self) -> Result<String, QueueError> {
        group_key(&self.args)
    }
}

/// A terminal failure record inside `FAILED`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTask {
    pub args: Vec<Value>,
    pub enqueued_at: i64,
    pub failed_at: i64,
    pub errors: Vec<String>,
}

impl FailedTask {
    pub fn decode(raw: &str) -> Result<Self, QueueError> {
        let mut values = decode_array(raw)?;
        let errors = match values.pop() {
            Some(Value::Array(msgs)) => msgs
                .into_iter()
                .map(|m| match m {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            _ => {
                return Err(QueueError::MalformedTask(
                    "missing error list position".to_string(),
                ))
            }
        };
        let failed_at = take_ms(&mut values, "failed_at")?;
        let enqueued_at = take_ms(&mut values, "enqueued_at")?;
        Ok(Self {
            args: values,
            enqueued_at,
            failed_at,
            errors,
        })
    }

    pub fn encode(&self) -> Result<String, QueueError> {
        let mut values = self.args.clone();
        values.push(Value::from(self.enqueued_at));
        values.push(Value::from(self.failed_at));
        values.push(Value::Array(
            self.errors.iter().cloned().map(Value::from).collect(),
        ));
        Ok(serde_json::to_string(&values)?)
    }

    /// Restore the pre-failure tuple `[args…, enqueued_at]` for re-ingestion.
    pub fn to_queued(&self) -> QueuedTask {
        QueuedTask {
            args: self.args.clone(),
            enqueued_at: self.enqueued_at,
        }
    }
}

/// A finished-task record inside `RECENT`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishedTask {
    pub args: Vec<Value>,
    pub finished_at: i64,
}

impl FinishedTask {
    pub fn decode(raw: &str) -> Result<Self, QueueError> {
        let mut values = decode_array(raw)?;
        let finished_at = take_ms(&mut values, "finished_at")?;
        Ok(Self {
            args: values,
            finished_at,
        })
    }

    pub fn encode(&self) -> Result<String, QueueError> {
        let mut values = self.args.clone();
        values.push(Value::from(self.finished_at));
        Ok(serde_json::to_string(&values)?)
    }
}

/// An in-flight task from the `PROCESSING` hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingTask {
    /// Per-invocation token the entry is stored under.
    pub token: String,
    pub args: Vec<Value>,
    pub started_at: i64,
}

impl ProcessingTask {
    pub fn decode(token: String, raw: &str) -> Result<Self, QueueError> {
        let mut values = decode_array(raw)?;
        let started_at = take_ms(&mut values, "start_time")?;
        Ok(Self {
            token,
            args: values,
            started_at,
        })
    }
}

/// A retained slow task from the `SLOWEST` sorted set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowTask {
    pub args: Vec<Value>,
    /// Processing duration in milliseconds (the member's score).
    pub processing_time: i64,
}

impl SlowTask {
    pub fn decode(member: &str, score: i64) -> Result<Self, QueueError> {
        Ok(Self {
            args: decode_array(member)?,
            processing_time: score,
        })
    }

    pub fn encode_member(args: &[Value]) -> Result<String, QueueError> {
        Ok(serde_json::to_string(args)?)
    }
}
