//! Queue and connection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-queue tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Sleep between polls of an empty ingress list
    pub polling_interval: Duration,
    /// Delay before re-invoking a failed task
    pub retry_delay: Duration,
    /// Retries after the first attempt before a task is archived
    pub retry_limit: u32,
    /// Finished tasks retained for introspection
    pub recent_size: usize,
    /// Slowest tasks retained for introspection
    pub slowest_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(5),
            retry_delay: Duration::from_millis(100),
            retry_limit: 2,
            recent_size: 10,
            slowest_size: 10,
        }
    }
}

/// Redis connection settings for a [`Client`](crate::Client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Redis host
    pub host: String,
    /// Redis port
    pub port: u16,
    /// Optional AUTH password
    pub password: Option<String>,
    /// Connection pool size
    pub pool_size: usize,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            pool_size: 10,
        }
    }
}

impl ConnectConfig {
    /// Build the redis URL for this configuration.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}
