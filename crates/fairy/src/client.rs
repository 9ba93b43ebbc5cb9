//! Client: the connection boundary presented to embedders.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::config::{ConnectConfig, QueueConfig};
use crate::error::QueueError;
use crate::keys;
use crate::queue::Queue;
use crate::stats::QueueStatistics;
use crate::store::Store;

/// Entry point: holds the connection pool and the process-wide mapping from
/// queue name to handle.
pub struct Client {
    store: Store,
    queues: DashMap<String, Arc<Queue>>,
}

impl Client {
    /// Connect to the store and verify the connection.
    pub async fn connect(config: ConnectConfig) -> Result<Self, QueueError> {
        let store = Store::connect(&config).await?;
        info!(host = %config.host, port = config.port, "Client connected");
        Ok(Self {
            store,
            queues: DashMap::new(),
        })
    }

    /// Get or create the named queue with default configuration.
    ///
    /// The first access registers the name in the global queue set; later
    /// calls return the cached handle.
    pub async fn queue(&self, name: &str) -> Result<Arc<Queue>, QueueError> {
        self.queue_with_config(name, QueueConfig::default()).await
    }

    /// Get or create the named queue. The configuration applies on first
    /// creation; an already-cached handle keeps its original configuration.
    pub async fn queue_with_config(
        &self,
        name: &str,
        config: QueueConfig,
    ) -> Result<Arc<Queue>, QueueError> {
        if let Some(queue) = self.queues.get(name) {
            return Ok(queue.clone());
        }
        self.store.set_add(keys::QUEUES_KEY, name).await?;
        let queue = Arc::new(Queue::new(self.store.clone(), name, config));
        self.queues.insert(name.to_string(), queue.clone());
        Ok(queue)
    }

    /// All queue names registered in the store, by any process.
    pub async fn queues(&self) -> Result<Vec<String>, QueueError> {
        let mut names = self.store.set_members(keys::QUEUES_KEY).await?;
        names.sort();
        Ok(names)
    }

    /// Statistics for every registered queue.
    pub async fn statistics(&self) -> Result<Vec<(String, QueueStatistics)>, QueueError> {
        let mut all = Vec::new();
        for name in self.queues().await? {
            let queue = self.queue(&name).await?;
            all.push((name, queue.statistics().await?));
        }
        Ok(all)
    }
}
