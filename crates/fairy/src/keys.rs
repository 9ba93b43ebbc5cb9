//! Redis key layout shared by every process attached to a queue.
//!
//! All per-queue state lives under `FAIRY:<kind>:<queue>`; the single global
//! key `FAIRY:QUEUES` registers queue names for fast lookup without a scan.

/// Prefix for every key written by this crate.
pub const PREFIX: &str = "FAIRY";

/// Global set of registered queue names.
pub const QUEUES_KEY: &str = "FAIRY:QUEUES";

/// Key derivation for one named queue.
#[derive(Debug, Clone)]
pub struct Keys {
    name: String,
}

impl Keys {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Queue name these keys derive from.
    pub fn queue_name(&self) -> &str {
        &self.name
    }

    /// Ingress list; each element is an encoded task.
    pub fn source(&self) -> String {
        format!("{PREFIX}:SOURCE:{}", self.name)
    }

    /// Per-group FIFO list. `group` is the group id's wire encoding.
    pub fn queued(&self, group: &str) -> String {
        format!("{PREFIX}:QUEUED:{}:{}", self.name, group)
    }

    /// Hash of in-flight tasks, token -> encoded task.
    pub fn processing(&self) -> String {
        format!("{PREFIX}:PROCESSING:{}", self.name)
    }

    /// List of terminal failure records.
    pub fn failed(&self) -> String {
        format!("{PREFIX}:FAILED:{}", self.name)
    }

    /// Set of blocked group ids.
    pub fn blocked(&self) -> String {
        format!("{PREFIX}:BLOCKED:{}", self.name)
    }

    /// Bounded list of recently finished tasks, newest first.
    pub fn recent(&self) -> String {
        format!("{PREFIX}:RECENT:{}", self.name)
    }

    /// Bounded sorted set of the slowest tasks, scored by processing ms.
    pub fn slowest(&self) -> String {
        format!("{PREFIX}:SLOWEST:{}", self.name)
    }

    /// Hash of queue counters.
    pub fn statistics(&self) -> String {
        format!("{PREFIX}:STATISTICS:{}", self.name)
    }
}
