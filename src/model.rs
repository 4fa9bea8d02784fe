//! Core data model.
//!
//! A work item is anything the queue can deduplicate: it knows its logical
//! target key and the metric labels that describe that target.

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// An item the queue can admit, deduplicate and hand to a worker.
///
/// Two items that must never run concurrently must return the same key;
/// items that may run side by side must return different keys.
pub trait WorkItem: Send + 'static {
    /// Deduplication key. Pure and deterministic for the identifying fields.
    fn key(&self) -> String;

    /// Metric attributes describing the logical target (e.g. network, client).
    fn labels(&self) -> Vec<KeyValue>;
}

// ---------------------------------------------------------------------------
// Check Alert
// ---------------------------------------------------------------------------

/// A registered health check for one client on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckAlert {
    pub network: String,
    pub client: String,

    /// Cron expression the check runs on.
    pub schedule: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl CheckAlert {
    pub fn new(
        network: impl Into<String>,
        client: impl Into<String>,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            client: client.into(),
            schedule: schedule.into(),
            enabled: true,
        }
    }
}

impl WorkItem for CheckAlert {
    fn key(&self) -> String {
        format!("{}-{}", self.network, self.client)
    }

    fn labels(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new("network", self.network.clone()),
            KeyValue::new("client", self.client.clone()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to an item handed to `Queue::enqueue`.
///
/// Enqueueing never fails from the caller's point of view; this is purely
/// informational and may be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Admitted and placed on the channel.
    Queued,
    /// An item with the same key is already in flight.
    Skipped,
    /// Admitted but the channel was full or closed; the item is lost.
    Dropped,
}

/// Classified result of one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// Worker returned `Ok(false)`: nothing to report.
    SoftFailure,
    /// Worker returned an error or panicked.
    HardError { error_type: &'static str, message: String },
}

impl Outcome {
    /// Value of the `status` label on the processed counter.
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "success",
            Outcome::SoftFailure => "soft_failure",
            Outcome::HardError { .. } => "hard_error",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::HardError { error_type, message } => write!(f, "{error_type}: {message}"),
            other => write!(f, "{}", other.status()),
        }
    }
}
