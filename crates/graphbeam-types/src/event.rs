//! Run events, metrics, and the sink boundary to the embedding logger.
//!
//! The runtime reports structured occurrences through [`RunEventSink`]; the
//! embedder decides how they reach operators or remote event services. The
//! transport itself is outside this workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IntegrationError;

/// A single metric observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub unit: String,
    pub value: u64,
}

impl Metric {
    /// Byte-valued metric.
    #[must_use]
    pub fn bytes(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            unit: "Bytes".to_string(),
            value,
        }
    }
}

/// A structured run event queued for delivery to the remote event sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub name: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Boundary to the embedding system's logger.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn RunEventSink>`.
pub trait RunEventSink: Send + Sync {
    /// A metric observation (e.g. staging-directory disk usage).
    fn publish_metric(&self, metric: &Metric);

    /// Invocation validation rejected the run.
    fn validation_failure(&self, error: &IntegrationError);

    /// A synchronization job started accepting uploads.
    fn sync_upload_start(&self, job_id: &str);

    /// All uploads for a synchronization job completed.
    fn sync_upload_end(&self, job_id: &str);

    /// A structured run event.
    fn event(&self, event: &SyncEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_metric_shape() {
        let m = Metric::bytes("disk-usage", 4096);
        assert_eq!(m.unit, "Bytes");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["name"], "disk-usage");
        assert_eq!(json["value"], 4096);
    }

    #[test]
    fn sink_is_object_safe() {
        fn _assert_object_safe(_: &dyn RunEventSink) {}
    }

    #[test]
    fn event_carries_timestamp() {
        let e = SyncEvent::new("step_end", "step fetch-users completed");
        assert!(e.timestamp <= Utc::now());
        let json = serde_json::to_string(&e).unwrap();
        let back: SyncEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
