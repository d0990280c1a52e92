//! Default event sink backed by `tracing`.

use graphbeam_types::{IntegrationError, Metric, RunEventSink, SyncEvent};

/// Reports run events through the process tracing subscriber.
///
/// Embedders with a remote event service supply their own sink instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl RunEventSink for TracingEventSink {
    fn publish_metric(&self, metric: &Metric) {
        tracing::info!(
            name = %metric.name,
            unit = %metric.unit,
            value = metric.value,
            "Metric published"
        );
    }

    fn validation_failure(&self, error: &IntegrationError) {
        tracing::error!(error = %error, "Invocation validation failed");
    }

    fn sync_upload_start(&self, job_id: &str) {
        tracing::info!(job_id, "Synchronization upload started");
    }

    fn sync_upload_end(&self, job_id: &str) {
        tracing::info!(job_id, "Synchronization upload finished");
    }

    fn event(&self, event: &SyncEvent) {
        tracing::info!(
            name = %event.name,
            description = %event.description,
            "Run event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_methods_do_not_panic_without_subscriber() {
        let sink = TracingEventSink;
        sink.publish_metric(&Metric::bytes("disk-usage", 1));
        sink.validation_failure(&IntegrationError::validation("bad config"));
        sink.sync_upload_start("job-1");
        sink.sync_upload_end("job-1");
        sink.event(&SyncEvent::new("step_end", "done"));
    }
}
