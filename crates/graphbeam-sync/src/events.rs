//! Event queue drained before a synchronization job finalizes.

use std::collections::VecDeque;
use std::sync::Mutex;

use graphbeam_types::{RunEventSink, SyncEvent};

/// Buffers run events published while steps and uploads are in flight.
///
/// [`EventQueue::drain`] hands every pending event to the sink; the uploader
/// drains the queue before finalize so nothing is lost behind the job.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Mutex<VecDeque<SyncEvent>>,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for delivery.
    pub fn publish(&self, event: SyncEvent) {
        self.pending
            .lock()
            .expect("event queue lock poisoned")
            .push_back(event);
    }

    /// Number of undelivered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().expect("event queue lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver every pending event to the sink, in publish order.
    pub fn drain(&self, sink: &dyn RunEventSink) {
        loop {
            let event = self
                .pending
                .lock()
                .expect("event queue lock poisoned")
                .pop_front();
            match event {
                Some(event) => sink.event(&event),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphbeam_types::{IntegrationError, Metric};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<String>>,
    }

    impl RunEventSink for RecordingSink {
        fn publish_metric(&self, _metric: &Metric) {}
        fn validation_failure(&self, _error: &IntegrationError) {}
        fn sync_upload_start(&self, _job_id: &str) {}
        fn sync_upload_end(&self, _job_id: &str) {}
        fn event(&self, event: &SyncEvent) {
            self.events.lock().unwrap().push(event.name.clone());
        }
    }

    #[test]
    fn drain_delivers_in_publish_order() {
        let queue = EventQueue::new();
        queue.publish(SyncEvent::new("first", ""));
        queue.publish(SyncEvent::new("second", ""));
        assert_eq!(queue.len(), 2);

        let sink = RecordingSink::default();
        queue.drain(&sink);
        assert_eq!(*sink.events.lock().unwrap(), vec!["first", "second"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_on_empty_queue_is_a_no_op() {
        let queue = EventQueue::new();
        let sink = RecordingSink::default();
        queue.drain(&sink);
        assert!(sink.events.lock().unwrap().is_empty());
    }
}
