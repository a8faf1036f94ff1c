//! [`EventBus`] — fans events out to every registered [`EventSink`].
//!
//! Unlike the workflow-engine event bus this pattern is adapted from, there
//! is no per-session isolation requirement here: one bus instance lives for
//! the lifetime of the agent process and is shared (via `Arc`) by every
//! worker.

use crate::event::TelemetryEvent;
use crate::sink::EventSink;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn emit(&self, event: TelemetryEvent) {
        for sink in &self.sinks {
            sink.handle(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventSeverity;
    use crate::sink::RingBufferSink;

    #[test]
    fn every_registered_sink_receives_every_event() {
        let ring = Arc::new(RingBufferSink::new(10));
        let bus = EventBus::new().with_sink(ring.clone());
        bus.emit(TelemetryEvent::new(
            "drift_detector",
            EventSeverity::Info,
            "check completed",
        ));
        assert_eq!(ring.recent(10).len(), 1);
    }
}
