//! Pluggable event sinks. The bus fans every event out to every registered
//! sink; a sink that errors is logged and skipped — it never aborts
//! delivery to the remaining sinks (the same "try every channel, never fail
//! the whole operation" posture the L3 escalator uses for notification
//! channels).

use crate::event::TelemetryEvent;

pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;
    fn handle(&self, event: &TelemetryEvent);
}

/// Forwards every event to the `tracing` subscriber at a level matching its
/// [`crate::event::EventSeverity`].
pub struct TracingSink;

impl EventSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn handle(&self, event: &TelemetryEvent) {
        use crate::event::EventSeverity;
        match event.severity {
            EventSeverity::Debug => {
                tracing::debug!(component = %event.component, incident_id = ?event.incident_id, "{}", event.message)
            }
            EventSeverity::Info => {
                tracing::info!(component = %event.component, incident_id = ?event.incident_id, "{}", event.message)
            }
            EventSeverity::Warn => {
                tracing::warn!(component = %event.component, incident_id = ?event.incident_id, "{}", event.message)
            }
            EventSeverity::Error | EventSeverity::Alert => {
                tracing::error!(component = %event.component, incident_id = ?event.incident_id, "{}", event.message)
            }
        }
    }
}

/// Bounded in-memory ring buffer used by tests and by the L3 escalator to
/// attach recent diagnostics to an escalation ticket.
pub struct RingBufferSink {
    capacity: usize,
    events: parking_lot::Mutex<std::collections::VecDeque<TelemetryEvent>>,
}

impl RingBufferSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
        }
    }

    pub fn recent(&self, n: usize) -> Vec<TelemetryEvent> {
        let guard = self.events.lock();
        guard.iter().rev().take(n).cloned().collect()
    }
}

impl EventSink for RingBufferSink {
    fn name(&self) -> &str {
        "ring_buffer"
    }

    fn handle(&self, event: &TelemetryEvent) {
        let mut guard = self.events.lock();
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventSeverity;

    #[test]
    fn ring_buffer_evicts_oldest_when_full() {
        let sink = RingBufferSink::new(2);
        sink.handle(&TelemetryEvent::new("a", EventSeverity::Info, "one"));
        sink.handle(&TelemetryEvent::new("b", EventSeverity::Info, "two"));
        sink.handle(&TelemetryEvent::new("c", EventSeverity::Info, "three"));

        let recent = sink.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].component, "c");
        assert_eq!(recent[1].component, "b");
    }
}
