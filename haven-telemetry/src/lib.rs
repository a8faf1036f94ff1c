//! The agent's internal telemetry bus: a structured event fan-out used by
//! every component for observability, distinct from the control-plane
//! telemetry upload (`haven-control-plane::report_execution`).

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::EventBus;
pub use event::{EventSeverity, TelemetryEvent};
pub use sink::{EventSink, RingBufferSink, TracingSink};
