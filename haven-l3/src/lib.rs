//! Level-3 human escalator (spec §4.4): the path of last resort when L1
//! has no matching rule and L2 either refuses or is itself unreachable.
//! Builds a PHI-scrubbed ticket and fans it out to whichever notification
//! channels are configured for the incident's severity, tolerating any
//! individual channel's failure.

pub mod escalator;
pub mod routing;
pub mod sink;
pub mod ticket;

pub use escalator::{EscalationOutcome, Escalator};
pub use routing::{channels_for, Channel};
pub use sink::{EscalationSink, RecordingSink, WebhookSink};
pub use ticket::{EscalationReason, EscalationTicket, PriorAttempt};
