//! Durable, append-only local queue for evidence and telemetry artifacts
//! that can't be delivered to the control plane right now (spec §3, §5,
//! §6 on-disk layout `<state_dir>/queue.db`).
//!
//! Ownership is exclusive: nothing outside this crate mutates `queue.db`.
//! Every write is WAL-journaled and fsync'd before `enqueue` returns, so a
//! crash mid-cycle never silently drops a pending upload.

mod item;
mod store;

pub use item::{QueueItem, QueueItemKind, QueueItemState};
pub use store::OfflineQueue;
