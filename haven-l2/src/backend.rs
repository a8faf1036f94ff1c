//! The seam between the planner and the network: L2 never calls an LLM
//! provider directly (spec §4.3 "Level 2 ... talks only to the control
//! plane"). [`PlanBackend`] is implemented by `haven-control-plane`'s mTLS
//! client; this crate only depends on the trait, mirroring the
//! `haven-executor::RemoteTransport` split between policy and transport.

use crate::decision::PlanRequest;
use async_trait::async_trait;
use haven_types::AgentError;

#[async_trait]
pub trait PlanBackend: Send + Sync {
    /// Sends `request` to `/api/agent/l2/plan` and returns the raw response
    /// body. Parsing (including code-fence stripping) is the planner's job,
    /// not the backend's, so a backend swap never changes parsing behavior.
    async fn plan(&self, request: &PlanRequest) -> Result<String, AgentError>;
}
