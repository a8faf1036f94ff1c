//! Dispatches each remote step to the transport the target's credential
//! protocol calls for (spec §4.6, §6): WinRM for NTLM/Kerberos targets, SSH
//! for everything else, including local exec on the appliance itself.

use async_trait::async_trait;
use haven_executor::{RemoteTransport, SshTransport, Step, StepResult, WinrmTransport};
use haven_types::{AgentError, RemoteTarget};

pub struct DispatchTransport {
    ssh: SshTransport,
    winrm: WinrmTransport,
}

impl DispatchTransport {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            ssh: SshTransport::new(),
            winrm: WinrmTransport::new(http_client),
        }
    }

    fn select(&self, target: &RemoteTarget) -> &dyn RemoteTransport {
        if target.is_windows() {
            &self.winrm
        } else {
            &self.ssh
        }
    }
}

#[async_trait]
impl RemoteTransport for DispatchTransport {
    async fn run_step(&self, target: &RemoteTarget, step: &Step) -> Result<StepResult, AgentError> {
        self.select(target).run_step(target, step).await
    }

    fn invalidate_session(&self, target: &RemoteTarget) {
        self.select(target).invalidate_session(target)
    }
}
