//! SSH transport (`ssh2`): key-based auth against Linux hosts, and local
//! exec on the appliance itself via `localhost` (spec §4.6, §6). Sessions
//! are cached per target for the lifetime of a cycle in a blocking pool,
//! since `ssh2` has no async API; calls are dispatched through
//! `tokio::task::spawn_blocking`.

use crate::step::{truncate_output, Step, StepOutcome, StepResult};
use crate::transport::RemoteTransport;
use async_trait::async_trait;
use haven_types::{AgentError, RemoteTarget};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct PooledSession {
    session: ssh2::Session,
}

/// A per-target session pool. `ssh2::Session` is `Send` but not `Sync`; we
/// hold each one behind its own mutex so concurrent steps against
/// different hosts never contend.
pub struct SshTransport {
    sessions: Mutex<HashMap<String, Arc<Mutex<PooledSession>>>>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SshTransport {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn target_key(target: &RemoteTarget) -> String {
        format!("{}:{}:{}", target.host, target.port, target.username)
    }

    fn get_or_connect(&self, target: &RemoteTarget) -> Result<Arc<Mutex<PooledSession>>, AgentError> {
        let key = Self::target_key(target);
        let mut guard = self.sessions.lock();
        if let Some(existing) = guard.get(&key) {
            return Ok(existing.clone());
        }

        let port = if target.port != 0 { target.port } else { 22 };
        let tcp = TcpStream::connect((target.host.as_str(), port)).map_err(|e| {
            AgentError::TransportTransient {
                message: format!("tcp connect to {}:{port} failed: {e}", target.host),
            }
        })?;
        tcp.set_read_timeout(Some(Duration::from_secs(60))).ok();

        let mut session = ssh2::Session::new().map_err(|e| AgentError::TransportPermanent {
            message: format!("failed to create ssh session: {e}"),
        })?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| AgentError::TransportTransient {
            message: format!("ssh handshake failed: {e}"),
        })?;

        // `secret` holds either a password or a private-key path/material
        // depending on deployment; key-based auth is the documented path
        // (spec §4.6) and is tried first.
        session
            .userauth_pubkey_memory(&target.username, None, &target.secret, None)
            .or_else(|_| session.userauth_password(&target.username, &target.secret))
            .map_err(|e| AgentError::TransportPermanent {
                message: format!("ssh authentication failed for {}: {e}", target.username),
            })?;

        let pooled = Arc::new(Mutex::new(PooledSession { session }));
        guard.insert(key, pooled.clone());
        Ok(pooled)
    }

    fn drop_session(&self, target: &RemoteTarget) {
        self.sessions.lock().remove(&Self::target_key(target));
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn run_step(&self, target: &RemoteTarget, step: &Step) -> Result<StepResult, AgentError> {
        let pooled = self.get_or_connect(target)?;
        let command_text = step.command_text.clone();
        let step_name = step.name.clone();
        let timeout = step.effective_timeout();
        let started = Instant::now();

        let result = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || run_blocking(pooled, &command_text)),
        )
        .await;

        match result {
            Err(_elapsed) => {
                self.drop_session(target);
                Err(AgentError::Timeout {
                    operation: step_name,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(join_error)) => Err(AgentError::TransportTransient {
                message: format!("ssh step task panicked: {join_error}"),
            }),
            Ok(Ok(Err(e))) => {
                self.drop_session(target);
                Err(e)
            }
            Ok(Ok(Ok((stdout, stderr, exit_status)))) => {
                let (stdout, stdout_truncated) = truncate_output(&stdout);
                let (stderr, stderr_truncated) = truncate_output(&stderr);
                Ok(StepResult {
                    outcome: if exit_status == 0 { StepOutcome::Success } else { StepOutcome::Failure },
                    stdout,
                    stderr,
                    exit_code: Some(exit_status),
                    duration_ms: started.elapsed().as_millis() as u64,
                    stdout_truncated,
                    stderr_truncated,
                })
            }
        }
    }

    fn invalidate_session(&self, target: &RemoteTarget) {
        self.drop_session(target);
    }
}

fn run_blocking(
    pooled: Arc<Mutex<PooledSession>>,
    command_text: &str,
) -> Result<(String, String, i32), AgentError> {
    let guard = pooled.lock();
    let mut channel = guard.session.channel_session().map_err(|e| AgentError::TransportTransient {
        message: format!("failed to open ssh channel: {e}"),
    })?;
    channel.exec(command_text).map_err(|e| AgentError::TransportTransient {
        message: format!("failed to exec over ssh: {e}"),
    })?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout).map_err(|e| AgentError::TransportTransient {
        message: format!("failed to read ssh stdout: {e}"),
    })?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| AgentError::TransportTransient {
            message: format!("failed to read ssh stderr: {e}"),
        })?;

    channel.wait_close().ok();
    let exit_status = channel.exit_status().unwrap_or(-1);
    Ok((stdout, stderr, exit_status))
}
