//! Ephemeral remote-host credentials (spec §3). Fetched from the control
//! plane on each poll cycle, held in memory only, zeroed on drop. Never
//! persisted to disk and never serialized into logs or evidence.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTransport {
    Ntlm,
    Kerberos,
    Basic,
    Ssh,
}

/// Credential material for a single managed host, for exactly one polling
/// cycle. Implements [`ZeroizeOnDrop`] so the secret field is scrubbed from
/// memory the moment the credential goes out of scope, regardless of the
/// unwind path.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RemoteTarget {
    #[zeroize(skip)]
    pub host: String,
    #[zeroize(skip)]
    pub port: u16,
    #[zeroize(skip)]
    pub username: String,
    /// Password or key material; the only field actually zeroized.
    pub secret: String,
    #[zeroize(skip)]
    pub transport: RemoteTransport,
    #[zeroize(skip)]
    pub domain: Option<String>,
    #[zeroize(skip)]
    pub use_ssl: bool,
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("transport", &self.transport)
            .field("domain", &self.domain)
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

impl RemoteTarget {
    pub fn is_windows(&self) -> bool {
        matches!(self.transport, RemoteTransport::Ntlm | RemoteTransport::Kerberos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_the_secret() {
        let target = RemoteTarget {
            host: "10.0.0.5".into(),
            port: 5986,
            username: "admin".into(),
            secret: "super-secret-password".into(),
            transport: RemoteTransport::Ntlm,
            domain: None,
            use_ssl: true,
        };
        let rendered = format!("{target:?}");
        assert!(!rendered.contains("super-secret-password"));
        assert!(rendered.contains("REDACTED"));
    }
}
