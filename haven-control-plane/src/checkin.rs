//! `POST /api/appliances/checkin` — the cycle heartbeat (spec §4.11, §6).
//! Returns the orders and ephemeral credentials for this cycle plus a
//! config hash; credentials are the *only* source of remote-host secrets
//! and are held in memory for exactly one cycle.

use chrono::{DateTime, Utc};
use haven_types::{Order, RemoteTarget, RemoteTransport};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct CheckinState {
    pub site_id: String,
    pub host_id: String,
    #[serde(default)]
    pub current_config_hash: Option<String>,
    pub cycle_at: DateTime<Utc>,
}

/// Wire shape of a credential: identical fields to [`RemoteTarget`], but
/// `RemoteTarget` deliberately carries no `Deserialize` impl (spec §3
/// "never persisted to disk and never serialized into logs or evidence") —
/// this is the one place the wire bytes are decoded, immediately converted,
/// and then dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialWire {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub transport: RemoteTransport,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub use_ssl: bool,
}

impl CredentialWire {
    pub fn into_remote_target(self) -> RemoteTarget {
        RemoteTarget {
            host: self.host,
            port: self.port,
            username: self.username,
            secret: self.secret,
            transport: self.transport,
            domain: self.domain,
            use_ssl: self.use_ssl,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckinResponseWire {
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub credentials: Vec<CredentialWire>,
    #[serde(default)]
    pub config_hash: String,
}

/// A check-in response with every order's signature and TTL already
/// verified. Orders that fail either check are dropped and logged —
/// spec §3 treats an order the agent cannot authenticate as not having
/// arrived at all.
#[derive(Debug)]
pub struct CheckinResponse {
    pub orders: Vec<Order>,
    pub credentials: Vec<RemoteTarget>,
    pub config_hash: String,
}

/// Verifies every order's Ed25519 signature against `verify_key` and TTL
/// against `now`, dropping any that fail either check.
pub fn verify_orders(wire: CheckinResponseWire, verify_key: &[u8], now: DateTime<Utc>) -> CheckinResponse {
    let mut orders = Vec::with_capacity(wire.orders.len());
    for order in wire.orders {
        if !order.is_within_ttl(now) {
            tracing::warn!(order_id = %order.order_id, "dropping expired order from checkin response");
            continue;
        }
        let payload = order.signing_payload();
        if !haven_bastion::verify_signature(verify_key, payload.as_bytes(), &order.signature) {
            tracing::warn!(order_id = %order.order_id, "dropping order with invalid signature");
            continue;
        }
        orders.push(order);
    }

    CheckinResponse {
        orders,
        credentials: wire
            .credentials
            .into_iter()
            .map(CredentialWire::into_remote_target)
            .collect(),
        config_hash: wire.config_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use haven_bastion::Signer;
    use haven_types::Value;

    fn signed_order(signer: &Signer, expires_at: DateTime<Utc>) -> Order {
        let mut order = Order {
            order_id: "o-1".into(),
            action: "restart_service".into(),
            params: Value::Null,
            issued_at: Utc::now(),
            expires_at,
            signature: String::new(),
        };
        order.signature = signer.sign(order.signing_payload().as_bytes());
        order
    }

    #[test]
    fn valid_signature_and_ttl_survives_verification() {
        let (signer, _pkcs8) = Signer::generate().unwrap();
        let order = signed_order(&signer, Utc::now() + Duration::minutes(5));
        let wire = CheckinResponseWire {
            orders: vec![order],
            credentials: vec![],
            config_hash: "abc".into(),
        };
        let verified = verify_orders(wire, &signer.public_key_bytes(), Utc::now());
        assert_eq!(verified.orders.len(), 1);
    }

    #[test]
    fn expired_order_is_dropped() {
        let (signer, _pkcs8) = Signer::generate().unwrap();
        let order = signed_order(&signer, Utc::now() - Duration::minutes(1));
        let wire = CheckinResponseWire {
            orders: vec![order],
            credentials: vec![],
            config_hash: "abc".into(),
        };
        let verified = verify_orders(wire, &signer.public_key_bytes(), Utc::now());
        assert!(verified.orders.is_empty());
    }

    #[test]
    fn tampered_signature_is_dropped() {
        let (signer, _pkcs8) = Signer::generate().unwrap();
        let other_signer = Signer::generate();
        let order = signed_order(&other_signer, Utc::now() + Duration::minutes(5));
        let wire = CheckinResponseWire {
            orders: vec![order],
            credentials: vec![],
            config_hash: "abc".into(),
        };
        let verified = verify_orders(wire, &signer.public_key_bytes(), Utc::now());
        assert!(verified.orders.is_empty());
    }
}
