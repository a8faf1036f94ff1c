//! [`Order`] — an inbound, signed instruction from the control plane (spec
//! §3).

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub action: String,
    pub params: Value,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Base64-encoded Ed25519 signature over the canonical encoding of the
    /// order with `signature` omitted.
    pub signature: String,
}

/// Default order TTL (spec §3): 15 minutes.
pub const DEFAULT_ORDER_TTL_SECONDS: i64 = 15 * 60;

impl Order {
    /// `true` iff `now <= expires_at` (spec §3 invariant; signature
    /// verification is a separate, crypto-dependent step performed by
    /// `haven-bastion`/`haven-control-plane`).
    pub fn is_within_ttl(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    /// The bytes an Ed25519 signature is computed over: every field except
    /// `signature`, canonically encoded.
    pub fn signing_payload(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.order_id,
            self.action,
            serde_json::to_string(&self.params).unwrap_or_default(),
            self.issued_at.to_rfc3339(),
            self.expires_at.to_rfc3339(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ttl_check_is_inclusive_of_now_equals_expiry() {
        let now = Utc::now();
        let order = Order {
            order_id: "o-1".into(),
            action: "noop".into(),
            params: Value::Null,
            issued_at: now - Duration::minutes(1),
            expires_at: now,
            signature: String::new(),
        };
        assert!(order.is_within_ttl(now));
        assert!(!order.is_within_ttl(now + Duration::seconds(1)));
    }
}
