//! The single canonical JSON encoding every content hash and signature is
//! computed over (spec §4.7, §9 "Evidence determinism"). No second ad hoc
//! serializer is allowed to exist anywhere in this workspace — the signer,
//! the hash-chain verifier, and the golden-file tests all call through
//! here.
//!
//! Encoding rules: object keys sorted lexically at every nesting level, no
//! insignificant whitespace, no trailing zeros beyond what `f64` needs,
//! UTF-8 strings escaped per standard JSON rules. This is independent of
//! whichever `serde_json::Map` implementation is linked in, so the
//! encoding can never silently drift if that choice changes.

use serde::Serialize;
use serde_json::Value as JsonValue;

/// Serializes `value` to its canonical byte representation.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_value(value)?;
    Ok(render(&json).into_bytes())
}

fn render(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => serde_json::to_string(s).expect("string always encodes"),
        JsonValue::Array(items) => {
            let parts: Vec<String> = items.iter().map(render).collect();
            format!("[{}]", parts.join(","))
        }
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).expect("string always encodes"),
                        render(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

/// Serializes `value` with the `signature` field (and, if present,
/// `worm_uri`, which is populated only after signing) stripped out first —
/// the exact payload [`crate::hashing::content_hash`] must hash.
pub fn canonical_bytes_excluding<T: Serialize>(
    value: &T,
    excluded_fields: &[&str],
) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_value(value)?;
    if let JsonValue::Object(map) = &mut json {
        for field in excluded_fields {
            map.remove(*field);
        }
    }
    Ok(render(&json).into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        zeta: i32,
        alpha: &'static str,
        nested: Nested,
        signature: &'static str,
    }

    #[derive(Serialize)]
    struct Nested {
        b: bool,
        a: i32,
    }

    #[test]
    fn keys_are_sorted_at_every_level() {
        let sample = Sample {
            zeta: 1,
            alpha: "x",
            nested: Nested { b: true, a: 2 },
            signature: "should-be-excluded",
        };
        let bytes = canonical_bytes_excluding(&sample, &["signature"]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"alpha":"x","nested":{"a":2,"b":true},"zeta":1}"#);
    }

    #[test]
    fn identical_structures_produce_identical_bytes() {
        let a = canonical_bytes(&serde_json::json!({"b": 1, "a": 2})).unwrap();
        let b = canonical_bytes(&serde_json::json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a, b);
    }
}
