//! Producer signatures over the signal wire fields.
//!
//! The MAC covers the canonical JSON (sorted keys, no whitespace) of the
//! wire fields present in the payload. Annotations and the signature itself
//! are excluded.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNED_FIELDS: [&str; 7] = [
    "symbol",
    "side",
    "strategy",
    "confidence",
    "inputs",
    "timestamp",
    "ttl",
];

pub const SIGNATURE_FIELD: &str = "signature";

/// Canonical bytes the signature is computed over.
pub fn canonical_payload(raw: &Value) -> String {
    let mut signed = Map::new();
    if let Some(obj) = raw.as_object() {
        for field in SIGNED_FIELDS {
            if let Some(v) = obj.get(field) {
                signed.insert(field.to_string(), v.clone());
            }
        }
    }
    // serde_json's default map is ordered, so this serialises with sorted keys.
    Value::Object(signed).to_string()
}

fn mac_for(key: &str, raw: &Value) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
    mac.update(canonical_payload(raw).as_bytes());
    Some(mac)
}

/// Lowercase hex HMAC-SHA256 of the payload.
pub fn sign_payload(key: &str, raw: &Value) -> String {
    mac_for(key, raw)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Constant-time check of the payload's `signature` field.
pub fn verify_payload(key: &str, raw: &Value) -> bool {
    let Some(sig_hex) = raw.get(SIGNATURE_FIELD).and_then(Value::as_str) else {
        return false;
    };
    let Ok(sig) = hex::decode(sig_hex.trim()) else {
        return false;
    };
    match mac_for(key, raw) {
        Some(mac) => mac.verify_slice(&sig).is_ok(),
        None => false,
    }
}
