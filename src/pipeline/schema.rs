use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::integrity;
use crate::config::PipelineConfig;
use crate::error::RejectReason;
use crate::models::circuit::is_reserved_symbol;
use crate::models::signal::{Side, Signal};

/// Turns an untyped payload into a typed [`Signal`], or rejects it.
pub struct SchemaValidator {
    default_ttl: f64,
    max_ttl: f64,
    signing_key: Option<String>,
}

impl SchemaValidator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            default_ttl: config.default_ttl_secs,
            max_ttl: config.max_ttl_secs,
            signing_key: config.signing_key.clone(),
        }
    }

    pub fn validate(&self, raw: &Value, received_at: DateTime<Utc>) -> Result<Signal, RejectReason> {
        let obj = raw
            .as_object()
            .ok_or_else(|| schema("payload is not a JSON object"))?;

        let symbol = required_str(obj, "symbol")?;
        if is_reserved_symbol(&symbol) {
            return Err(schema(&format!("symbol '{symbol}' is reserved")));
        }
        let side = required_str(obj, "side")?
            .parse::<Side>()
            .map_err(RejectReason::Schema)?;
        let strategy = required_str(obj, "strategy")?;

        let confidence = match obj.get("confidence") {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| schema("confidence is not representable"))?,
            Some(_) => return Err(schema("confidence must be a number")),
            None => return Err(schema("missing field 'confidence'")),
        };
        if !(0.0..=1.0).contains(&confidence) {
            return Err(schema(&format!("confidence {confidence} outside [0,1]")));
        }

        let inputs = match optional(obj, "inputs") {
            None => BTreeMap::new(),
            Some(Value::Object(map)) => {
                let mut inputs = BTreeMap::new();
                for (name, v) in map {
                    if !v.is_number() {
                        return Err(schema(&format!("input '{name}' must be a number")));
                    }
                    inputs.insert(name.clone(), v.clone());
                }
                inputs
            }
            Some(_) => return Err(schema("inputs must be an object")),
        };

        let timestamp = match optional(obj, "timestamp") {
            None => received_at,
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| schema(&format!("bad timestamp '{s}': {e}")))?,
            Some(_) => return Err(schema("timestamp must be an RFC 3339 string")),
        };

        let ttl = match optional(obj, "ttl") {
            None => self.default_ttl,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(t) if t.is_finite() && t > 0.0 && t <= self.max_ttl => t,
                Some(t) if t.is_finite() && t > self.max_ttl => {
                    return Err(schema(&format!("ttl {t}s above maximum {}s", self.max_ttl)))
                }
                _ => return Err(schema("ttl must be a positive number of seconds")),
            },
            Some(_) => return Err(schema("ttl must be a number")),
        };

        let id = match optional(obj, "id") {
            None => uuid::Uuid::new_v4().to_string(),
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(_) => return Err(schema("id must be a non-empty string")),
        };

        if let Some(key) = &self.signing_key {
            if !integrity::verify_payload(key, raw) {
                return Err(RejectReason::IntegrityMismatch);
            }
        }

        let mut signal = Signal::new(id, symbol, side, strategy, confidence, timestamp, ttl);
        signal.inputs = inputs;
        Ok(signal)
    }
}

fn schema(msg: &str) -> RejectReason {
    RejectReason::Schema(msg.to_string())
}

fn required_str(obj: &Map<String, Value>, field: &str) -> Result<String, RejectReason> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(schema(&format!("field '{field}' is empty"))),
        Some(_) => Err(schema(&format!("field '{field}' must be a string"))),
        None => Err(schema(&format!("missing field '{field}'"))),
    }
}

/// Optional field; explicit `null` counts as absent.
fn optional<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    obj.get(field).filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonCode;
    use serde_json::json;

    fn validator() -> SchemaValidator {
        SchemaValidator::new(&PipelineConfig::default())
    }

    #[test]
    fn test_minimal_signal_gets_defaults() {
        let now = Utc::now();
        let sig = validator()
            .validate(
                &json!({"symbol": "BTCUSDT", "side": "long", "strategy": "momentum", "confidence": 0.9}),
                now,
            )
            .unwrap();
        assert_eq!(sig.side, Side::Long);
        assert_eq!(sig.timestamp, now);
        assert_eq!(sig.ttl, 60.0);
        assert!(sig.inputs.is_empty());
        assert!(!sig.id.is_empty());
        assert!(sig.entropy().is_none());
    }

    #[test]
    fn test_full_signal() {
        let sig = validator()
            .validate(
                &json!({
                    "id": "abc",
                    "symbol": "ETHUSDT",
                    "side": "SELL",
                    "strategy": "scalper",
                    "confidence": 1,
                    "inputs": {"rsi": 71.2, "volume": 1000},
                    "timestamp": "2026-01-05T10:00:00Z",
                    "ttl": 15
                }),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(sig.id, "abc");
        assert_eq!(sig.confidence, 1.0);
        assert_eq!(sig.ttl, 15.0);
        assert_eq!(sig.referenced_indicators().collect::<Vec<_>>(), vec!["rsi", "volume"]);
        assert_eq!(sig.timestamp.to_rfc3339(), "2026-01-05T10:00:00+00:00");
    }

    #[test]
    fn test_rejects_malformed() {
        let v = validator();
        let now = Utc::now();
        let bad = [
            json!("not an object"),
            json!({"side": "buy", "strategy": "m", "confidence": 0.9}),
            json!({"symbol": "", "side": "buy", "strategy": "m", "confidence": 0.9}),
            json!({"symbol": "Global", "side": "buy", "strategy": "m", "confidence": 0.9}),
            json!({"symbol": "X", "side": "hold", "strategy": "m", "confidence": 0.9}),
            json!({"symbol": "X", "side": "buy", "strategy": 3, "confidence": 0.9}),
            json!({"symbol": "X", "side": "buy", "strategy": "m", "confidence": "0.9"}),
            json!({"symbol": "X", "side": "buy", "strategy": "m", "confidence": 1.2}),
            json!({"symbol": "X", "side": "buy", "strategy": "m", "confidence": 0.9, "ttl": -1}),
            json!({"symbol": "X", "side": "buy", "strategy": "m", "confidence": 0.9, "inputs": [1]}),
            json!({"symbol": "X", "side": "buy", "strategy": "m", "confidence": 0.9, "inputs": {"rsi": "high"}}),
            json!({"symbol": "X", "side": "buy", "strategy": "m", "confidence": 0.9, "timestamp": "yesterday"}),
        ];
        for payload in bad {
            let err = v.validate(&payload, now).unwrap_err();
            assert_eq!(err.code(), ReasonCode::Schema, "payload {payload}");
        }
    }

    #[test]
    fn test_ttl_above_maximum_is_schema_reject() {
        let v = validator();
        for ttl in [json!(1e300), json!(3_601)] {
            let payload = json!({"symbol": "X", "side": "buy", "strategy": "m", "confidence": 0.9, "ttl": ttl});
            let err = v.validate(&payload, Utc::now()).unwrap_err();
            assert_eq!(err.code(), ReasonCode::Schema, "ttl {ttl}");
        }
        let payload = json!({"symbol": "X", "side": "buy", "strategy": "m", "confidence": 0.9, "ttl": 3_600});
        assert_eq!(v.validate(&payload, Utc::now()).unwrap().ttl, 3_600.0);
    }

    #[test]
    fn test_signature_required_when_key_configured() {
        let config = PipelineConfig {
            signing_key: Some("secret".into()),
            ..PipelineConfig::default()
        };
        let v = SchemaValidator::new(&config);
        let mut payload =
            json!({"symbol": "BTCUSDT", "side": "buy", "strategy": "m", "confidence": 0.9});

        let err = v.validate(&payload, Utc::now()).unwrap_err();
        assert_eq!(err, RejectReason::IntegrityMismatch);

        payload["signature"] = json!(integrity::sign_payload("secret", &payload));
        assert!(v.validate(&payload, Utc::now()).is_ok());
    }
}
