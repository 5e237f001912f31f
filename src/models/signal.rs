use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
    Long,
    Short,
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            "LONG" => Ok(Side::Long),
            "SHORT" => Ok(Side::Short),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
            Side::Long => "LONG",
            Side::Short => "SHORT",
        };
        f.write_str(s)
    }
}

/// A proposed trade travelling through the gate.
///
/// The producer-supplied fields are public. Fields derived by pipeline
/// stages are write-once: each has exactly one owning stage, and a second
/// write is refused so that no stage can overwrite another's annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub strategy: String,
    pub confidence: f64,
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    /// Validity window in seconds.
    pub ttl: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    entropy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    leverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    risk_exceeded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    approved: Option<bool>,
}

impl Signal {
    pub fn new(
        id: String,
        symbol: String,
        side: Side,
        strategy: String,
        confidence: f64,
        timestamp: DateTime<Utc>,
        ttl: f64,
    ) -> Self {
        Self {
            id,
            symbol,
            side,
            strategy,
            confidence,
            inputs: BTreeMap::new(),
            timestamp,
            ttl,
            entropy: None,
            leverage: None,
            risk_exceeded: None,
            size_factor: None,
            approved: None,
        }
    }

    /// Saturates at the end of representable time instead of overflowing.
    pub fn expires_at(&self) -> DateTime<Utc> {
        Duration::try_milliseconds((self.ttl * 1000.0) as i64)
            .and_then(|ttl| self.timestamp.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Seconds past expiry (negative while still live).
    pub fn overdue_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.expires_at()).num_milliseconds() as f64 / 1000.0
    }

    /// Indicator names this signal depends on.
    pub fn referenced_indicators(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    pub fn entropy(&self) -> Option<f64> {
        self.entropy
    }

    pub fn leverage(&self) -> Option<f64> {
        self.leverage
    }

    pub fn risk_exceeded(&self) -> bool {
        self.risk_exceeded.unwrap_or(false)
    }

    pub fn size_factor(&self) -> Option<f64> {
        self.size_factor
    }

    pub fn is_approved(&self) -> bool {
        self.approved.unwrap_or(false)
    }

    pub(crate) fn annotate_entropy(&mut self, entropy: f64) -> bool {
        write_once(&mut self.entropy, entropy, "entropy", &self.id)
    }

    pub(crate) fn annotate_leverage(&mut self, leverage: f64, risk_exceeded: bool) -> bool {
        let id = self.id.clone();
        write_once(&mut self.leverage, leverage, "leverage", &id)
            && write_once(&mut self.risk_exceeded, risk_exceeded, "risk_exceeded", &id)
    }

    pub(crate) fn annotate_size_factor(&mut self, factor: f64) -> bool {
        write_once(&mut self.size_factor, factor, "size_factor", &self.id)
    }

    pub(crate) fn mark_approved(&mut self) -> bool {
        write_once(&mut self.approved, true, "approved", &self.id)
    }

    /// JSON wire form: producer fields plus any annotations written so far.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn write_once<T: Copy>(slot: &mut Option<T>, value: T, field: &str, id: &str) -> bool {
    if slot.is_some() {
        warn!("Signal {id}: refusing to overwrite annotation '{field}'");
        return false;
    }
    *slot = Some(value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Signal {
        Signal::new(
            "sig-1".into(),
            "BTCUSDT".into(),
            Side::Buy,
            "momentum".into(),
            0.9,
            Utc::now(),
            30.0,
        )
    }

    #[test]
    fn test_side_parse_case_insensitive() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("Short".parse::<Side>().unwrap(), Side::Short);
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn test_annotations_are_write_once() {
        let mut s = sample();
        assert!(s.annotate_entropy(0.2));
        assert!(!s.annotate_entropy(0.9));
        assert_eq!(s.entropy(), Some(0.2));

        assert!(s.annotate_leverage(3.2, false));
        assert!(!s.annotate_leverage(5.0, true));
        assert_eq!(s.leverage(), Some(3.2));
        assert!(!s.risk_exceeded());
    }

    #[test]
    fn test_expiry() {
        let s = sample();
        assert!(!s.is_expired(s.timestamp + Duration::seconds(30)));
        assert!(s.is_expired(s.timestamp + Duration::seconds(31)));
        assert!((s.overdue_secs(s.timestamp + Duration::seconds(35)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_huge_ttl_saturates_instead_of_overflowing() {
        let mut s = sample();
        s.ttl = 1e300;
        assert_eq!(s.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(!s.is_expired(Utc::now()));
    }

    #[test]
    fn test_wire_form_appends_annotations() {
        let mut s = sample();
        let before = s.to_wire();
        assert!(before.get("entropy").is_none());
        assert!(before.get("leverage").is_none());

        s.annotate_entropy(0.1);
        s.annotate_leverage(2.0, false);
        s.mark_approved();
        let after = s.to_wire();
        for field in ["symbol", "side", "strategy", "confidence", "inputs", "timestamp", "ttl"] {
            assert_eq!(before.get(field), after.get(field), "field {field} changed");
        }
        assert_eq!(after["side"], "BUY");
        assert_eq!(after["approved"], true);
        assert_eq!(after["leverage"], 2.0);
    }
}
