use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::breaker::BreakerKind;
use crate::models::circuit::TripReason;

/// Why a signal was not released.
///
/// Every variant is a terminal, per-signal verdict returned by the stage that
/// detected it. None of these cross a stage boundary as a panic or an `Err`
/// bubbling out of the pipeline: the pipeline logs, counts and drops.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("malformed signal: {0}")]
    Schema(String),

    #[error("integrity signature missing or mismatched")]
    IntegrityMismatch,

    #[error("signal expired {overdue_secs:.3}s ago")]
    Expired { overdue_secs: f64 },

    #[error("stale indicator '{indicator}' (age {})", fmt_age(.age_secs))]
    StaleData {
        indicator: String,
        age_secs: Option<f64>,
    },

    #[error("upstream latency too high ({})", fmt_latency(.latency_secs))]
    HighLatency { latency_secs: Option<f64> },

    #[error("circuit tripped for scope '{scope}'")]
    CircuitTripped { scope: String },

    #[error("entropy {entropy:.3} above threshold {threshold:.3}")]
    HighEntropy { entropy: f64, threshold: f64 },

    #[error("confidence {confidence:.3} below threshold {threshold:.3}")]
    LowConfidence { confidence: f64, threshold: f64 },

    #[error("insufficient capital (balance {})", fmt_balance(.balance))]
    InsufficientCapital { balance: Option<Decimal> },

    #[error("{breaker} breaker tripped scope '{scope}' ({reason})")]
    BreakerTripped {
        breaker: BreakerKind,
        scope: String,
        reason: TripReason,
    },

    #[error("{breaker} breaker vetoed: {detail}")]
    BreakerVeto { breaker: BreakerKind, detail: String },

    #[error("module '{module}' is suspended")]
    ModuleSuspended { module: String },

    #[error("module '{module}' is throttled; dispatch skipped")]
    Throttled { module: String },
}

fn fmt_age(age: &Option<f64>) -> String {
    match age {
        Some(a) => format!("{a:.1}s"),
        None => "unknown".into(),
    }
}

fn fmt_latency(latency: &Option<f64>) -> String {
    match latency {
        Some(l) => format!("{:.1}ms", l * 1000.0),
        None => "unknown".into(),
    }
}

fn fmt_balance(balance: &Option<Decimal>) -> String {
    match balance {
        Some(b) => b.to_string(),
        None => "unknown".into(),
    }
}

impl RejectReason {
    pub fn code(&self) -> ReasonCode {
        match self {
            RejectReason::Schema(_) => ReasonCode::Schema,
            RejectReason::IntegrityMismatch => ReasonCode::IntegrityMismatch,
            RejectReason::Expired { .. } => ReasonCode::Expired,
            RejectReason::StaleData { .. } => ReasonCode::StaleData,
            RejectReason::HighLatency { .. } => ReasonCode::HighLatency,
            RejectReason::CircuitTripped { .. } => ReasonCode::CircuitTripped,
            RejectReason::HighEntropy { .. } => ReasonCode::HighEntropy,
            RejectReason::LowConfidence { .. } => ReasonCode::LowConfidence,
            RejectReason::InsufficientCapital { .. } => ReasonCode::InsufficientCapital,
            RejectReason::BreakerTripped { .. } => ReasonCode::BreakerTripped,
            RejectReason::BreakerVeto { .. } => ReasonCode::BreakerVeto,
            RejectReason::ModuleSuspended { .. } => ReasonCode::ModuleSuspended,
            RejectReason::Throttled { .. } => ReasonCode::Throttled,
        }
    }
}

/// Stable reason codes, used as log fields and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Schema,
    IntegrityMismatch,
    Expired,
    StaleData,
    HighLatency,
    CircuitTripped,
    HighEntropy,
    LowConfidence,
    InsufficientCapital,
    BreakerTripped,
    BreakerVeto,
    ModuleSuspended,
    Throttled,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Schema => "SCHEMA",
            ReasonCode::IntegrityMismatch => "INTEGRITY_MISMATCH",
            ReasonCode::Expired => "EXPIRED",
            ReasonCode::StaleData => "STALE_DATA",
            ReasonCode::HighLatency => "HIGH_LATENCY",
            ReasonCode::CircuitTripped => "CIRCUIT_TRIPPED",
            ReasonCode::HighEntropy => "HIGH_ENTROPY",
            ReasonCode::LowConfidence => "LOW_CONFIDENCE",
            ReasonCode::InsufficientCapital => "INSUFFICIENT_CAPITAL",
            ReasonCode::BreakerTripped => "BREAKER_TRIPPED",
            ReasonCode::BreakerVeto => "BREAKER_VETO",
            ReasonCode::ModuleSuspended => "MODULE_SUSPENDED",
            ReasonCode::Throttled => "THROTTLED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infrastructure failure talking to the shared state store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed value at '{key}': {detail}")]
    Malformed { key: String, detail: String },
}

impl StoreError {
    /// Only connectivity failures are worth retrying; a malformed record
    /// will still be malformed on the next read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
