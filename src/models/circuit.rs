use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the global scope. Reserved: no symbol may use it, in any case.
pub const GLOBAL_SCOPE: &str = "global";

/// What a circuit protects: the whole system or one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scope {
    Global,
    Symbol(String),
}

impl Scope {
    pub fn symbol(symbol: &str) -> Self {
        Scope::Symbol(symbol.to_string())
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }
}

/// Whether `symbol` would collide with the global scope's name and key.
pub fn is_reserved_symbol(symbol: &str) -> bool {
    symbol.trim().eq_ignore_ascii_case(GLOBAL_SCOPE)
}

impl From<String> for Scope {
    fn from(s: String) -> Self {
        if is_reserved_symbol(&s) {
            Scope::Global
        } else {
            Scope::Symbol(s)
        }
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str(GLOBAL_SCOPE),
            Scope::Symbol(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Normal,
    Tripped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripReason {
    DailyLoss,
    Volatility,
    ChaosScore,
    Manual,
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TripReason::DailyLoss => "DAILY_LOSS",
            TripReason::Volatility => "VOLATILITY",
            TripReason::ChaosScore => "CHAOS_SCORE",
            TripReason::Manual => "MANUAL",
        };
        f.write_str(s)
    }
}

/// Breaker state for one scope.
///
/// Invariant: the state is TRIPPED iff `tripped_at` is set and
/// `now < cooldown_expiry`. `status_at` derives the status from the
/// timestamps so a stale record read after its cooldown reads as NORMAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitState {
    pub scope: Scope,
    pub status: CircuitStatus,
    pub reason: Option<TripReason>,
    pub tripped_at: Option<DateTime<Utc>>,
    pub cooldown_expiry: Option<DateTime<Utc>>,
}

impl CircuitState {
    pub fn normal(scope: Scope) -> Self {
        Self {
            scope,
            status: CircuitStatus::Normal,
            reason: None,
            tripped_at: None,
            cooldown_expiry: None,
        }
    }

    pub fn tripped(scope: Scope, reason: TripReason, at: DateTime<Utc>, cooldown: Duration) -> Self {
        Self {
            scope,
            status: CircuitStatus::Tripped,
            reason: Some(reason),
            tripped_at: Some(at),
            cooldown_expiry: Some(at + cooldown),
        }
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> CircuitStatus {
        match (self.tripped_at, self.cooldown_expiry) {
            (Some(_), Some(expiry)) if now < expiry => CircuitStatus::Tripped,
            _ => CircuitStatus::Normal,
        }
    }

    pub fn is_tripped(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == CircuitStatus::Tripped
    }

    /// Collapse an expired trip back to NORMAL.
    pub fn settle(self, now: DateTime<Utc>) -> Self {
        if self.is_tripped(now) {
            self
        } else {
            Self::normal(self.scope)
        }
    }

    /// Remaining cooldown, zero when not tripped.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.cooldown_expiry {
            Some(expiry) if now < expiry => expiry - now,
            _ => Duration::zero(),
        }
    }
}
