//! Circuit breakers and the orchestrator that picks one per signal.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::circuit::{CircuitState, Scope, TripReason};

pub mod chain;
pub mod orchestrator;
pub mod priority;
pub mod rule;

pub use chain::ChainBreaker;
pub use orchestrator::BreakerOrchestrator;
pub use priority::PriorityScore;
pub use rule::RuleBreaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerKind {
    RuleBased,
    ChainBased,
}

impl fmt::Display for BreakerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerKind::RuleBased => f.write_str("rule-based"),
            BreakerKind::ChainBased => f.write_str("chain-based"),
        }
    }
}

/// Outcome of one breaker evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allow,
    /// Block this signal without touching any circuit.
    Veto { detail: String },
    /// Block this signal and trip `scope`.
    Trip {
        scope: Scope,
        reason: TripReason,
        detail: String,
    },
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Broadcast on `control.circuit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CircuitEvent {
    Tripped { state: CircuitState },
    Reset { scope: Scope },
}

impl CircuitEvent {
    pub fn scope(&self) -> &Scope {
        match self {
            CircuitEvent::Tripped { state } => &state.scope,
            CircuitEvent::Reset { scope } => scope,
        }
    }
}
