use crate::config::BreakerConfig;
use crate::models::state::MorphicMode;

use super::BreakerKind;

/// Per-signal score that picks the breaker strategy. Stateless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityScore(i32);

impl PriorityScore {
    /// An unknown chaos level is scored as if it were above the threshold.
    pub fn compute(
        confidence: f64,
        mode: MorphicMode,
        chaos_level: Option<f64>,
        config: &BreakerConfig,
    ) -> Self {
        let mut score = 0;
        if confidence > config.priority_confidence_cutoff {
            score += 2;
        }
        if mode == MorphicMode::AlphaPush {
            score += 1;
        }
        let chaotic = chaos_level.map_or(true, |c| c > config.chaos_level_threshold);
        if chaotic {
            score -= 3;
        }
        Self(score)
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    pub fn select(&self) -> BreakerKind {
        if self.0 >= 1 {
            BreakerKind::RuleBased
        } else {
            BreakerKind::ChainBased
        }
    }
}
