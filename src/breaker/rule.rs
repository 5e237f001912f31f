use crate::config::BreakerConfig;
use crate::models::circuit::{Scope, TripReason};
use crate::models::signal::Signal;
use crate::models::state::GlobalState;

use super::Verdict;

/// Hard thresholds on daily loss and the signal's own volatility.
pub struct RuleBreaker {
    max_daily_loss: f64,
    max_volatility: f64,
}

impl RuleBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            max_daily_loss: config.max_daily_loss,
            max_volatility: config.max_volatility,
        }
    }

    pub fn evaluate(&self, signal: &Signal, state: &GlobalState) -> Verdict {
        let Some(daily_loss) = state.daily_loss else {
            return Verdict::Veto {
                detail: "daily loss unknown".into(),
            };
        };
        if daily_loss > self.max_daily_loss {
            return Verdict::Trip {
                scope: Scope::Global,
                reason: TripReason::DailyLoss,
                detail: format!("daily loss {daily_loss:.4} > {:.4}", self.max_daily_loss),
            };
        }

        let Some(volatility) = state.symbol_volatility else {
            return Verdict::Veto {
                detail: format!("volatility for {} unknown", signal.symbol),
            };
        };
        if volatility > self.max_volatility {
            return Verdict::Trip {
                scope: Scope::symbol(&signal.symbol),
                reason: TripReason::Volatility,
                detail: format!(
                    "{} volatility {volatility:.4} > {:.4}",
                    signal.symbol, self.max_volatility
                ),
            };
        }

        Verdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::signal::Side;
    use chrono::Utc;

    fn signal() -> Signal {
        Signal::new("s".into(), "SOLUSDT".into(), Side::Buy, "m".into(), 0.9, Utc::now(), 30.0)
    }

    fn state(loss: Option<f64>, vol: Option<f64>) -> GlobalState {
        GlobalState {
            daily_loss: loss,
            symbol_volatility: vol,
            ..GlobalState::unknown()
        }
    }

    #[test]
    fn test_allow_within_limits() {
        let b = RuleBreaker::new(&BreakerConfig::default());
        assert!(b.evaluate(&signal(), &state(Some(0.01), Some(0.05))).is_allow());
        assert!(b.evaluate(&signal(), &state(Some(0.05), Some(0.10))).is_allow());
    }

    #[test]
    fn test_daily_loss_trips_global() {
        let b = RuleBreaker::new(&BreakerConfig::default());
        match b.evaluate(&signal(), &state(Some(0.06), Some(0.5))) {
            Verdict::Trip { scope, reason, .. } => {
                assert_eq!(scope, Scope::Global);
                assert_eq!(reason, TripReason::DailyLoss);
            }
            other => panic!("expected trip, got {other:?}"),
        }
    }

    #[test]
    fn test_volatility_trips_symbol() {
        let b = RuleBreaker::new(&BreakerConfig::default());
        match b.evaluate(&signal(), &state(Some(0.0), Some(0.2))) {
            Verdict::Trip { scope, reason, .. } => {
                assert_eq!(scope, Scope::symbol("SOLUSDT"));
                assert_eq!(reason, TripReason::Volatility);
            }
            other => panic!("expected trip, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_inputs_veto() {
        let b = RuleBreaker::new(&BreakerConfig::default());
        assert!(matches!(b.evaluate(&signal(), &state(None, Some(0.01))), Verdict::Veto { .. }));
        assert!(matches!(b.evaluate(&signal(), &state(Some(0.0), None)), Verdict::Veto { .. }));
    }
}
