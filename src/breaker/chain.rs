use crate::config::BreakerConfig;
use crate::models::circuit::{Scope, TripReason};
use crate::models::signal::Signal;
use crate::models::state::GlobalState;

use super::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkSource {
    ChaosLevel,
    MarketVolatility,
    DailyLoss,
}

impl LinkSource {
    fn read(&self, state: &GlobalState) -> Option<f64> {
        match self {
            LinkSource::ChaosLevel => state.chaos_level,
            LinkSource::MarketVolatility => state.market_volatility,
            LinkSource::DailyLoss => state.daily_loss,
        }
    }
}

#[derive(Debug, Clone)]
struct Link {
    source: LinkSource,
    ceiling: f64,
    weight: f64,
}

/// Ordered severity links. A breached link amplifies everything after it,
/// so stress in one place makes the chain more sensitive downstream.
pub struct ChainBreaker {
    links: Vec<Link>,
    cascade_factor: f64,
    severity_ceiling: f64,
}

impl ChainBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        let links = vec![
            Link {
                source: LinkSource::ChaosLevel,
                ceiling: config.max_chaos_level,
                weight: config.chaos_weight,
            },
            Link {
                source: LinkSource::MarketVolatility,
                ceiling: config.max_volatility,
                weight: config.volatility_weight,
            },
            Link {
                source: LinkSource::DailyLoss,
                ceiling: config.max_daily_loss,
                weight: config.drawdown_weight,
            },
        ];
        Self {
            links,
            cascade_factor: config.cascade_factor,
            severity_ceiling: config.severity_ceiling,
        }
    }

    /// Accumulated severity; `None` when the chaos level is unknown.
    pub fn severity(&self, state: &GlobalState) -> Option<f64> {
        state.chaos_level?;

        let mut total = 0.0;
        let mut breached = false;
        for link in &self.links {
            let Some(value) = link.source.read(state) else {
                continue;
            };
            let value = value.max(0.0);
            let mut contribution = link.weight * value / link.ceiling;
            if breached {
                contribution *= self.cascade_factor;
            }
            total += contribution;
            if value > link.ceiling {
                breached = true;
            }
        }
        Some(total)
    }

    pub fn evaluate(&self, _signal: &Signal, state: &GlobalState) -> Verdict {
        let Some(severity) = self.severity(state) else {
            return Verdict::Veto {
                detail: "chaos level unknown".into(),
            };
        };
        if severity > self.severity_ceiling {
            return Verdict::Trip {
                scope: Scope::Global,
                reason: TripReason::ChaosScore,
                detail: format!(
                    "chain severity {severity:.3} > {:.3}",
                    self.severity_ceiling
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

    fn state(chaos: Option<f64>, vol: Option<f64>, loss: Option<f64>) -> GlobalState {
        GlobalState {
            chaos_level: chaos,
            market_volatility: vol,
            daily_loss: loss,
            ..GlobalState::unknown()
        }
    }

    fn signal() -> Signal {
        Signal::new("s".into(), "BTCUSDT".into(), Side::Short, "m".into(), 0.6, Utc::now(), 30.0)
    }

    #[test]
    fn test_calm_chain_allows() {
        let b = ChainBreaker::new(&BreakerConfig::default());
        // 0.2/0.5 + 0.5*0.02/0.1 + 0.5*0.01/0.05 = 0.4 + 0.1 + 0.1
        let s = state(Some(0.2), Some(0.02), Some(0.01));
        assert!((b.severity(&s).unwrap() - 0.6).abs() < 1e-9);
        assert!(b.evaluate(&signal(), &s).is_allow());
    }

    #[test]
    fn test_high_chaos_trips_global() {
        let b = ChainBreaker::new(&BreakerConfig::default());
        let v = b.evaluate(&signal(), &state(Some(0.9), Some(0.0), Some(0.0)));
        assert!(matches!(
            v,
            Verdict::Trip {
                scope: Scope::Global,
                reason: TripReason::ChaosScore,
                ..
            }
        ));
    }

    #[test]
    fn test_breach_cascades_downstream() {
        let b = ChainBreaker::new(&BreakerConfig::default());
        // Chaos 0.1 (0.2), vol 0.12 breaches (0.6), loss 0.04 amplified: 0.4 * 1.5 = 0.6
        let s = state(Some(0.1), Some(0.12), Some(0.04));
        assert!((b.severity(&s).unwrap() - 1.4).abs() < 1e-9);
        assert!(matches!(b.evaluate(&signal(), &s), Verdict::Trip { .. }));

        // Same figures without the breach stay under the ceiling.
        let s = state(Some(0.1), Some(0.08), Some(0.03));
        assert!((b.severity(&s).unwrap() - 0.9).abs() < 1e-9);
        assert!(b.evaluate(&signal(), &s).is_allow());
    }

    #[test]
    fn test_unknown_chaos_vetoes_and_other_gaps_contribute_nothing() {
        let b = ChainBreaker::new(&BreakerConfig::default());
        assert!(matches!(
            b.evaluate(&signal(), &state(None, Some(0.0), Some(0.0))),
            Verdict::Veto { .. }
        ));
        assert_eq!(b.severity(&state(Some(0.25), None, None)), Some(0.5));
    }
}
