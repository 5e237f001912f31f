use crate::config::RiskConfig;
use crate::error::RejectReason;
use crate::models::risk::{RiskProfile, RiskSnapshot};
use crate::models::signal::Signal;
use crate::store::StoreClient;
use crate::telemetry::metrics::Metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Capital gate and leverage sizing.
///
/// High risk never rejects a signal; it clamps leverage to 1. Only a balance
/// that cannot cover trading at all rejects.
pub struct RiskManager {
    config: RiskConfig,
    store: Arc<StoreClient>,
    metrics: Arc<Metrics>,
}

/// Leverage for a signal, and whether the hard clamp was applied.
pub fn risk_adjusted_leverage(
    config: &RiskConfig,
    confidence: f64,
    snapshot: &RiskSnapshot,
) -> (f64, bool) {
    let (Some(exposure), Some(market_vol), Some(asset_vol)) = (
        snapshot.risk_exposure,
        snapshot.market_volatility,
        snapshot.asset_volatility,
    ) else {
        // Can't size what we can't see.
        return (1.0, true);
    };

    if exposure > config.max_daily_risk || market_vol > config.max_volatility_for_full_leverage {
        return (1.0, true);
    }

    let raw = config.max_leverage
        * confidence
        * (1.0 - exposure)
        * (1.0 - market_vol)
        * (1.0 - asset_vol);
    if !raw.is_finite() {
        return (1.0, true);
    }
    (raw.clamp(1.0, config.max_leverage), false)
}

impl RiskManager {
    pub fn new(config: RiskConfig, store: Arc<StoreClient>, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            store,
            metrics,
        }
    }

    /// Pure decision over an already-fetched snapshot.
    pub fn assess(
        &self,
        signal: &Signal,
        snapshot: &RiskSnapshot,
        now: DateTime<Utc>,
    ) -> Result<RiskProfile, RejectReason> {
        let balance = match snapshot.account_balance {
            Some(b) if b > self.config.min_balance => b,
            other => return Err(RejectReason::InsufficientCapital { balance: other }),
        };

        let (leverage, risk_exceeded) =
            risk_adjusted_leverage(&self.config, signal.confidence, snapshot);

        Ok(RiskProfile {
            symbol: signal.symbol.clone(),
            daily_pnl: snapshot.daily_pnl,
            risk_exposure: snapshot.risk_exposure,
            market_volatility: snapshot.market_volatility,
            asset_volatility: snapshot.asset_volatility,
            account_balance: balance,
            max_leverage: self.config.max_leverage,
            leverage,
            risk_exceeded,
            computed_at: now,
        })
    }

    /// Fetch risk data, annotate the signal with leverage and publish the
    /// resulting profile.
    pub async fn evaluate(&self, signal: &mut Signal) -> Result<RiskProfile, RejectReason> {
        let snapshot = self.store.risk_snapshot(&signal.symbol).await;
        let profile = self.assess(signal, &snapshot, self.store.now())?;

        if profile.risk_exceeded {
            self.metrics.record_risk_exceeded();
            warn!(
                symbol = %signal.symbol,
                strategy = %signal.strategy,
                "RISK: exposure={:?} market_vol={:?} asset_vol={:?} — leverage clamped to 1",
                snapshot.risk_exposure,
                snapshot.market_volatility,
                snapshot.asset_volatility,
            );
        } else {
            debug!(
                symbol = %signal.symbol,
                "RISK: leverage {:.3} (conf={:.2})",
                profile.leverage,
                signal.confidence
            );
        }

        signal.annotate_leverage(profile.leverage, profile.risk_exceeded);

        let ttl = Duration::from_secs(self.config.profile_ttl_secs);
        if let Err(e) = self.store.put_risk_profile(&profile, ttl).await {
            warn!("Risk profile for {} not published: {e}", signal.symbol);
        }
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::StoreConfig;
    use crate::models::signal::Side;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn snapshot(exposure: f64, market: f64, asset: f64) -> RiskSnapshot {
        RiskSnapshot {
            risk_exposure: Some(exposure),
            market_volatility: Some(market),
            asset_volatility: Some(asset),
            account_balance: Some(dec!(10000)),
            daily_pnl: Some(dec!(-12.5)),
        }
    }

    fn manager() -> RiskManager {
        let clock = Arc::new(SystemClock);
        let metrics = Arc::new(Metrics::new());
        let store = Arc::new(StoreClient::new(
            Arc::new(MemoryStore::new(clock.clone())),
            clock,
            &StoreConfig::default(),
            metrics.clone(),
        ));
        RiskManager::new(RiskConfig::default(), store, metrics)
    }

    fn signal(confidence: f64) -> Signal {
        Signal::new("s".into(), "BTCUSDT".into(), Side::Buy, "m".into(), confidence, Utc::now(), 30.0)
    }

    #[test]
    fn test_leverage_formula() {
        let cfg = RiskConfig::default();
        let (lev, exceeded) = risk_adjusted_leverage(&cfg, 0.9, &snapshot(0.005, 0.02, 0.02));
        let expected = 5.0 * 0.9 * (1.0 - 0.005) * (1.0 - 0.02) * (1.0 - 0.02);
        assert!((lev - expected).abs() < 1e-12);
        assert!(!exceeded);
    }

    #[test]
    fn test_hard_clamp_on_exposure_or_volatility() {
        let cfg = RiskConfig::default();
        assert_eq!(risk_adjusted_leverage(&cfg, 0.95, &snapshot(0.02, 0.01, 0.0)), (1.0, true));
        assert_eq!(risk_adjusted_leverage(&cfg, 0.95, &snapshot(0.0, 0.11, 0.0)), (1.0, true));
        // Boundaries are strict.
        assert!(!risk_adjusted_leverage(&cfg, 0.95, &snapshot(0.01, 0.10, 0.0)).1);
    }

    #[test]
    fn test_leverage_stays_in_bounds() {
        let cfg = RiskConfig::default();
        for conf in [0.0, 0.1, 0.5, 0.85, 1.0] {
            for asset in [0.0, 0.5, 0.99, 1.5] {
                let (lev, _) = risk_adjusted_leverage(&cfg, conf, &snapshot(0.0, 0.0, asset));
                assert!((1.0..=5.0).contains(&lev), "conf={conf} asset={asset} lev={lev}");
            }
        }
    }

    #[test]
    fn test_unknown_risk_data_means_leverage_one() {
        let cfg = RiskConfig::default();
        let mut s = snapshot(0.0, 0.0, 0.0);
        s.asset_volatility = None;
        assert_eq!(risk_adjusted_leverage(&cfg, 1.0, &s), (1.0, true));
    }

    #[test]
    fn test_balance_gate() {
        let rm = manager();
        let now = Utc::now();
        let sig = signal(0.9);

        let mut s = snapshot(0.0, 0.0, 0.0);
        s.account_balance = Some(dec!(0));
        assert!(matches!(
            rm.assess(&sig, &s, now),
            Err(RejectReason::InsufficientCapital { balance: Some(_) })
        ));

        s.account_balance = None;
        assert_eq!(
            rm.assess(&sig, &s, now).unwrap_err(),
            RejectReason::InsufficientCapital { balance: None }
        );

        // High risk alone never rejects.
        let profile = rm.assess(&sig, &snapshot(0.5, 0.5, 0.5), now).unwrap();
        assert_eq!(profile.leverage, 1.0);
        assert!(profile.risk_exceeded);
    }
}
