use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::{topics, SignalBus};
use crate::config::DispatchConfig;
use crate::error::RejectReason;
use crate::models::module::ModuleStatus;
use crate::models::signal::Signal;
use crate::store::StoreClient;
use crate::telemetry::metrics::Metrics;

/// Last gate before execution: consults the producing module's status and
/// releases the signal on `signal.approved`.
pub struct Dispatcher {
    config: DispatchConfig,
    store: Arc<StoreClient>,
    bus: SignalBus,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        store: Arc<StoreClient>,
        bus: SignalBus,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            store,
            bus,
            metrics,
        }
    }

    /// Status of the module that produced `signal`. Missing or unreadable
    /// status is SUSPEND.
    pub async fn module_status(&self, signal: &Signal) -> ModuleStatus {
        match self.store.module_status(&signal.strategy).await {
            Ok(Some(status)) => status,
            Ok(None) => ModuleStatus::Suspend,
            Err(e) => {
                warn!("Module status for '{}' unreadable: {e}", signal.strategy);
                ModuleStatus::Suspend
            }
        }
    }

    /// Apply the module status. THROTTLE admits with reduced probability and
    /// size; SUSPEND never admits.
    pub async fn admit(&self, signal: &mut Signal) -> Result<ModuleStatus, RejectReason> {
        let status = self.module_status(signal).await;
        match status {
            ModuleStatus::Run => Ok(status),
            ModuleStatus::Throttle => {
                let p = self.config.throttle_probability.clamp(0.0, 1.0);
                if rand::thread_rng().gen_bool(p) {
                    signal.annotate_size_factor(self.config.throttle_size_factor);
                    Ok(status)
                } else {
                    Err(RejectReason::Throttled {
                        module: signal.strategy.clone(),
                    })
                }
            }
            ModuleStatus::Suspend => Err(RejectReason::ModuleSuspended {
                module: signal.strategy.clone(),
            }),
        }
    }

    /// Seal and publish. The returned value is the only copy left.
    pub fn dispatch(&self, mut signal: Signal) -> Arc<Signal> {
        signal.mark_approved();
        let signal = Arc::new(signal);
        let receivers = self
            .bus
            .publish(topics::SIGNAL_APPROVED, signal.to_wire());
        self.metrics.record_dispatch();
        info!(
            symbol = %signal.symbol,
            strategy = %signal.strategy,
            "DISPATCH {} {} conf={:.2} lev={:.2} size={:.2} → {receivers} consumer(s)",
            signal.side,
            signal.id,
            signal.confidence,
            signal.leverage().unwrap_or(1.0),
            signal.size_factor().unwrap_or(1.0),
        );
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::StoreConfig;
    use crate::models::module::ModuleStatusRecord;
    use crate::models::signal::Side;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn setup(throttle_probability: f64) -> (Dispatcher, Arc<StoreClient>, SignalBus) {
        let clock = Arc::new(SystemClock);
        let metrics = Arc::new(Metrics::new());
        let store = Arc::new(StoreClient::new(
            Arc::new(MemoryStore::new(clock.clone())),
            clock,
            &StoreConfig::default(),
            metrics.clone(),
        ));
        let bus = SignalBus::new(16);
        let config = DispatchConfig {
            throttle_probability,
            ..DispatchConfig::default()
        };
        (
            Dispatcher::new(config, store.clone(), bus.clone(), metrics),
            store,
            bus,
        )
    }

    async fn set_status(store: &StoreClient, status: ModuleStatus) {
        let rec = ModuleStatusRecord {
            module: "momentum".into(),
            status,
        };
        store
            .put_module_status(&rec, std::time::Duration::from_secs(60))
            .await
            .unwrap();
    }

    fn signal() -> Signal {
        Signal::new("s1".into(), "BTCUSDT".into(), Side::Buy, "momentum".into(), 0.9, Utc::now(), 30.0)
    }

    #[tokio::test]
    async fn test_missing_status_is_suspend() {
        let (d, _, _) = setup(1.0);
        let err = d.admit(&mut signal()).await.unwrap_err();
        assert_eq!(
            err,
            RejectReason::ModuleSuspended {
                module: "momentum".into()
            }
        );
    }

    #[tokio::test]
    async fn test_throttle_admits_with_reduced_size() {
        let (d, store, _) = setup(1.0);
        set_status(&store, ModuleStatus::Throttle).await;
        let mut s = signal();
        assert_eq!(d.admit(&mut s).await.unwrap(), ModuleStatus::Throttle);
        assert_eq!(s.size_factor(), Some(0.5));

        let (d, store, _) = setup(0.0);
        set_status(&store, ModuleStatus::Throttle).await;
        assert!(matches!(
            d.admit(&mut signal()).await,
            Err(RejectReason::Throttled { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispatch_publishes_approved() {
        let (d, store, bus) = setup(1.0);
        set_status(&store, ModuleStatus::Run).await;
        let mut sub = bus.subscribe(topics::SIGNAL_APPROVED);

        let mut s = signal();
        d.admit(&mut s).await.unwrap();
        let out = d.dispatch(s);
        assert!(out.is_approved());

        let msg = sub.try_recv().unwrap();
        assert_eq!(msg.payload["approved"], true);
        assert_eq!(msg.payload["symbol"], "BTCUSDT");
        assert_eq!(msg.payload["side"], "BUY");
    }
}
