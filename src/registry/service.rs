use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::ModuleRegistry;
use crate::breaker::CircuitEvent;
use crate::bus::{topics, SignalBus};
use crate::config::RegistryConfig;
use crate::models::circuit::Scope;
use crate::models::module::{ModuleStatus, ModuleStatusRecord};
use crate::store::StoreClient;
use crate::telemetry::alerts::AlertManager;

/// Periodically recomputes module statuses, persists them and announces
/// them on `control.module_status`.
pub struct RegistryService {
    registry: ModuleRegistry,
    status_ttl: Duration,
    store: Arc<StoreClient>,
    bus: SignalBus,
    alerts: Arc<AlertManager>,
}

impl RegistryService {
    pub fn new(
        config: &RegistryConfig,
        store: Arc<StoreClient>,
        bus: SignalBus,
        alerts: Arc<AlertManager>,
    ) -> Self {
        Self {
            registry: ModuleRegistry::new(&config.modules),
            status_ttl: Duration::from_secs(config.status_ttl_secs.max(1)),
            store,
            bus,
            alerts,
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// One registry tick.
    pub async fn refresh(&self) -> BTreeMap<String, ModuleStatus> {
        let state = match self.store.global_state(None).await {
            Ok(state) => state,
            Err(e) => {
                return self
                    .suspend_all(&format!("global state unreadable: {e}"))
                    .await;
            }
        };

        if self.store.circuit_tripped(&Scope::Global).await {
            return self.suspend_all("global circuit tripped").await;
        }

        let statuses = self.registry.decide(&state);
        self.publish(&statuses).await;
        statuses
    }

    pub async fn suspend_all(&self, cause: &str) -> BTreeMap<String, ModuleStatus> {
        warn!("REGISTRY: suspending all modules — {cause}");
        let statuses = self.registry.all(ModuleStatus::Suspend);
        self.publish(&statuses).await;

        let alerts = self.alerts.clone();
        let cause = cause.to_string();
        tokio::spawn(async move { alerts.on_suspend_all(&cause).await });
        statuses
    }

    /// React to a circuit broadcast. Only the global scope matters here.
    pub async fn on_circuit_event(&self, event: &CircuitEvent) {
        if !event.scope().is_global() {
            return;
        }
        match event {
            CircuitEvent::Tripped { state } => {
                let reason = state
                    .reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "UNKNOWN".into());
                self.suspend_all(&format!("global circuit tripped ({reason})"))
                    .await;
            }
            CircuitEvent::Reset { .. } => {
                info!("REGISTRY: global circuit reset, recomputing statuses");
                self.refresh().await;
            }
        }
    }

    async fn publish(&self, statuses: &BTreeMap<String, ModuleStatus>) {
        for (module, status) in statuses {
            let record = ModuleStatusRecord {
                module: module.clone(),
                status: *status,
            };
            if let Err(e) = self.store.put_module_status(&record, self.status_ttl).await {
                // Readers treat a missing record as SUSPEND.
                error!("Module status for '{module}' not persisted: {e}");
            }
            match serde_json::to_value(&record) {
                Ok(payload) => {
                    self.bus.publish(topics::CONTROL_MODULE_STATUS, payload);
                }
                Err(e) => error!("Module status not serialisable: {e}"),
            }
        }
        info!(
            "REGISTRY: {}",
            statuses
                .iter()
                .map(|(m, s)| format!("{m}={s}"))
                .collect::<Vec<_>>()
                .join(" ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{StoreConfig, TelemetryConfig};
    use crate::models::circuit::{CircuitState, TripReason};
    use crate::store::fault::FaultyStore;
    use crate::store::{keys, MemoryStore};
    use crate::telemetry::metrics::Metrics;

    fn setup() -> (RegistryService, Arc<StoreClient>, Arc<FaultyStore>, SignalBus) {
        let clock = Arc::new(SystemClock);
        let faulty = Arc::new(FaultyStore::new(Arc::new(MemoryStore::new(clock.clone()))));
        let store = Arc::new(StoreClient::new(
            faulty.clone(),
            clock,
            &StoreConfig {
                max_retries: 0,
                cache_ttl_ms: 0,
                ..StoreConfig::default()
            },
            Arc::new(Metrics::new()),
        ));
        let bus = SignalBus::new(64);
        let service = RegistryService::new(
            &RegistryConfig::default(),
            store.clone(),
            bus.clone(),
            Arc::new(AlertManager::new(TelemetryConfig::default())),
        );
        (service, store, faulty, bus)
    }

    #[tokio::test]
    async fn test_refresh_persists_and_publishes() {
        let (service, store, _, bus) = setup();
        store.put_raw(keys::CHAOS_FLAG, "false", None).await.unwrap();
        store.put_raw(keys::MARKET_REGIME, "BEAR", None).await.unwrap();
        let mut sub = bus.subscribe(topics::CONTROL_MODULE_STATUS);

        let map = service.refresh().await;
        assert_eq!(map["momentum"], ModuleStatus::Throttle);
        assert_eq!(
            store.module_status("momentum").await.unwrap(),
            Some(ModuleStatus::Throttle)
        );
        assert_eq!(store.module_status("scalper").await.unwrap(), Some(ModuleStatus::Run));

        let mut seen = 0;
        while sub.try_recv().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[tokio::test]
    async fn test_unreadable_state_suspends_all() {
        let (service, _, faulty, _) = setup();
        faulty.set_offline(true);
        let map = service.refresh().await;
        assert!(map.values().all(|s| *s == ModuleStatus::Suspend));
    }

    #[tokio::test]
    async fn test_garbled_chaos_flag_suspends_all() {
        let (service, store, _, _) = setup();
        store.put_raw(keys::CHAOS_FLAG, "garbled", None).await.unwrap();
        store.put_raw(keys::MARKET_REGIME, "BULL", None).await.unwrap();

        let map = service.refresh().await;
        assert_eq!(map.len(), 3);
        assert!(map.values().all(|s| *s == ModuleStatus::Suspend));
        assert_eq!(
            store.module_status("momentum").await.unwrap(),
            Some(ModuleStatus::Suspend)
        );
    }

    #[tokio::test]
    async fn test_missing_chaos_flag_runs() {
        let (service, _, _, _) = setup();
        let map = service.refresh().await;
        assert!(map.values().all(|s| *s == ModuleStatus::Run));
    }

    #[tokio::test]
    async fn test_global_trip_event_suspends_all() {
        let (service, store, _, _) = setup();
        store.put_raw(keys::CHAOS_FLAG, "false", None).await.unwrap();
        service.refresh().await;
        assert_eq!(store.module_status("scalper").await.unwrap(), Some(ModuleStatus::Run));

        let state = CircuitState::tripped(
            Scope::Global,
            TripReason::DailyLoss,
            chrono::Utc::now(),
            chrono::Duration::seconds(300),
        );
        service
            .on_circuit_event(&CircuitEvent::Tripped { state })
            .await;
        assert_eq!(
            store.module_status("scalper").await.unwrap(),
            Some(ModuleStatus::Suspend)
        );

        // Symbol trips leave the registry alone.
        let state = CircuitState::tripped(
            Scope::symbol("BTCUSDT"),
            TripReason::Volatility,
            chrono::Utc::now(),
            chrono::Duration::seconds(300),
        );
        service
            .on_circuit_event(&CircuitEvent::Tripped { state })
            .await;
        assert_eq!(
            store.module_status("scalper").await.unwrap(),
            Some(ModuleStatus::Suspend)
        );
    }
}
