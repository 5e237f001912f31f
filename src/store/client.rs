use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::retry::{with_retry, RetryPolicy};
use super::{keys, StateStore};
use crate::clock::SharedClock;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::circuit::{CircuitState, Scope};
use crate::models::module::{MarketRegime, ModuleStatus, ModuleStatusRecord};
use crate::models::risk::{RiskProfile, RiskSnapshot};
use crate::models::state::{EntropyInputs, GlobalState, MorphicMode, OriginData};
use crate::telemetry::metrics::Metrics;

struct Cached<T> {
    value: T,
    fetched_at: DateTime<Utc>,
}

/// Typed access to the shared store.
///
/// Every read goes through the retry policy. Circuit and module-status
/// reads are cached for `cache_ttl` and refreshed on expiry; writes made
/// through this client update the cache in place.
pub struct StoreClient {
    store: Arc<dyn StateStore>,
    clock: SharedClock,
    retry: RetryPolicy,
    cache_ttl: chrono::Duration,
    circuits: DashMap<Scope, Cached<CircuitState>>,
    modules: DashMap<String, Cached<Option<ModuleStatus>>>,
    metrics: Arc<Metrics>,
}

impl StoreClient {
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: SharedClock,
        config: &StoreConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            clock,
            retry: RetryPolicy::from(config),
            cache_ttl: chrono::Duration::milliseconds(config.cache_ttl_ms as i64),
            circuits: DashMap::new(),
            modules: DashMap::new(),
            metrics,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - fetched_at < self.cache_ttl
    }

    fn note_failure(&self, op: &str, key: &str, e: &StoreError) {
        self.metrics.record_store_failure();
        warn!("Store {op} '{key}' failed: {e}");
    }

    // ── raw access ────────────────────────────────────────────

    pub async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        with_retry(&self.retry, "get", || self.store.get(key))
            .await
            .inspect_err(|e| self.note_failure("get", key, e))
    }

    pub async fn put_raw(
        &self,
        key: &str,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let value = value.into();
        with_retry(&self.retry, "set", || self.store.set(key, value.clone(), ttl))
            .await
            .inspect_err(|e| self.note_failure("set", key, e))
    }

    pub async fn put_value<T: Display>(
        &self,
        key: &str,
        value: T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.put_raw(key, value.to_string(), ttl).await
    }

    pub async fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value).map_err(|e| StoreError::Malformed {
            key: key.to_string(),
            detail: e.to_string(),
        })?;
        self.put_raw(key, json, ttl).await
    }

    // ── typed getters ─────────────────────────────────────────

    pub async fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get_raw(key).await? {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| StoreError::Malformed {
                    key: key.to_string(),
                    detail: e.to_string(),
                }),
        }
    }

    pub async fn get_f64(&self, key: &str) -> Result<Option<f64>, StoreError> {
        match self.get_parsed::<f64>(key).await? {
            Some(v) if !v.is_finite() => Err(StoreError::Malformed {
                key: key.to_string(),
                detail: format!("non-finite value {v}"),
            }),
            other => Ok(other),
        }
    }

    pub async fn get_decimal(&self, key: &str) -> Result<Option<Decimal>, StoreError> {
        self.get_parsed::<Decimal>(key).await
    }

    pub async fn get_bool(&self, key: &str) -> Result<Option<bool>, StoreError> {
        match self.get_raw(key).await? {
            None => Ok(None),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                other => Err(StoreError::Malformed {
                    key: key.to_string(),
                    detail: format!("not a boolean: '{other}'"),
                }),
            },
        }
    }

    pub async fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self.get_raw(key).await? {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| StoreError::Malformed {
                    key: key.to_string(),
                    detail: e.to_string(),
                }),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_raw(key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Malformed {
                    key: key.to_string(),
                    detail: e.to_string(),
                }),
        }
    }

    // ── circuit state ─────────────────────────────────────────

    /// Current circuit state for a scope, settled against the clock.
    /// A scope with no record is NORMAL.
    pub async fn circuit_state(&self, scope: &Scope) -> Result<CircuitState, StoreError> {
        let now = self.now();
        if let Some(cached) = self.circuits.get(scope) {
            if self.is_fresh(cached.fetched_at, now) {
                return Ok(cached.value.clone().settle(now));
            }
        }

        let state = self
            .get_json::<CircuitState>(&keys::circuit(scope))
            .await?
            .unwrap_or_else(|| CircuitState::normal(scope.clone()));
        self.circuits.insert(
            scope.clone(),
            Cached {
                value: state.clone(),
                fetched_at: now,
            },
        );
        Ok(state.settle(now))
    }

    /// Tripped-or-not with the fail-safe applied: an unreadable circuit is
    /// reported as tripped.
    pub async fn circuit_tripped(&self, scope: &Scope) -> bool {
        match self.circuit_state(scope).await {
            Ok(state) => state.is_tripped(self.now()),
            Err(e) => {
                warn!("Circuit '{scope}' unreadable ({e}); treating as TRIPPED");
                true
            }
        }
    }

    /// Atomically record a trip. Returns `false` when a live record already
    /// exists for the scope (someone else tripped it first).
    pub async fn try_trip(&self, state: &CircuitState) -> Result<bool, StoreError> {
        let now = self.now();
        let key = keys::circuit(&state.scope);
        let ttl = state
            .cooldown_remaining(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_millis(1));
        let json = serde_json::to_string(state).map_err(|e| StoreError::Malformed {
            key: key.clone(),
            detail: e.to_string(),
        })?;

        let won = with_retry(&self.retry, "set_if_absent", || {
            self.store.set_if_absent(&key, json.clone(), Some(ttl))
        })
        .await
        .inspect_err(|e| self.note_failure("set_if_absent", &key, e))?;

        if won {
            self.circuits.insert(
                state.scope.clone(),
                Cached {
                    value: state.clone(),
                    fetched_at: now,
                },
            );
        } else {
            self.circuits.remove(&state.scope);
        }
        Ok(won)
    }

    pub async fn reset_circuit(&self, scope: &Scope) -> Result<bool, StoreError> {
        let key = keys::circuit(scope);
        let removed = with_retry(&self.retry, "delete", || self.store.delete(&key))
            .await
            .inspect_err(|e| self.note_failure("delete", &key, e))?;
        self.circuits.insert(
            scope.clone(),
            Cached {
                value: CircuitState::normal(scope.clone()),
                fetched_at: self.now(),
            },
        );
        Ok(removed)
    }

    /// Drop a cached circuit record so the next read goes to the store.
    pub fn invalidate_circuit(&self, scope: &Scope) {
        self.circuits.remove(scope);
    }

    /// Overwrite the cached circuit with a state learned from the bus.
    pub fn observe_circuit(&self, state: CircuitState) {
        let now = self.now();
        self.circuits.insert(
            state.scope.clone(),
            Cached {
                value: state,
                fetched_at: now,
            },
        );
    }

    // ── module status ─────────────────────────────────────────

    /// `Ok(None)` when no record exists.
    pub async fn module_status(&self, module: &str) -> Result<Option<ModuleStatus>, StoreError> {
        let now = self.now();
        if let Some(cached) = self.modules.get(module) {
            if self.is_fresh(cached.fetched_at, now) {
                return Ok(cached.value);
            }
        }

        let status = self
            .get_json::<ModuleStatusRecord>(&keys::module_status(module))
            .await?
            .map(|rec| rec.status);
        self.modules.insert(
            module.to_string(),
            Cached {
                value: status,
                fetched_at: now,
            },
        );
        Ok(status)
    }

    pub async fn put_module_status(
        &self,
        record: &ModuleStatusRecord,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.put_json(&keys::module_status(&record.module), record, Some(ttl))
            .await?;
        self.observe_module_status(record);
        Ok(())
    }

    pub fn observe_module_status(&self, record: &ModuleStatusRecord) {
        self.modules.insert(
            record.module.clone(),
            Cached {
                value: Some(record.status),
                fetched_at: self.now(),
            },
        );
    }

    // ── collaborator data ─────────────────────────────────────

    /// Read a field, turning a malformed value into "unknown" and noting
    /// its key. Connectivity failures still propagate.
    fn lenient<T>(
        result: Result<Option<T>, StoreError>,
        malformed: &mut Vec<String>,
    ) -> Result<Option<T>, StoreError> {
        match result {
            Err(StoreError::Malformed { key, detail }) => {
                warn!("Ignoring malformed '{key}': {detail}");
                malformed.push(key);
                Ok(None)
            }
            other => other,
        }
    }

    /// Chaos, regime, mode, volatility and loss figures. `symbol` adds the
    /// per-symbol volatility.
    pub async fn global_state(&self, symbol: Option<&str>) -> Result<GlobalState, StoreError> {
        let mut malformed = Vec::new();
        let m = &mut malformed;
        let chaos_flag = Self::lenient(self.get_bool(keys::CHAOS_FLAG).await, m)?;
        let chaos_level = Self::lenient(self.get_f64(keys::CHAOS_LEVEL).await, m)?;
        let market_regime =
            Self::lenient(self.get_parsed::<MarketRegime>(keys::MARKET_REGIME).await, m)?;
        let morphic_mode = Self::lenient(self.get_parsed::<MorphicMode>(keys::MORPHIC_MODE).await, m)?
            .unwrap_or_default();
        let market_volatility = Self::lenient(self.get_f64(keys::MARKET_VOLATILITY).await, m)?;
        let daily_loss = Self::lenient(self.get_f64(keys::DAILY_LOSS).await, m)?;
        let symbol_volatility = match symbol {
            Some(s) => Self::lenient(self.get_f64(&keys::symbol_volatility(s)).await, m)?,
            None => None,
        };

        Ok(GlobalState {
            chaos_flag,
            chaos_level,
            market_regime,
            morphic_mode,
            market_volatility,
            daily_loss,
            symbol_volatility,
            malformed,
        })
    }

    /// Indicator timestamps and upstream latency. Anything unreadable comes
    /// back as `None`, which downstream treats as stale / too slow.
    pub async fn origin_data<'a>(
        &self,
        symbol: &str,
        indicators: impl IntoIterator<Item = &'a str>,
    ) -> OriginData {
        let mut origin = OriginData::default();
        for name in indicators {
            let ts = self
                .get_timestamp(&keys::indicator_ts(symbol, name))
                .await
                .unwrap_or(None);
            origin.indicator_timestamps.insert(name.to_string(), ts);
        }
        origin.upstream_latency = self.get_f64(keys::UPSTREAM_LATENCY).await.unwrap_or(None);
        origin
    }

    pub async fn entropy_inputs(&self, symbol: &str) -> Option<EntropyInputs> {
        match self.get_json::<EntropyInputs>(&keys::entropy(symbol)).await {
            Ok(inputs) => inputs,
            Err(e) => {
                debug!("Entropy inputs for {symbol} unavailable: {e}");
                None
            }
        }
    }

    pub async fn risk_snapshot(&self, symbol: &str) -> RiskSnapshot {
        RiskSnapshot {
            risk_exposure: self.get_f64(keys::RISK_EXPOSURE).await.unwrap_or(None),
            market_volatility: self.get_f64(keys::MARKET_VOLATILITY).await.unwrap_or(None),
            asset_volatility: self
                .get_f64(&keys::symbol_volatility(symbol))
                .await
                .unwrap_or(None),
            account_balance: self.get_decimal(keys::ACCOUNT_BALANCE).await.unwrap_or(None),
            daily_pnl: self.get_decimal(keys::DAILY_PNL).await.unwrap_or(None),
        }
    }

    pub async fn put_risk_profile(
        &self,
        profile: &RiskProfile,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.put_json(&keys::risk_profile(&profile.symbol), profile, Some(ttl))
            .await
    }

    pub async fn risk_profile(&self, symbol: &str) -> Result<Option<RiskProfile>, StoreError> {
        self.get_json(&keys::risk_profile(symbol)).await
    }

    // ── collaborator-side writers ─────────────────────────────

    pub async fn put_indicator_ts(
        &self,
        symbol: &str,
        indicator: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.put_raw(&keys::indicator_ts(symbol, indicator), at.to_rfc3339(), None)
            .await
    }

    pub async fn put_entropy_inputs(
        &self,
        symbol: &str,
        inputs: &EntropyInputs,
    ) -> Result<(), StoreError> {
        self.put_json(&keys::entropy(symbol), inputs, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::models::circuit::TripReason;
    use crate::store::fault::FaultyStore;
    use crate::store::MemoryStore;

    fn fast_config() -> StoreConfig {
        StoreConfig {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_factor: 0.0,
            ..StoreConfig::default()
        }
    }

    fn client() -> (StoreClient, Arc<FaultyStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let faulty = Arc::new(FaultyStore::new(Arc::new(MemoryStore::new(clock.clone()))));
        let client = StoreClient::new(
            faulty.clone(),
            clock.clone(),
            &fast_config(),
            Arc::new(Metrics::new()),
        );
        (client, faulty, clock)
    }

    #[tokio::test]
    async fn test_missing_circuit_is_normal_and_unreadable_is_tripped() {
        let (client, faulty, _) = client();
        assert!(!client.circuit_tripped(&Scope::Global).await);

        client.invalidate_circuit(&Scope::Global);
        faulty.set_offline(true);
        assert!(client.circuit_tripped(&Scope::Global).await);
    }

    #[tokio::test]
    async fn test_trip_is_set_if_absent() {
        let (client, _, clock) = client();
        let state = CircuitState::tripped(
            Scope::Global,
            TripReason::Manual,
            clock.now(),
            chrono::Duration::seconds(60),
        );
        assert!(client.try_trip(&state).await.unwrap());
        assert!(!client.try_trip(&state).await.unwrap());
        assert!(client.circuit_tripped(&Scope::Global).await);

        clock.advance_secs(61);
        assert!(!client.circuit_tripped(&Scope::Global).await);
        assert!(client.try_trip(&state).await.unwrap());
    }

    #[tokio::test]
    async fn test_module_status_cache_refreshes_after_ttl() {
        let (client, _, clock) = client();
        assert_eq!(client.module_status("momentum").await.unwrap(), None);

        let rec = ModuleStatusRecord {
            module: "momentum".into(),
            status: ModuleStatus::Run,
        };
        client
            .put_json(&keys::module_status("momentum"), &rec, None)
            .await
            .unwrap();
        // Still cached as missing.
        assert_eq!(client.module_status("momentum").await.unwrap(), None);

        clock.advance(chrono::Duration::milliseconds(2_001));
        assert_eq!(
            client.module_status("momentum").await.unwrap(),
            Some(ModuleStatus::Run)
        );
    }

    #[tokio::test]
    async fn test_global_state_malformed_field_is_unknown() {
        let (client, faulty, _) = client();
        client.put_raw(keys::CHAOS_LEVEL, "lots", None).await.unwrap();
        client.put_raw(keys::MARKET_REGIME, "bear", None).await.unwrap();
        client.put_raw(keys::MORPHIC_MODE, "alpha_push", None).await.unwrap();

        let g = client.global_state(None).await.unwrap();
        assert_eq!(g.chaos_level, None);
        assert!(g.is_malformed(keys::CHAOS_LEVEL));
        assert!(!g.is_malformed(keys::CHAOS_FLAG));
        assert_eq!(g.market_regime, Some(MarketRegime::Bear));
        assert_eq!(g.morphic_mode, MorphicMode::AlphaPush);

        faulty.set_offline(true);
        assert!(client.global_state(None).await.is_err());
    }

    #[tokio::test]
    async fn test_origin_data_unreadable_is_none() {
        let (client, faulty, clock) = client();
        client
            .put_indicator_ts("BTCUSDT", "rsi", clock.now())
            .await
            .unwrap();
        client.put_value(keys::UPSTREAM_LATENCY, 0.02, None).await.unwrap();

        let origin = client.origin_data("BTCUSDT", ["rsi", "macd"]).await;
        assert!(origin.indicator_timestamps["rsi"].is_some());
        assert!(origin.indicator_timestamps["macd"].is_none());
        assert_eq!(origin.upstream_latency, Some(0.02));

        faulty.set_offline(true);
        let origin = client.origin_data("BTCUSDT", ["rsi"]).await;
        assert!(origin.indicator_timestamps["rsi"].is_none());
        assert!(origin.upstream_latency.is_none());
    }
}
