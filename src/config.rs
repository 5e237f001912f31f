use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::module::ModuleKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub risk: RiskConfig,
    pub breaker: BreakerConfig,
    pub registry: RegistryConfig,
    pub dispatch: DispatchConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub confidence_threshold: f64, // Min confidence to pass (e.g. 0.85)
    pub entropy_threshold: f64,    // Block when entropy is above (e.g. 0.7)
    pub max_data_age_secs: f64,    // Indicator freshness window (e.g. 60)
    pub max_latency_secs: f64,     // Upstream API latency ceiling (e.g. 0.1)
    pub default_ttl_secs: f64,     // TTL for signals that carry none
    pub max_ttl_secs: f64,         // Longest TTL a producer may request
    pub max_in_flight: usize,      // Signals processed concurrently
    /// HMAC key for producer signatures; `None` disables the check.
    pub signing_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_daily_risk: f64,                   // Exposure above this floors leverage (e.g. 0.01)
    pub max_leverage: f64,                     // Leverage ceiling (e.g. 5)
    pub max_volatility_for_full_leverage: f64, // Market vol above this floors leverage (e.g. 0.10)
    pub min_balance: Decimal,                  // Balance at or below this = no capital
    pub profile_ttl_secs: u64,                 // TTL of the published risk profile
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub priority_confidence_cutoff: f64, // Confidence above this adds +2 priority
    pub chaos_level_threshold: f64,      // Chaos above this subtracts 3 priority
    pub max_daily_loss: f64,             // Rule breaker: daily loss fraction (e.g. 0.05)
    pub max_volatility: f64,             // Rule breaker: volatility (e.g. 0.10)
    pub max_chaos_level: f64,            // Chain breaker: chaos ceiling (e.g. 0.5)
    pub chaos_weight: f64,
    pub volatility_weight: f64,
    pub drawdown_weight: f64,
    pub cascade_factor: f64,   // Multiplier on links after a breached link
    pub severity_ceiling: f64, // Chain trips above this
    pub cooldown_secs: u64,    // Trip duration (e.g. 300)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub interval_secs: u64,
    pub status_ttl_secs: u64,
    pub modules: Vec<ModuleSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
    pub kind: ModuleKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub throttle_probability: f64, // Chance a THROTTLE module's signal is dispatched
    pub throttle_size_factor: f64, // Size annotation applied to throttled dispatches
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub cache_ttl_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: String, // "pretty" | "json"
    pub alert_webhook_url: Option<String>,
    pub alert_on_trip: bool,
    pub alert_on_suspend: bool,
    pub summary_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            entropy_threshold: 0.7,
            max_data_age_secs: 60.0,
            max_latency_secs: 0.1,
            default_ttl_secs: 60.0,
            max_ttl_secs: 3_600.0,
            max_in_flight: 256,
            signing_key: None,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_risk: 0.01,
            max_leverage: 5.0,
            max_volatility_for_full_leverage: 0.10,
            min_balance: Decimal::ZERO,
            profile_ttl_secs: 30,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            priority_confidence_cutoff: 0.7,
            chaos_level_threshold: 0.8,
            max_daily_loss: 0.05,
            max_volatility: 0.10,
            max_chaos_level: 0.5,
            chaos_weight: 1.0,
            volatility_weight: 0.5,
            drawdown_weight: 0.5,
            cascade_factor: 1.5,
            severity_ceiling: 1.0,
            cooldown_secs: 300,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            status_ttl_secs: 180,
            modules: vec![
                ModuleSpec {
                    name: "momentum".into(),
                    kind: ModuleKind::SignalProducer,
                },
                ModuleSpec {
                    name: "scalper".into(),
                    kind: ModuleKind::Execution,
                },
                ModuleSpec {
                    name: "risk_manager".into(),
                    kind: ModuleKind::Risk,
                },
            ],
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            throttle_probability: 0.5,
            throttle_size_factor: 0.5,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 2_000,
            max_retries: 3,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
            jitter_factor: 0.2,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "pretty".into(),
            alert_webhook_url: None,
            alert_on_trip: true,
            alert_on_suspend: true,
            summary_interval_secs: 30,
        }
    }
}

impl TelemetryConfig {
    /// Telemetry section alone, so logging can start before the rest of the
    /// configuration is read: RUST_LOG, LOG_FORMAT, ALERT_WEBHOOK_URL.
    pub fn from_env() -> Self {
        let mut telemetry = Self::default();
        if let Some(level) = env_string("RUST_LOG") {
            telemetry.log_level = level;
        }
        if let Some(format) = env_string("LOG_FORMAT") {
            telemetry.log_format = format;
        }
        telemetry.alert_webhook_url = env_string("ALERT_WEBHOOK_URL");
        telemetry
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.trim().eq_ignore_ascii_case("json")
    }
}

/// Overwrite `target` with the parsed value of env var `key`, if set and valid.
fn env_override<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!("Ignoring unparseable {key}={raw}"),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `name:kind,name:kind` into module specs.
pub fn parse_module_list(raw: &str) -> anyhow::Result<Vec<ModuleSpec>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, kind) = entry
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("module entry '{entry}' must be name:kind"))?;
            let kind = kind.parse::<ModuleKind>().map_err(|e| anyhow::anyhow!(e))?;
            anyhow::ensure!(!name.trim().is_empty(), "module name is empty in '{entry}'");
            Ok(ModuleSpec {
                name: name.trim().to_string(),
                kind,
            })
        })
        .collect()
}

impl Config {
    /// Load configuration from environment variables (.env file) with defaults.
    ///
    /// Pipeline: CONFIDENCE_THRESHOLD, ENTROPY_THRESHOLD, MAX_DATA_AGE,
    ///   MAX_LATENCY, SIGNAL_DEFAULT_TTL, SIGNAL_MAX_TTL,
    ///   SIGNAL_MAX_IN_FLIGHT, SIGNAL_SIGNING_KEY
    /// Risk: MAX_DAILY_RISK, MAX_LEVERAGE, MAX_VOLATILITY_FOR_FULL_LEVERAGE,
    ///   MIN_ACCOUNT_BALANCE
    /// Breakers: CHAOS_LEVEL_THRESHOLD, MAX_DAILY_LOSS, MAX_VOLATILITY,
    ///   MAX_CHAOS_LEVEL, BREAKER_COOLDOWN_SECS
    /// Registry: REGISTRY_INTERVAL_SECS, REGISTRY_MODULES (name:kind,...)
    /// Dispatch: THROTTLE_PROBABILITY, THROTTLE_SIZE_FACTOR
    /// Store: STORE_CACHE_TTL_MS, STORE_MAX_RETRIES
    /// Telemetry: RUST_LOG, LOG_FORMAT, ALERT_WEBHOOK_URL
    pub fn load_or_default() -> Self {
        let _ = dotenv::dotenv();

        let mut config = Self::default();

        let p = &mut config.pipeline;
        env_override("CONFIDENCE_THRESHOLD", &mut p.confidence_threshold);
        env_override("ENTROPY_THRESHOLD", &mut p.entropy_threshold);
        env_override("MAX_DATA_AGE", &mut p.max_data_age_secs);
        env_override("MAX_LATENCY", &mut p.max_latency_secs);
        env_override("SIGNAL_DEFAULT_TTL", &mut p.default_ttl_secs);
        env_override("SIGNAL_MAX_TTL", &mut p.max_ttl_secs);
        env_override("SIGNAL_MAX_IN_FLIGHT", &mut p.max_in_flight);
        if let Some(key) = env_string("SIGNAL_SIGNING_KEY") {
            p.signing_key = Some(key);
        }

        let r = &mut config.risk;
        env_override("MAX_DAILY_RISK", &mut r.max_daily_risk);
        env_override("MAX_LEVERAGE", &mut r.max_leverage);
        env_override(
            "MAX_VOLATILITY_FOR_FULL_LEVERAGE",
            &mut r.max_volatility_for_full_leverage,
        );
        env_override("MIN_ACCOUNT_BALANCE", &mut r.min_balance);

        let b = &mut config.breaker;
        env_override("CHAOS_LEVEL_THRESHOLD", &mut b.chaos_level_threshold);
        env_override("MAX_DAILY_LOSS", &mut b.max_daily_loss);
        env_override("MAX_VOLATILITY", &mut b.max_volatility);
        env_override("MAX_CHAOS_LEVEL", &mut b.max_chaos_level);
        env_override("BREAKER_COOLDOWN_SECS", &mut b.cooldown_secs);

        env_override("REGISTRY_INTERVAL_SECS", &mut config.registry.interval_secs);
        config.registry.status_ttl_secs = config.registry.interval_secs * 3;
        if let Some(raw) = env_string("REGISTRY_MODULES") {
            match parse_module_list(&raw) {
                Ok(modules) if !modules.is_empty() => config.registry.modules = modules,
                Ok(_) => tracing::warn!("REGISTRY_MODULES is empty — keeping defaults"),
                Err(e) => tracing::warn!("Ignoring REGISTRY_MODULES: {e}"),
            }
        }

        env_override("THROTTLE_PROBABILITY", &mut config.dispatch.throttle_probability);
        env_override("THROTTLE_SIZE_FACTOR", &mut config.dispatch.throttle_size_factor);

        env_override("STORE_CACHE_TTL_MS", &mut config.store.cache_ttl_ms);
        env_override("STORE_MAX_RETRIES", &mut config.store.max_retries);

        config.telemetry = TelemetryConfig::from_env();

        config
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let unit = |v: f64| (0.0..=1.0).contains(&v);

        let p = &self.pipeline;
        anyhow::ensure!(unit(p.confidence_threshold), "confidence_threshold must be in [0,1]");
        anyhow::ensure!(unit(p.entropy_threshold), "entropy_threshold must be in [0,1]");
        anyhow::ensure!(p.max_data_age_secs > 0.0, "max_data_age_secs must be positive");
        anyhow::ensure!(p.max_latency_secs > 0.0, "max_latency_secs must be positive");
        anyhow::ensure!(p.default_ttl_secs > 0.0, "default_ttl_secs must be positive");
        anyhow::ensure!(
            p.max_ttl_secs >= p.default_ttl_secs,
            "max_ttl_secs must be at least default_ttl_secs"
        );
        anyhow::ensure!(p.max_in_flight > 0, "max_in_flight must be positive");

        let r = &self.risk;
        anyhow::ensure!(r.max_leverage >= 1.0, "max_leverage must be at least 1");
        anyhow::ensure!(unit(r.max_daily_risk), "max_daily_risk must be in [0,1]");
        anyhow::ensure!(
            unit(r.max_volatility_for_full_leverage),
            "max_volatility_for_full_leverage must be in [0,1]"
        );
        anyhow::ensure!(r.min_balance >= Decimal::ZERO, "min_balance must not be negative");

        let b = &self.breaker;
        anyhow::ensure!(b.max_chaos_level > 0.0, "max_chaos_level must be positive");
        anyhow::ensure!(b.max_volatility > 0.0, "max_volatility must be positive");
        anyhow::ensure!(b.max_daily_loss > 0.0, "max_daily_loss must be positive");
        anyhow::ensure!(b.cascade_factor >= 1.0, "cascade_factor must be at least 1");
        anyhow::ensure!(b.severity_ceiling > 0.0, "severity_ceiling must be positive");
        anyhow::ensure!(b.cooldown_secs > 0, "cooldown_secs must be positive");

        anyhow::ensure!(self.registry.interval_secs > 0, "registry interval must be positive");
        anyhow::ensure!(!self.registry.modules.is_empty(), "registry has no modules");

        let d = &self.dispatch;
        anyhow::ensure!(unit(d.throttle_probability), "throttle_probability must be in [0,1]");
        anyhow::ensure!(
            d.throttle_size_factor > 0.0 && d.throttle_size_factor <= 1.0,
            "throttle_size_factor must be in (0,1]"
        );

        anyhow::ensure!(
            unit(self.store.jitter_factor),
            "store jitter_factor must be in [0,1]"
        );
        Ok(())
    }
}
