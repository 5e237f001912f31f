use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::module::MarketRegime;

/// Externally set operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorphicMode {
    #[default]
    Default,
    AlphaPush,
}

impl FromStr for MorphicMode {
    type Err = std::convert::Infallible;

    /// Anything other than `alpha_push` runs in the default mode.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("alpha_push") {
            Ok(MorphicMode::AlphaPush)
        } else {
            Ok(MorphicMode::Default)
        }
    }
}

/// System-wide inputs read by the breakers and the module registry.
///
/// `None` means the key is missing or its value did not parse; keys in the
/// second group are also listed in `malformed`. Breakers treat `None` as
/// unsafe. The registry treats a missing chaos flag or regime as calm, but a
/// malformed one as unsafe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalState {
    pub chaos_flag: Option<bool>,
    pub chaos_level: Option<f64>,
    pub market_regime: Option<MarketRegime>,
    pub morphic_mode: MorphicMode,
    pub market_volatility: Option<f64>,
    /// Realised daily loss as a fraction of capital (positive = loss).
    pub daily_loss: Option<f64>,
    /// Volatility of the symbol under evaluation, when one is.
    pub symbol_volatility: Option<f64>,
    /// Keys that were present but unparseable.
    pub malformed: Vec<String>,
}

impl GlobalState {
    /// Nothing known.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_malformed(&self, key: &str) -> bool {
        self.malformed.iter().any(|k| k == key)
    }
}

/// Four noise scores in [0,1] (1 = bad, except `trend_health` where 1 = good).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyInputs {
    pub volatility_noise: f64,
    pub depth_inconsistency: f64,
    pub trend_health: f64,
    pub indicator_staleness: f64,
}

/// Upstream health observed for one signal's indicators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OriginData {
    /// Last update per referenced indicator; `None` = never seen.
    pub indicator_timestamps: BTreeMap<String, Option<DateTime<Utc>>>,
    /// Last observed exchange API latency in seconds.
    pub upstream_latency: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_morphic_mode_parse() {
        assert_eq!("alpha_push".parse::<MorphicMode>().unwrap(), MorphicMode::AlphaPush);
        assert_eq!("ALPHA_PUSH".parse::<MorphicMode>().unwrap(), MorphicMode::AlphaPush);
        assert_eq!("default".parse::<MorphicMode>().unwrap(), MorphicMode::Default);
        assert_eq!("whatever".parse::<MorphicMode>().unwrap(), MorphicMode::Default);
    }
}
