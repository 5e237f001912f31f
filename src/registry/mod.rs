//! Static module registry and the run/throttle/suspend policy.

use std::collections::BTreeMap;

use crate::config::ModuleSpec;
use crate::models::module::{MarketRegime, ModuleKind, ModuleStatus};
use crate::models::state::GlobalState;
use crate::store::keys;

pub mod service;

pub use service::RegistryService;

#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, ModuleKind>,
}

impl ModuleRegistry {
    pub fn new(specs: &[ModuleSpec]) -> Self {
        Self {
            modules: specs.iter().map(|s| (s.name.clone(), s.kind)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn kind_of(&self, module: &str) -> Option<ModuleKind> {
        self.modules.get(module).copied()
    }

    /// Per-module decision. Chaos suspends everything; a bear market
    /// throttles signal producers. A chaos flag or regime that is present
    /// but unparseable counts as chaos or bear respectively.
    pub fn decide_one(kind: ModuleKind, state: &GlobalState) -> ModuleStatus {
        if state.chaos_flag == Some(true) || state.is_malformed(keys::CHAOS_FLAG) {
            return ModuleStatus::Suspend;
        }
        let bear = state.market_regime == Some(MarketRegime::Bear)
            || state.is_malformed(keys::MARKET_REGIME);
        match (bear, kind) {
            (true, ModuleKind::SignalProducer) => ModuleStatus::Throttle,
            _ => ModuleStatus::Run,
        }
    }

    pub fn decide(&self, state: &GlobalState) -> BTreeMap<String, ModuleStatus> {
        self.modules
            .iter()
            .map(|(name, kind)| (name.clone(), Self::decide_one(*kind, state)))
            .collect()
    }

    pub fn all(&self, status: ModuleStatus) -> BTreeMap<String, ModuleStatus> {
        self.modules.keys().map(|name| (name.clone(), status)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new(&[
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
        ])
    }

    fn state(chaos: Option<bool>, regime: Option<MarketRegime>) -> GlobalState {
        GlobalState {
            chaos_flag: chaos,
            market_regime: regime,
            ..GlobalState::unknown()
        }
    }

    #[test]
    fn test_chaos_suspends_everything() {
        let map = registry().decide(&state(Some(true), Some(MarketRegime::Bull)));
        assert!(map.values().all(|s| *s == ModuleStatus::Suspend));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_bear_throttles_producers_only() {
        let map = registry().decide(&state(Some(false), Some(MarketRegime::Bear)));
        assert_eq!(map["momentum"], ModuleStatus::Throttle);
        assert_eq!(map["scalper"], ModuleStatus::Run);
        assert_eq!(map["risk_manager"], ModuleStatus::Run);
    }

    #[test]
    fn test_malformed_chaos_flag_suspends_everything() {
        let mut s = state(None, Some(MarketRegime::Bull));
        s.malformed.push(keys::CHAOS_FLAG.to_string());
        let map = registry().decide(&s);
        assert!(map.values().all(|st| *st == ModuleStatus::Suspend));
    }

    #[test]
    fn test_malformed_regime_throttles_producers() {
        let mut s = state(Some(false), None);
        s.malformed.push(keys::MARKET_REGIME.to_string());
        let map = registry().decide(&s);
        assert_eq!(map["momentum"], ModuleStatus::Throttle);
        assert_eq!(map["scalper"], ModuleStatus::Run);
    }

    #[test]
    fn test_calm_runs_everything() {
        for regime in [Some(MarketRegime::Bull), Some(MarketRegime::Sideways), None] {
            let map = registry().decide(&state(Some(false), regime));
            assert!(map.values().all(|s| *s == ModuleStatus::Run));
        }
        assert_eq!(registry().kind_of("scalper"), Some(ModuleKind::Execution));
        assert_eq!(registry().kind_of("unknown"), None);
    }
}
