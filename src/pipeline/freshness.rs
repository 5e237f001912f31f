use chrono::{DateTime, Utc};

use crate::config::PipelineConfig;
use crate::error::RejectReason;
use crate::models::circuit::Scope;
use crate::models::signal::Signal;
use crate::models::state::OriginData;

/// Circuit status as seen by this stage. Unknown scopes must already be
/// folded in as tripped by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitView {
    pub global_tripped: bool,
    pub symbol_tripped: bool,
}

pub struct FreshnessValidator {
    max_data_age_secs: f64,
    max_latency_secs: f64,
}

impl FreshnessValidator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_data_age_secs: config.max_data_age_secs,
            max_latency_secs: config.max_latency_secs,
        }
    }

    /// Stale data, then latency, then circuit; first failure wins.
    pub fn check(
        &self,
        signal: &Signal,
        origin: &OriginData,
        circuits: CircuitView,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        for indicator in signal.referenced_indicators() {
            let ts = origin.indicator_timestamps.get(indicator).copied().flatten();
            let Some(ts) = ts else {
                return Err(RejectReason::StaleData {
                    indicator: indicator.to_string(),
                    age_secs: None,
                });
            };
            let age = (now - ts).num_milliseconds() as f64 / 1000.0;
            if age > self.max_data_age_secs {
                return Err(RejectReason::StaleData {
                    indicator: indicator.to_string(),
                    age_secs: Some(age),
                });
            }
        }

        match origin.upstream_latency {
            Some(latency) if latency <= self.max_latency_secs => {}
            latency => {
                return Err(RejectReason::HighLatency {
                    latency_secs: latency,
                })
            }
        }

        if circuits.global_tripped {
            return Err(RejectReason::CircuitTripped {
                scope: Scope::Global.to_string(),
            });
        }
        if circuits.symbol_tripped {
            return Err(RejectReason::CircuitTripped {
                scope: Scope::symbol(&signal.symbol).to_string(),
            });
        }
        Ok(())
    }
}
