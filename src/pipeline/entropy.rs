use crate::config::PipelineConfig;
use crate::error::RejectReason;
use crate::models::state::EntropyInputs;

/// Score used when the inputs for a symbol are unavailable.
pub const WORST_CASE_ENTROPY: f64 = 1.0;

/// Normalise one component into [0,1]; NaN and infinities count as the
/// worst case for that component.
fn unit(v: f64, worst: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        worst
    }
}

/// Mean of the four noise components. Pure.
pub fn entropy_score(inputs: &EntropyInputs) -> f64 {
    let components = [
        unit(inputs.volatility_noise, 1.0),
        unit(inputs.depth_inconsistency, 1.0),
        1.0 - unit(inputs.trend_health, 0.0),
        unit(inputs.indicator_staleness, 1.0),
    ];
    components.iter().sum::<f64>() / components.len() as f64
}

pub struct EntropyFilter {
    threshold: f64,
}

impl EntropyFilter {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            threshold: config.entropy_threshold,
        }
    }

    /// Score the inputs and return the entropy to annotate, or reject.
    pub fn evaluate(&self, inputs: Option<&EntropyInputs>) -> Result<f64, RejectReason> {
        let entropy = inputs.map(entropy_score).unwrap_or(WORST_CASE_ENTROPY);
        if entropy > self.threshold {
            return Err(RejectReason::HighEntropy {
                entropy,
                threshold: self.threshold,
            });
        }
        Ok(entropy)
    }
}
