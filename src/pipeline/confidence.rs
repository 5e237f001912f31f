use crate::config::PipelineConfig;
use crate::error::RejectReason;
use crate::models::signal::Signal;

pub struct ConfidenceValidator {
    threshold: f64,
}

impl ConfidenceValidator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            threshold: config.confidence_threshold,
        }
    }

    pub fn check(&self, signal: &Signal) -> Result<(), RejectReason> {
        if signal.confidence < self.threshold {
            return Err(RejectReason::LowConfidence {
                confidence: signal.confidence,
                threshold: self.threshold,
            });
        }
        Ok(())
    }
}
