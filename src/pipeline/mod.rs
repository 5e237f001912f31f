//! The ordered gate a raw signal passes through before dispatch.
//!
//! Schema → Freshness → Entropy → Confidence → Risk → Breaker → Registry →
//! Dispatch. Any stage may reject; a rejection is terminal for that signal.
//! Every stage boundary re-reads the clock and drops expired signals.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::breaker::BreakerOrchestrator;
use crate::config::PipelineConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ReasonCode, RejectReason};
use crate::models::circuit::Scope;
use crate::models::signal::Signal;
use crate::risk::RiskManager;
use crate::store::StoreClient;
use crate::telemetry::latency::LatencyTracker;
use crate::telemetry::metrics::Metrics;

pub mod confidence;
pub mod entropy;
pub mod freshness;
pub mod integrity;
pub mod schema;

pub use confidence::ConfidenceValidator;
pub use entropy::EntropyFilter;
pub use freshness::{CircuitView, FreshnessValidator};
pub use schema::SchemaValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Schema,
    Freshness,
    Entropy,
    Confidence,
    Risk,
    Breaker,
    Registry,
    Dispatch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Schema => "schema",
            Stage::Freshness => "freshness",
            Stage::Entropy => "entropy",
            Stage::Confidence => "confidence",
            Stage::Risk => "risk",
            Stage::Breaker => "breaker",
            Stage::Registry => "registry",
            Stage::Dispatch => "dispatch",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub stage: Stage,
    pub reason: RejectReason,
    pub signal_id: Option<String>,
    pub symbol: Option<String>,
    pub strategy: Option<String>,
}

impl Rejection {
    fn for_signal(stage: Stage, signal: &Signal, reason: RejectReason) -> Self {
        Self {
            stage,
            reason,
            signal_id: Some(signal.id.clone()),
            symbol: Some(signal.symbol.clone()),
            strategy: Some(signal.strategy.clone()),
        }
    }

    fn for_payload(stage: Stage, raw: &Value, reason: RejectReason) -> Self {
        let field = |name: &str| raw.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            stage,
            reason,
            signal_id: field("id"),
            symbol: field("symbol"),
            strategy: field("strategy"),
        }
    }

    pub fn code(&self) -> ReasonCode {
        self.reason.code()
    }
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Dispatched(Arc<Signal>),
    Rejected(Rejection),
}

impl PipelineOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, PipelineOutcome::Dispatched(_))
    }

    pub fn signal(&self) -> Option<&Arc<Signal>> {
        match self {
            PipelineOutcome::Dispatched(s) => Some(s),
            PipelineOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            PipelineOutcome::Rejected(r) => Some(r),
            PipelineOutcome::Dispatched(_) => None,
        }
    }

    pub fn reason_code(&self) -> Option<ReasonCode> {
        self.rejection().map(Rejection::code)
    }
}

pub struct SignalPipeline {
    schema: SchemaValidator,
    freshness: FreshnessValidator,
    entropy: EntropyFilter,
    confidence: ConfidenceValidator,
    risk: RiskManager,
    breakers: Arc<BreakerOrchestrator>,
    dispatcher: Dispatcher,
    store: Arc<StoreClient>,
    metrics: Arc<Metrics>,
    latency: Arc<LatencyTracker>,
}

impl SignalPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &PipelineConfig,
        risk: RiskManager,
        breakers: Arc<BreakerOrchestrator>,
        dispatcher: Dispatcher,
        store: Arc<StoreClient>,
        metrics: Arc<Metrics>,
        latency: Arc<LatencyTracker>,
    ) -> Self {
        Self {
            schema: SchemaValidator::new(config),
            freshness: FreshnessValidator::new(config),
            entropy: EntropyFilter::new(config),
            confidence: ConfidenceValidator::new(config),
            risk,
            breakers,
            dispatcher,
            store,
            metrics,
            latency,
        }
    }

    /// Run one raw payload through every stage.
    pub async fn process(&self, raw: &Value) -> PipelineOutcome {
        self.metrics.record_received();
        match self.run(raw).await {
            Ok(signal) => PipelineOutcome::Dispatched(signal),
            Err(rejection) => {
                self.metrics.record_reject(rejection.stage, rejection.code());
                warn!(
                    signal_id = rejection.signal_id.as_deref().unwrap_or("-"),
                    symbol = rejection.symbol.as_deref().unwrap_or("-"),
                    strategy = rejection.strategy.as_deref().unwrap_or("-"),
                    stage = %rejection.stage,
                    reason = %rejection.code(),
                    "Signal rejected: {}",
                    rejection.reason
                );
                PipelineOutcome::Rejected(rejection)
            }
        }
    }

    async fn run(&self, raw: &Value) -> Result<Arc<Signal>, Rejection> {
        let mut signal = {
            let _t = self.latency.start_timer(Stage::Schema);
            self.schema
                .validate(raw, self.store.now())
                .map_err(|r| Rejection::for_payload(Stage::Schema, raw, r))?
        };
        self.passed(Stage::Schema, &signal);

        {
            let now = self.enter(Stage::Freshness, &signal)?;
            let _t = self.latency.start_timer(Stage::Freshness);
            let origin = self
                .store
                .origin_data(&signal.symbol, signal.referenced_indicators())
                .await;
            let circuits = CircuitView {
                global_tripped: self.store.circuit_tripped(&Scope::Global).await,
                symbol_tripped: self
                    .store
                    .circuit_tripped(&Scope::symbol(&signal.symbol))
                    .await,
            };
            self.freshness
                .check(&signal, &origin, circuits, now)
                .map_err(|r| Rejection::for_signal(Stage::Freshness, &signal, r))?;
        }
        self.passed(Stage::Freshness, &signal);

        {
            self.enter(Stage::Entropy, &signal)?;
            let _t = self.latency.start_timer(Stage::Entropy);
            let inputs = self.store.entropy_inputs(&signal.symbol).await;
            let entropy = self
                .entropy
                .evaluate(inputs.as_ref())
                .map_err(|r| Rejection::for_signal(Stage::Entropy, &signal, r))?;
            signal.annotate_entropy(entropy);
        }
        self.passed(Stage::Entropy, &signal);

        {
            self.enter(Stage::Confidence, &signal)?;
            let _t = self.latency.start_timer(Stage::Confidence);
            self.confidence
                .check(&signal)
                .map_err(|r| Rejection::for_signal(Stage::Confidence, &signal, r))?;
        }
        self.passed(Stage::Confidence, &signal);

        {
            self.enter(Stage::Risk, &signal)?;
            let _t = self.latency.start_timer(Stage::Risk);
            if let Err(r) = self.risk.evaluate(&mut signal).await {
                return Err(Rejection::for_signal(Stage::Risk, &signal, r));
            }
        }
        self.passed(Stage::Risk, &signal);

        {
            self.enter(Stage::Breaker, &signal)?;
            let _t = self.latency.start_timer(Stage::Breaker);
            self.breakers
                .check(&signal)
                .await
                .map_err(|r| Rejection::for_signal(Stage::Breaker, &signal, r))?;
        }
        self.passed(Stage::Breaker, &signal);

        {
            self.enter(Stage::Registry, &signal)?;
            let _t = self.latency.start_timer(Stage::Registry);
            if let Err(r) = self.dispatcher.admit(&mut signal).await {
                return Err(Rejection::for_signal(Stage::Registry, &signal, r));
            }
        }
        self.passed(Stage::Registry, &signal);

        self.enter(Stage::Dispatch, &signal)?;
        let _t = self.latency.start_timer(Stage::Dispatch);
        Ok(self.dispatcher.dispatch(signal))
    }

    /// Stage-boundary TTL check against a fresh clock reading.
    fn enter(&self, stage: Stage, signal: &Signal) -> Result<DateTime<Utc>, Rejection> {
        let now = self.store.now();
        if signal.is_expired(now) {
            return Err(Rejection::for_signal(
                stage,
                signal,
                RejectReason::Expired {
                    overdue_secs: signal.overdue_secs(now),
                },
            ));
        }
        Ok(now)
    }

    fn passed(&self, stage: Stage, signal: &Signal) {
        self.metrics.record_pass(stage);
        debug!(symbol = %signal.symbol, "Signal {} passed {stage}", signal.id);
    }
}
