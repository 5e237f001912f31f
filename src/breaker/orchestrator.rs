use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bus::{topics, SignalBus};
use crate::config::BreakerConfig;
use crate::error::{RejectReason, StoreError};
use crate::models::circuit::{CircuitState, Scope, TripReason};
use crate::models::signal::Signal;
use crate::models::state::GlobalState;
use crate::store::StoreClient;
use crate::telemetry::alerts::AlertManager;
use crate::telemetry::metrics::Metrics;

use super::{BreakerKind, ChainBreaker, CircuitEvent, PriorityScore, RuleBreaker, Verdict};

/// Owns both breakers and the circuit state machine.
///
/// Per signal: re-check the circuits, read global state, score the signal,
/// run the selected breaker. Trips are written set-if-absent so concurrent
/// trips of one scope collapse to a single winner.
pub struct BreakerOrchestrator {
    config: BreakerConfig,
    rule: RuleBreaker,
    chain: ChainBreaker,
    store: Arc<StoreClient>,
    bus: SignalBus,
    metrics: Arc<Metrics>,
    alerts: Arc<AlertManager>,
}

impl BreakerOrchestrator {
    pub fn new(
        config: BreakerConfig,
        store: Arc<StoreClient>,
        bus: SignalBus,
        metrics: Arc<Metrics>,
        alerts: Arc<AlertManager>,
    ) -> Self {
        Self {
            rule: RuleBreaker::new(&config),
            chain: ChainBreaker::new(&config),
            config,
            store,
            bus,
            metrics,
            alerts,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.config.cooldown_secs as i64)
    }

    /// Pick a breaker and run it. No side effects.
    pub fn evaluate(&self, signal: &Signal, state: &GlobalState) -> (BreakerKind, Verdict) {
        let score = PriorityScore::compute(
            signal.confidence,
            state.morphic_mode,
            state.chaos_level,
            &self.config,
        );
        let kind = score.select();
        debug!(
            symbol = %signal.symbol,
            "Breaker priority {} → {kind}",
            score.value()
        );

        let verdict = match kind {
            BreakerKind::RuleBased => self.rule.evaluate(signal, state),
            BreakerKind::ChainBased => self.chain.evaluate(signal, state),
        };
        (kind, verdict)
    }

    pub async fn check(&self, signal: &Signal) -> Result<(), RejectReason> {
        for scope in [Scope::Global, Scope::symbol(&signal.symbol)] {
            if self.store.circuit_tripped(&scope).await {
                return Err(RejectReason::CircuitTripped {
                    scope: scope.to_string(),
                });
            }
        }

        let state = match self.store.global_state(Some(&signal.symbol)).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Global state unreadable ({e}); evaluating as unknown");
                GlobalState::unknown()
            }
        };

        let (kind, verdict) = self.evaluate(signal, &state);
        match verdict {
            Verdict::Allow => Ok(()),
            Verdict::Veto { detail } => Err(RejectReason::BreakerVeto {
                breaker: kind,
                detail,
            }),
            Verdict::Trip {
                scope,
                reason,
                detail,
            } => {
                warn!(
                    symbol = %signal.symbol,
                    strategy = %signal.strategy,
                    "{kind} breaker: {detail}"
                );
                if let Err(e) = self.trip(scope.clone(), reason, self.cooldown()).await {
                    error!("Trip of '{scope}' not persisted: {e}");
                }
                Err(RejectReason::BreakerTripped {
                    breaker: kind,
                    scope: scope.to_string(),
                    reason,
                })
            }
        }
    }

    /// Trip `scope` for `cooldown`. Returns whether this call performed the
    /// transition; a scope that is already tripped is left untouched.
    pub async fn trip(
        &self,
        scope: Scope,
        reason: TripReason,
        cooldown: Duration,
    ) -> Result<bool, StoreError> {
        let state = CircuitState::tripped(scope, reason, self.store.now(), cooldown);
        match self.store.try_trip(&state).await {
            Ok(true) => {
                self.metrics.record_trip(reason);
                error!(
                    "CIRCUIT TRIPPED: scope={} reason={reason} cooldown={}s",
                    state.scope,
                    cooldown.num_seconds()
                );
                self.broadcast(CircuitEvent::Tripped {
                    state: state.clone(),
                });
                let alerts = self.alerts.clone();
                tokio::spawn(async move { alerts.on_trip(&state).await });
                Ok(true)
            }
            Ok(false) => {
                debug!("Scope '{}' already tripped", state.scope);
                Ok(false)
            }
            Err(e) => {
                // Readers fail safe on an unreachable store; tell live
                // subscribers anyway.
                self.broadcast(CircuitEvent::Tripped { state });
                Err(e)
            }
        }
    }

    /// Operator trip. `None` uses the configured cooldown.
    pub async fn trip_manual(
        &self,
        scope: Scope,
        cooldown: Option<Duration>,
    ) -> Result<bool, StoreError> {
        warn!("Manual trip requested for '{scope}'");
        let cooldown = cooldown.unwrap_or_else(|| self.cooldown());
        self.trip(scope, TripReason::Manual, cooldown).await
    }

    /// Operator override: back to NORMAL immediately.
    pub async fn reset(&self, scope: Scope) -> Result<bool, StoreError> {
        let removed = self.store.reset_circuit(&scope).await?;
        info!("Circuit '{scope}' reset (had live trip: {removed})");
        self.broadcast(CircuitEvent::Reset { scope });
        Ok(removed)
    }

    fn broadcast(&self, event: CircuitEvent) {
        match serde_json::to_value(&event) {
            Ok(payload) => {
                self.bus.publish(topics::CONTROL_CIRCUIT, payload);
            }
            Err(e) => error!("Circuit event not serialisable: {e}"),
        }
    }
}
