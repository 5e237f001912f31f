use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::breaker::{BreakerOrchestrator, CircuitEvent};
use crate::bus::{topics, SignalBus};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::pipeline::SignalPipeline;
use crate::registry::RegistryService;
use crate::risk::RiskManager;
use crate::scheduler;
use crate::store::{StateStore, StoreClient};
use crate::telemetry::alerts::AlertManager;
use crate::telemetry::latency::LatencyTracker;
use crate::telemetry::metrics::Metrics;

const BUS_CAPACITY: usize = 4096;
const LATENCY_SAMPLES: usize = 1000;

/// All components, wired once from a validated [`Config`].
pub struct ControlPlane {
    config: Config,
    bus: SignalBus,
    store: Arc<StoreClient>,
    metrics: Arc<Metrics>,
    latency: Arc<LatencyTracker>,
    pipeline: Arc<SignalPipeline>,
    breakers: Arc<BreakerOrchestrator>,
    registry: Arc<RegistryService>,
}

impl ControlPlane {
    pub fn new(config: Config, backend: Arc<dyn StateStore>, clock: SharedClock) -> Self {
        let bus = SignalBus::new(BUS_CAPACITY);
        let metrics = Arc::new(Metrics::new());
        let latency = Arc::new(LatencyTracker::new(LATENCY_SAMPLES));
        let alerts = Arc::new(AlertManager::new(config.telemetry.clone()));
        let store = Arc::new(StoreClient::new(
            backend,
            clock,
            &config.store,
            metrics.clone(),
        ));

        let breakers = Arc::new(BreakerOrchestrator::new(
            config.breaker.clone(),
            store.clone(),
            bus.clone(),
            metrics.clone(),
            alerts.clone(),
        ));
        let registry = Arc::new(RegistryService::new(
            &config.registry,
            store.clone(),
            bus.clone(),
            alerts,
        ));
        let risk = RiskManager::new(config.risk.clone(), store.clone(), metrics.clone());
        let dispatcher = Dispatcher::new(
            config.dispatch.clone(),
            store.clone(),
            bus.clone(),
            metrics.clone(),
        );
        let pipeline = Arc::new(SignalPipeline::new(
            &config.pipeline,
            risk,
            breakers.clone(),
            dispatcher,
            store.clone(),
            metrics.clone(),
            latency.clone(),
        ));

        Self {
            config,
            bus,
            store,
            metrics,
            latency,
            pipeline,
            breakers,
            registry,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<StoreClient> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn latency(&self) -> &Arc<LatencyTracker> {
        &self.latency
    }

    pub fn pipeline(&self) -> &Arc<SignalPipeline> {
        &self.pipeline
    }

    pub fn breakers(&self) -> &Arc<BreakerOrchestrator> {
        &self.breakers
    }

    pub fn registry(&self) -> &Arc<RegistryService> {
        &self.registry
    }

    /// Publish a raw payload on `signal.raw.<symbol>`.
    pub fn submit(&self, payload: Value) -> usize {
        let symbol = payload
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        self.bus.publish(topics::signal_raw(&symbol), payload)
    }

    /// Spawn the pipeline consumer, circuit listener, registry ticker and
    /// telemetry summary. All stop on `shutdown`; the consumer first waits
    /// for signals already in flight.
    pub fn start(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        // === Pipeline consumer: one task per raw signal, bounded ===
        {
            let mut raw_rx = self.bus.subscribe(topics::SIGNAL_RAW_ALL);
            let pipeline = self.pipeline.clone();
            let permits = self.config.pipeline.max_in_flight.clamp(1, Semaphore::MAX_PERMITS);
            let limit = Arc::new(Semaphore::new(permits));
            let mut shutdown_rx = shutdown.subscribe();

            handles.push(tokio::spawn(async move {
                let mut in_flight = JoinSet::new();
                loop {
                    tokio::select! {
                        biased;
                        msg = raw_rx.recv() => {
                            let Some(msg) = msg else { break };
                            // Back-pressure: wait for a slot before taking more.
                            let Ok(permit) = limit.clone().acquire_owned().await else { break };
                            let pipeline = pipeline.clone();
                            in_flight.spawn(async move {
                                let _permit = permit;
                                pipeline.process(&msg.payload).await;
                            });
                        }
                        Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                            if let Err(e) = done {
                                error!("Signal task failed: {e}");
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }

                if !in_flight.is_empty() {
                    info!("Draining {} in-flight signal(s)", in_flight.len());
                }
                while let Some(done) = in_flight.join_next().await {
                    if let Err(e) = done {
                        error!("Signal task failed: {e}");
                    }
                }
            }));
        }

        // === Circuit listener: keep caches and the registry in step ===
        {
            let mut circuit_rx = self.bus.subscribe(topics::CONTROL_CIRCUIT);
            let store = self.store.clone();
            let registry = self.registry.clone();
            let mut shutdown_rx = shutdown.subscribe();

            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = circuit_rx.recv() => {
                            let Some(msg) = msg else { break };
                            let event: CircuitEvent = match serde_json::from_value((*msg.payload).clone()) {
                                Ok(e) => e,
                                Err(e) => {
                                    warn!("Ignoring malformed circuit event: {e}");
                                    continue;
                                }
                            };
                            match &event {
                                CircuitEvent::Tripped { state } => store.observe_circuit(state.clone()),
                                CircuitEvent::Reset { scope } => store.invalidate_circuit(scope),
                            }
                            registry.on_circuit_event(&event).await;
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        // === Registry ticker ===
        {
            let registry = self.registry.clone();
            handles.push(scheduler::spawn_every(
                "registry",
                Duration::from_secs(self.config.registry.interval_secs),
                shutdown.subscribe(),
                move || {
                    let registry = registry.clone();
                    async move {
                        registry.refresh().await;
                    }
                },
            ));
        }

        // === Telemetry summary ===
        {
            let metrics = self.metrics.clone();
            let latency = self.latency.clone();
            handles.push(scheduler::spawn_every(
                "telemetry",
                Duration::from_secs(self.config.telemetry.summary_interval_secs.max(1)),
                shutdown.subscribe(),
                move || {
                    let metrics = metrics.clone();
                    let latency = latency.clone();
                    async move {
                        metrics.log_summary();
                        latency.log_summary();
                    }
                },
            ));
        }

        info!(
            "Control plane started: {} module(s) registered, registry every {}s",
            self.registry.registry().len(),
            self.config.registry.interval_secs
        );
        handles
    }
}
