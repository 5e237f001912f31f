use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::error::ReasonCode;
use crate::models::circuit::TripReason;
use crate::pipeline::Stage;

/// Counters shared by every component. Constructed once and injected.
#[derive(Default)]
pub struct Metrics {
    rejects: DashMap<(Stage, ReasonCode), u64>,
    passes: DashMap<Stage, u64>,
    trips: DashMap<TripReason, u64>,
    received: AtomicU64,
    dispatched: AtomicU64,
    risk_exceeded: AtomicU64,
    store_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reject(&self, stage: Stage, code: ReasonCode) {
        self.rejects
            .entry((stage, code))
            .and_modify(|n| *n += 1)
            .or_insert(1);
    }

    pub fn record_pass(&self, stage: Stage) {
        self.passes.entry(stage).and_modify(|n| *n += 1).or_insert(1);
    }

    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_risk_exceeded(&self) {
        self.risk_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trip(&self, reason: TripReason) {
        self.trips.entry(reason).and_modify(|n| *n += 1).or_insert(1);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejects(&self, stage: Stage, code: ReasonCode) -> u64 {
        self.rejects.get(&(stage, code)).map(|n| *n).unwrap_or(0)
    }

    pub fn total_rejects(&self) -> u64 {
        self.rejects.iter().map(|e| *e.value()).sum()
    }

    pub fn passes(&self, stage: Stage) -> u64 {
        self.passes.get(&stage).map(|n| *n).unwrap_or(0)
    }

    pub fn trips(&self, reason: TripReason) -> u64 {
        self.trips.get(&reason).map(|n| *n).unwrap_or(0)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn risk_exceeded(&self) -> u64 {
        self.risk_exceeded.load(Ordering::Relaxed)
    }

    pub fn store_failures(&self) -> u64 {
        self.store_failures.load(Ordering::Relaxed)
    }

    pub fn log_summary(&self) {
        info!("═══════════════════════════════════════");
        info!("  SIGNAL GATE SUMMARY");
        info!("═══════════════════════════════════════");
        info!(
            "  Received: {} | Dispatched: {} | Rejected: {}",
            self.received(),
            self.dispatched(),
            self.total_rejects()
        );
        info!(
            "  Leverage clamps: {} | Store failures: {}",
            self.risk_exceeded(),
            self.store_failures()
        );

        let mut rejects: Vec<((Stage, ReasonCode), u64)> =
            self.rejects.iter().map(|e| (*e.key(), *e.value())).collect();
        rejects.sort();
        for ((stage, code), n) in rejects {
            info!("  reject {stage}/{code}: {n}");
        }

        let mut trips: Vec<(TripReason, u64)> =
            self.trips.iter().map(|e| (*e.key(), *e.value())).collect();
        trips.sort();
        for (reason, n) in trips {
            info!("  trip {reason}: {n}");
        }
        info!("═══════════════════════════════════════");
    }
}
