use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::info;

use crate::pipeline::Stage;

/// Rolling latency histograms, one per pipeline stage.
pub struct LatencyTracker {
    histograms: dashmap::DashMap<Stage, VecDeque<Duration>>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            histograms: dashmap::DashMap::new(),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record(&self, stage: Stage, duration: Duration) {
        let max = self.max_samples;
        self.histograms
            .entry(stage)
            .and_modify(|hist| {
                if hist.len() >= max {
                    hist.pop_front();
                }
                hist.push_back(duration);
            })
            .or_insert_with(|| {
                let mut dq = VecDeque::with_capacity(max);
                dq.push_back(duration);
                dq
            });
    }

    /// Start a timer that records into `stage` on drop.
    pub fn start_timer(&self, stage: Stage) -> Timer<'_> {
        Timer {
            stage,
            start: Instant::now(),
            tracker: self,
        }
    }

    pub fn samples(&self, stage: Stage) -> usize {
        self.histograms.get(&stage).map(|h| h.len()).unwrap_or(0)
    }

    /// p50, p95, p99 for a stage.
    pub fn percentiles(&self, stage: Stage) -> Option<(Duration, Duration, Duration)> {
        let hist = self.histograms.get(&stage)?;
        if hist.is_empty() {
            return None;
        }

        let mut sorted: Vec<Duration> = hist.iter().copied().collect();
        sorted.sort();

        let len = sorted.len();
        let last = len - 1;
        let p50 = sorted[len / 2];
        let p95 = sorted[((len as f64 * 0.95) as usize).min(last)];
        let p99 = sorted[((len as f64 * 0.99) as usize).min(last)];

        Some((p50, p95, p99))
    }

    pub fn log_summary(&self) {
        let mut stages: Vec<Stage> = self.histograms.iter().map(|e| *e.key()).collect();
        stages.sort();
        for stage in stages {
            if let Some((p50, p95, p99)) = self.percentiles(stage) {
                info!(
                    "Latency [{}]: p50={:.2}ms p95={:.2}ms p99={:.2}ms samples={}",
                    stage,
                    p50.as_secs_f64() * 1000.0,
                    p95.as_secs_f64() * 1000.0,
                    p99.as_secs_f64() * 1000.0,
                    self.samples(stage),
                );
            }
        }
    }
}

pub struct Timer<'a> {
    stage: Stage,
    start: Instant,
    tracker: &'a LatencyTracker,
}

impl<'a> Drop for Timer<'a> {
    fn drop(&mut self) {
        self.tracker.record(self.stage, self.start.elapsed());
    }
}
