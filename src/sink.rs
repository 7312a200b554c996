//! Persistence of backtest output.
//!
//! The engine hands every rebalance decision, the daily curve and the final
//! metrics to an [`EventSink`] and does not wait on or inspect the outcome.

use crate::analytics::PerformanceMetrics;
use crate::types::{EquityPoint, RebalanceEvent};

/// Fire-and-forget receiver for backtest output.
pub trait EventSink {
    fn record_event(&mut self, event: &RebalanceEvent);

    fn record_daily(&mut self, points: &[EquityPoint]);

    fn record_metrics(&mut self, metrics: &PerformanceMetrics);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record_event(&mut self, _event: &RebalanceEvent) {}

    fn record_daily(&mut self, _points: &[EquityPoint]) {}

    fn record_metrics(&mut self, _metrics: &PerformanceMetrics) {}
}

/// Keeps everything in memory, mostly for tests and inspection.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub events: Vec<RebalanceEvent>,
    pub daily: Vec<EquityPoint>,
    pub metrics: Option<PerformanceMetrics>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for MemorySink {
    fn record_event(&mut self, event: &RebalanceEvent) {
        self.events.push(event.clone());
    }

    fn record_daily(&mut self, points: &[EquityPoint]) {
        self.daily.extend_from_slice(points);
    }

    fn record_metrics(&mut self, metrics: &PerformanceMetrics) {
        self.metrics = Some(metrics.clone());
    }
}
