//! In-process latency histograms.
//! Translator calls and batches are timed; p50/p95/p99 feed the completion log.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

/// Fixed-capacity ring buffer for histogram samples.
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

/// Histograms for all named metrics, values in milliseconds.
pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(ring_capacity: usize) -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            ring_capacity: ring_capacity.max(1),
        }
    }

    pub fn record(&self, name: &'static str, value_ms: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value_ms);
        tracing::trace!(metric = name, value_ms, "metric_recorded");
    }

    /// Record the time elapsed since `start`.
    pub fn record_since(&self, name: &'static str, start: Instant) {
        self.record(name, start.elapsed().as_secs_f64() * 1000.0);
    }

    /// Percentile (0-100) for a metric, 0.0 when nothing was recorded.
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.histograms
            .lock()
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    pub fn count(&self, name: &str) -> usize {
        self.histograms.lock().get(name).map(|r| r.count).unwrap_or(0)
    }

    pub fn summary(&self, name: &str) -> MetricSummary {
        let hists = self.histograms.lock();
        match hists.get(name) {
            Some(ring) => MetricSummary {
                p50_ms: ring.percentile(50.0),
                p95_ms: ring.percentile(95.0),
                p99_ms: ring.percentile(99.0),
                count: ring.count,
            },
            None => MetricSummary::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct MetricSummary {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: usize,
}

/// Well-known metric names.
pub mod metric_names {
    pub const TRANSLATE_CALL: &str = "t_translate_call";
    pub const BATCH: &str = "t_batch";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let m = MetricsRegistry::new();
        for v in 1..=100 {
            m.record(metric_names::TRANSLATE_CALL, v as f64);
        }
        let s = m.summary(metric_names::TRANSLATE_CALL);
        assert_eq!(s.count, 100);
        assert_eq!(s.p50_ms, 51.0);
        assert_eq!(s.p99_ms, 99.0);
    }

    #[test]
    fn ring_keeps_latest_samples() {
        let m = MetricsRegistry::with_capacity(2);
        for v in [100.0, 1.0, 2.0] {
            m.record(metric_names::BATCH, v);
        }
        assert_eq!(m.count(metric_names::BATCH), 2);
        assert_eq!(m.percentile(metric_names::BATCH, 100.0), 2.0);
    }

    #[test]
    fn unknown_metric_is_zero() {
        let m = MetricsRegistry::new();
        assert_eq!(m.summary("nope"), MetricSummary::default());
    }
}
