//! Replica metrics
//!
//! Prometheus-compatible counters and latency histograms for:
//! - administrative operations (per operation name)
//! - data-plane bytes read/written

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as microseconds
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, last entry is +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics for one administrative operation
#[derive(Debug, Default)]
pub struct OperationMetrics {
    pub calls_total: Counter,
    pub calls_error: Counter,
    pub latency: Histogram,
}

/// Metrics registry owned by a replica coordinator
#[derive(Debug, Default)]
pub struct ReplicaMetrics {
    operations: Mutex<HashMap<&'static str, Arc<OperationMetrics>>>,

    pub bytes_read: Counter,
    pub bytes_written: Counter,
    pub io_errors: Counter,
}

impl ReplicaMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create metrics for an operation
    pub fn operation(&self, name: &'static str) -> Arc<OperationMetrics> {
        let mut ops = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ops.entry(name).or_default().clone()
    }

    /// Record one administrative call
    pub fn record_operation(&self, name: &'static str, duration: Duration, success: bool) {
        let op = self.operation(name);
        op.calls_total.inc();
        op.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            op.calls_error.inc();
        }
    }

    /// Render in Prometheus text exposition format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        // Writing into a String cannot fail
        let _ = self.write_prometheus(&mut out);
        out
    }

    fn write_prometheus(&self, out: &mut String) -> std::fmt::Result {
        use std::fmt::Write;

        out.push_str("# HELP minivol_bytes_read_total Total bytes read\n");
        out.push_str("# TYPE minivol_bytes_read_total counter\n");
        writeln!(out, "minivol_bytes_read_total {}", self.bytes_read.get())?;

        out.push_str("# HELP minivol_bytes_written_total Total bytes written\n");
        out.push_str("# TYPE minivol_bytes_written_total counter\n");
        writeln!(out, "minivol_bytes_written_total {}", self.bytes_written.get())?;

        out.push_str("# HELP minivol_io_errors_total Failed reads and writes\n");
        out.push_str("# TYPE minivol_io_errors_total counter\n");
        writeln!(out, "minivol_io_errors_total {}", self.io_errors.get())?;

        let ops = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = ops.keys().copied().collect();
        names.sort_unstable();

        out.push_str("# HELP minivol_operations_total Administrative calls per operation\n");
        out.push_str("# TYPE minivol_operations_total counter\n");
        for name in &names {
            writeln!(
                out,
                "minivol_operations_total{{op=\"{}\"}} {}",
                name,
                ops[name].calls_total.get()
            )?;
        }

        out.push_str("# HELP minivol_operation_errors_total Failed calls per operation\n");
        out.push_str("# TYPE minivol_operation_errors_total counter\n");
        for name in &names {
            writeln!(
                out,
                "minivol_operation_errors_total{{op=\"{}\"}} {}",
                name,
                ops[name].calls_error.get()
            )?;
        }

        out.push_str("# HELP minivol_operation_duration_ms Operation duration in milliseconds\n");
        out.push_str("# TYPE minivol_operation_duration_ms histogram\n");
        for name in &names {
            let latency = &ops[name].latency;
            for (le, count) in latency.get_buckets() {
                if le.is_infinite() {
                    writeln!(
                        out,
                        "minivol_operation_duration_ms_bucket{{op=\"{}\",le=\"+Inf\"}} {}",
                        name, count
                    )?;
                } else {
                    writeln!(
                        out,
                        "minivol_operation_duration_ms_bucket{{op=\"{}\",le=\"{}\"}} {}",
                        name, le, count
                    )?;
                }
            }
            writeln!(
                out,
                "minivol_operation_duration_ms_sum{{op=\"{}\"}} {}",
                name,
                latency.sum()
            )?;
            writeln!(
                out,
                "minivol_operation_duration_ms_count{{op=\"{}\"}} {}",
                name,
                latency.count()
            )?;
        }

        Ok(())
    }
}
