//! Per-operator metrics collected by the driver.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Metrics for a single operator slot of a driver.
#[derive(Debug, Clone, Default)]
pub struct OperatorMetrics {
    /// Positions received through `add_input`.
    pub rows_in: u64,
    /// Positions emitted through `get_output`.
    pub rows_out: u64,
    /// Time spent in `get_output`.
    pub exec_time: Duration,
    /// Peak accountant usage observed after this operator ran.
    pub memory_bytes: usize,
    /// Pages emitted.
    pub pages: u64,
}

impl OperatorMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rows_in: 0,
            rows_out: 0,
            exec_time: Duration::new(0, 0),
            memory_bytes: 0,
            pages: 0,
        }
    }

    pub fn add_rows_in(&mut self, count: usize) {
        self.rows_in += count as u64;
    }

    pub fn add_rows_out(&mut self, count: usize) {
        self.rows_out += count as u64;
    }

    pub fn add_time(&mut self, duration: Duration) {
        self.exec_time += duration;
    }

    pub fn add_page(&mut self) {
        self.pages += 1;
    }

    pub fn update_memory(&mut self, bytes: usize) {
        self.memory_bytes = self.memory_bytes.max(bytes);
    }

    /// Get selectivity (`rows_out` / `rows_in`).
    pub fn selectivity(&self) -> f64 {
        if self.rows_in == 0 {
            1.0
        } else {
            self.rows_out as f64 / self.rows_in as f64
        }
    }
}

impl std::fmt::Display for OperatorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rows_in={}, rows_out={}, time={:?}, memory={}B, pages={}",
            self.rows_in, self.rows_out, self.exec_time, self.memory_bytes, self.pages
        )
    }
}

/// Shared sink the driver records into, keyed `"<index>:<operator name>"`.
#[derive(Debug, Clone, Default)]
pub struct MetricsSink {
    metrics: Arc<RwLock<HashMap<String, OperatorMetrics>>>,
}

impl MetricsSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update metrics for an operator using a closure.
    pub fn update<F>(&self, operator_id: &str, f: F)
    where
        F: FnOnce(&mut OperatorMetrics),
    {
        let mut guard = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        f(guard.entry(operator_id.to_string()).or_default());
    }

    pub fn get(&self, operator_id: &str) -> Option<OperatorMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operator_id)
            .cloned()
    }

    pub fn all(&self) -> HashMap<String, OperatorMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn total_rows_in(&self) -> u64 {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|m| m.rows_in)
            .sum()
    }

    /// One line per operator slot, in slot order.
    pub fn format_analyze(&self) -> String {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<_> = metrics.iter().collect();
        entries.sort_by_key(|(key, _)| slot_index(key));

        let mut output = String::new();
        for (op, m) in entries {
            let _ = writeln!(output, "{op}: {m}");
        }
        if output.is_empty() {
            output.push_str("No metrics collected.\n");
        }
        output
    }
}

fn slot_index(key: &str) -> usize {
    key.split(':').next().and_then(|i| i.parse().ok()).unwrap_or(usize::MAX)
}

/// Timer for measuring operator execution time.
#[derive(Debug)]
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    #[must_use]
    pub fn stop(self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for ExecutionTimer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_metrics() {
        let mut metrics = OperatorMetrics::new();
        metrics.add_rows_in(1000);
        metrics.add_rows_out(500);
        metrics.add_page();
        assert_eq!(metrics.pages, 1);
        assert!((metrics.selectivity() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_metrics_update_accumulates() {
        let sink = MetricsSink::new();
        sink.update("1:LimitOperator", |m| m.add_rows_in(100));
        sink.update("1:LimitOperator", |m| m.add_rows_in(50));
        assert_eq!(sink.get("1:LimitOperator").unwrap().rows_in, 150);
        assert_eq!(sink.total_rows_in(), 150);
    }

    #[test]
    fn test_format_analyze_orders_by_slot() {
        let sink = MetricsSink::new();
        sink.update("10:PageConsumerOperator", |m| m.add_rows_in(1));
        sink.update("2:LimitOperator", |m| m.add_rows_in(1));
        let report = sink.format_analyze();
        let limit = report.find("2:LimitOperator").unwrap();
        let consumer = report.find("10:PageConsumerOperator").unwrap();
        assert!(limit < consumer);
        assert_eq!(MetricsSink::new().format_analyze(), "No metrics collected.\n");
    }
}
