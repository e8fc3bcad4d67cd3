//! Completion Metrics Collection
//!
//! Aggregates completion usage per pipeline stage. Every call routed through
//! the gateway is recorded under the stage label the caller supplied, so a
//! run summary can show where tokens and wall-clock time went.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::ai::provider::TokenUsage;

// =============================================================================
// Metrics Collector
// =============================================================================

/// Thread-safe metrics collector for one pipeline run.
pub struct MetricsCollector {
    run_id: String,
    start_time: Instant,
    calls: AtomicU32,
    failures: AtomicU32,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    total_latency_ms: AtomicU64,
    stages: RwLock<Vec<StageMetrics>>,
}

/// Usage attributed to one stage label
#[derive(Debug, Clone, Default)]
pub struct StageMetrics {
    pub name: String,
    pub calls: u32,
    pub failures: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub run_id: String,
    pub total_duration_ms: u64,
    pub calls: u32,
    pub failures: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub avg_latency_ms: f64,
    pub stages: Vec<StageMetrics>,
}

pub type SharedMetrics = Arc<MetricsCollector>;

pub fn create_shared_metrics(run_id: impl Into<String>) -> SharedMetrics {
    Arc::new(MetricsCollector::new(run_id))
}

impl MetricsCollector {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            start_time: Instant::now(),
            calls: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            stages: RwLock::new(Vec::new()),
        }
    }

    /// Record a successful call
    pub fn record(&self, stage: &str, usage: &TokenUsage, latency_ms: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(usage.input_tokens as u64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens as u64, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);

        self.with_stage(stage, |s| {
            s.calls += 1;
            s.input_tokens += usage.input_tokens as u64;
            s.output_tokens += usage.output_tokens as u64;
            s.latency_ms += latency_ms;
        });
    }

    /// Record a failed call
    pub fn record_failure(&self, stage: &str) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.with_stage(stage, |s| {
            s.calls += 1;
            s.failures += 1;
        });
    }

    fn with_stage(&self, stage: &str, update: impl FnOnce(&mut StageMetrics)) {
        let mut stages = self.stages.write().unwrap_or_else(|poisoned| {
            tracing::error!("Metrics stages RwLock poisoned, recovering");
            poisoned.into_inner()
        });
        if let Some(entry) = stages.iter_mut().find(|s| s.name == stage) {
            update(entry);
        } else {
            let mut entry = StageMetrics {
                name: stage.to_string(),
                ..Default::default()
            };
            update(&mut entry);
            stages.push(entry);
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let calls = self.calls.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let succeeded = calls.saturating_sub(failures);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        let stages = self
            .stages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        MetricsSummary {
            run_id: self.run_id.clone(),
            total_duration_ms: self.start_time.elapsed().as_millis() as u64,
            calls,
            failures,
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            avg_latency_ms: if succeeded > 0 {
                total_latency as f64 / succeeded as f64
            } else {
                0.0
            },
            stages,
        }
    }
}

impl MetricsSummary {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Format summary for display
    pub fn display(&self) -> String {
        let mut out = format!(
            "Run: {}\n\
             Duration: {:.1}s\n\
             Completion calls: {} ({} failed)\n\
             Tokens: {} (input: {}, output: {})\n\
             Avg latency: {:.0}ms",
            self.run_id,
            self.total_duration_ms as f64 / 1000.0,
            self.calls,
            self.failures,
            self.total_tokens(),
            self.input_tokens,
            self.output_tokens,
            self.avg_latency_ms,
        );
        for stage in &self.stages {
            out.push_str(&format!(
                "\n  {:<16} {:>3} calls  {:>8} tokens  {:.1}s",
                stage.name,
                stage.calls,
                stage.input_tokens + stage.output_tokens,
                stage.latency_ms as f64 / 1000.0
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u32, output: u32) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn test_records_per_stage() {
        let metrics = MetricsCollector::new("run-1");
        metrics.record("outline", &usage(100, 50), 200);
        metrics.record("assemble", &usage(300, 900), 1000);
        metrics.record("assemble", &usage(200, 800), 600);
        metrics.record_failure("critique");

        let summary = metrics.summary();
        assert_eq!(summary.calls, 4);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.total_tokens(), 2350);
        assert_eq!(summary.stages.len(), 3);

        let assemble = summary.stages.iter().find(|s| s.name == "assemble").unwrap();
        assert_eq!(assemble.calls, 2);
        assert_eq!(assemble.output_tokens, 1700);
        assert!((summary.avg_latency_ms - 600.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_display_lists_stages() {
        let metrics = MetricsCollector::new("run-2");
        metrics.record("citations", &usage(10, 10), 10);
        let text = metrics.summary().display();
        assert!(text.contains("Run: run-2"));
        assert!(text.contains("citations"));
    }
}
