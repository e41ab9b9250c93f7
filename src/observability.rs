use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub steps: BTreeMap<String, StepMetrics>,
    pub total_duration_ms: f64,
    pub runs_completed: u64,
    pub runs_failed: u64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StepMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

/// Shared timing counters. Clones observe the same snapshot.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts timing a step. The duration is recorded when the timer is
    /// finished or dropped, whichever comes first.
    pub fn start_step(&self, step_name: &str) -> StepTimer {
        StepTimer {
            step: step_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            failed: false,
            recorded: false,
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn record_run_completed(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.runs_completed += 1;
        }
    }

    pub fn record_run_failed(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.runs_failed += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

pub struct StepTimer {
    step: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    failed: bool,
    recorded: bool,
}

impl StepTimer {
    /// Marks the timed step as failed.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    /// Records the step and returns its elapsed time.
    pub fn finish(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let duration = self.started_at.elapsed();
        if self.recorded {
            return duration;
        }
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.steps.entry(self.step.clone()).or_default();
            metrics.calls += 1;
            if self.failed {
                metrics.failures += 1;
            }
            let duration_ms = duration.as_secs_f64() * 1_000.0;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            step = self.step.as_str(),
            duration_ms = duration.as_secs_f64() * 1_000.0,
            "Step duration recorded"
        );
        self.recorded = true;
        duration
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        step_count = snapshot.steps.len(),
        runs_completed = snapshot.runs_completed,
        runs_failed = snapshot.runs_failed,
        "Pipeline metrics summary"
    );
    for (step, metrics) in &snapshot.steps {
        info!(
            step = step.as_str(),
            calls = metrics.calls,
            failures = metrics.failures,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Step metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        output.push_str("# HELP tinypipeline_runs_completed_total Pipeline runs that completed every step\n");
        output.push_str("# TYPE tinypipeline_runs_completed_total counter\n");
        output.push_str(&format!(
            "tinypipeline_runs_completed_total {}\n",
            self.runs_completed
        ));
        output.push_str("# HELP tinypipeline_runs_failed_total Pipeline runs that stopped on a failure\n");
        output.push_str("# TYPE tinypipeline_runs_failed_total counter\n");
        output.push_str(&format!(
            "tinypipeline_runs_failed_total {}\n",
            self.runs_failed
        ));
        output.push_str("# HELP tinypipeline_step_calls_total Step invocation count\n");
        output.push_str("# TYPE tinypipeline_step_calls_total counter\n");
        output.push_str("# HELP tinypipeline_step_failures_total Step failure count\n");
        output.push_str("# TYPE tinypipeline_step_failures_total counter\n");
        output.push_str(
            "# HELP tinypipeline_step_duration_seconds_total Accumulated step duration in seconds\n",
        );
        output.push_str("# TYPE tinypipeline_step_duration_seconds_total counter\n");
        output.push_str(
            "# HELP tinypipeline_step_duration_seconds_max Maximum step duration in seconds\n",
        );
        output.push_str("# TYPE tinypipeline_step_duration_seconds_max gauge\n");
        for (step, metrics) in &self.steps {
            output.push_str(&format!(
                "tinypipeline_step_calls_total{{step=\"{}\"}} {}\n",
                step, metrics.calls
            ));
            output.push_str(&format!(
                "tinypipeline_step_failures_total{{step=\"{}\"}} {}\n",
                step, metrics.failures
            ));
            output.push_str(&format!(
                "tinypipeline_step_duration_seconds_total{{step=\"{}\"}} {:.6}\n",
                step,
                metrics.total_duration_ms / 1_000.0
            ));
            output.push_str(&format!(
                "tinypipeline_step_duration_seconds_max{{step=\"{}\"}} {:.6}\n",
                step,
                metrics.max_duration_ms / 1_000.0
            ));
        }
        output.push_str("# HELP tinypipeline_run_duration_seconds Duration of the last pipeline run\n");
        output.push_str("# TYPE tinypipeline_run_duration_seconds gauge\n");
        output.push_str(&format!(
            "tinypipeline_run_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}
