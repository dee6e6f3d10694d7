//! Observability collaborator
//!
//! Orchestrator and scheduler take an injected `Monitor` instead of
//! reaching for global logger/metrics singletons. The default
//! implementation forwards to `tracing`; tests inject a recording one.

use std::sync::Arc;
use std::time::Instant;

/// Sink for structured log lines and metric samples.
pub trait Monitor: Send + Sync {
    fn log(&self, message: &str, run_id: &str);
    fn record(&self, metric: &str, value: f64, labels: &[(&str, &str)]);
}

/// Default monitor: everything goes to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingMonitor;

impl Monitor for TracingMonitor {
    fn log(&self, message: &str, run_id: &str) {
        tracing::info!(run_id, "{message}");
    }

    fn record(&self, metric: &str, value: f64, labels: &[(&str, &str)]) {
        tracing::debug!(metric, value, ?labels, "metric");
    }
}

/// Trace one stage execution: start/finish logs plus duration and result
/// metrics, success or failure alike.
pub async fn trace_execution<T, E, F>(
    monitor: &Arc<dyn Monitor>,
    stage: &str,
    run_id: &str,
    fut: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    monitor.log(&format!("stage {stage} starting"), run_id);
    let started = Instant::now();
    let result = fut.await;
    let duration_ms = started.elapsed().as_millis() as f64;

    monitor.record("execution_time", duration_ms, &[("stage", stage)]);
    match &result {
        Ok(_) => {
            monitor.record("execution_result", 1.0, &[("stage", stage)]);
            monitor.log(&format!("stage {stage} completed in {duration_ms:.0}ms"), run_id);
        }
        Err(e) => {
            monitor.record("execution_result", 0.0, &[("stage", stage)]);
            monitor.log(&format!("stage {stage} failed: {e}"), run_id);
        }
    }

    result
}
