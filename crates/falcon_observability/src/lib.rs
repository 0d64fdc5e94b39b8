//! Observability setup for the isolation tester: structured logging and
//! Prometheus metrics.
//!
//! Logs always go to stderr. Stdout is reserved for the permutation trace,
//! which is diffed against expected output files.

use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` is used.
pub fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize Prometheus metrics exporter.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record one executed permutation of a spec.
pub fn record_permutation(spec_name: &str) {
    metrics::counter!("falcon_isolation_permutations_total", "spec" => spec_name.to_string())
        .increment(1);
}

/// Record how a step resolved.
/// `outcome` should be one of: "completed", "failed", "blocked".
pub fn record_step_outcome(outcome: &str) {
    metrics::counter!("falcon_isolation_steps_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// Record a cancellation request sent for a step that did not finish in time.
pub fn record_cancel_request() {
    metrics::counter!("falcon_isolation_cancel_requests_total").increment(1);
}

/// Record the time a step spent waiting for its result, in microseconds.
pub fn record_step_wait(waited: Duration) {
    metrics::histogram!("falcon_isolation_step_wait_us").record(duration_us(waited) as f64);
}

/// Whole microseconds in `d`, saturating at `u64::MAX`.
fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_us_saturates() {
        assert_eq!(duration_us(Duration::from_millis(20)), 20_000);
        assert_eq!(duration_us(Duration::from_nanos(999)), 0);
        assert_eq!(duration_us(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_recording_without_exporter_is_noop() {
        record_step_wait(Duration::from_secs(75));
        record_step_outcome("completed");
        record_cancel_request();
    }
}
