//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    // Service lifecycle
    describe_counter!("deploy_service_starts_total", "Start attempts issued (by service)");
    describe_counter!(
        "deploy_service_failures_total",
        "Services that ended a run Failed (by service, stage)"
    );
    describe_histogram!(
        "deploy_service_ready_seconds",
        "Time from first start to Ready (by service)"
    );

    // Probing
    describe_counter!("deploy_probe_attempts_total", "Readiness check attempts (by kind)");

    // Certificates
    describe_counter!("deploy_acme_requests_total", "ACME client invocations (by result)");
}

pub fn record_start(service: &str) {
    counter!("deploy_service_starts_total", "service" => service.to_string()).increment(1);
}

pub fn record_ready(service: &str, duration_secs: f64) {
    histogram!("deploy_service_ready_seconds", "service" => service.to_string())
        .record(duration_secs);
}

pub fn record_failure(service: &str, stage: &str) {
    counter!(
        "deploy_service_failures_total",
        "service" => service.to_string(),
        "stage" => stage.to_string()
    )
    .increment(1);
}

pub fn record_probe_attempt(kind: &'static str) {
    counter!("deploy_probe_attempts_total", "kind" => kind).increment(1);
}

pub fn record_acme_request(result: &'static str) {
    counter!("deploy_acme_requests_total", "result" => result).increment(1);
}
