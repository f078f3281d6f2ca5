//! Prometheus metrics for the provisioning control plane.

use metrics::{counter, histogram};

/// Record an accepted create request.
pub fn store_create_accepted() {
    counter!("urumi_stores_created_total").increment(1);
}

/// Record a pipeline that reached the ready state.
pub fn store_provisioned(duration_secs: f64) {
    counter!("urumi_stores_provisioned_total").increment(1);
    histogram!("urumi_provisioning_duration_seconds").record(duration_secs);
}

/// Record a pipeline failure in a given phase.
pub fn store_failed(phase: &str) {
    counter!("urumi_stores_failed_total", "phase" => phase.to_string()).increment(1);
}

/// Record a completed deletion.
pub fn store_deleted() {
    counter!("urumi_stores_deleted_total").increment(1);
}

/// Record the duration of one pipeline phase.
pub fn phase_completed(phase: &str, duration_secs: f64) {
    histogram!("urumi_phase_duration_seconds", "phase" => phase.to_string()).record(duration_secs);
}

/// Record a repository error.
pub fn db_error(operation: &str) {
    counter!("urumi_db_errors_total", "operation" => operation.to_string()).increment(1);
}

/// Record a rate-limited request.
pub fn rate_limited(endpoint: &'static str) {
    counter!("urumi_rate_limited_total", "endpoint" => endpoint).increment(1);
}
