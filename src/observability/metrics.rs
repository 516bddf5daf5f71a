//! Metrics collection and exposition.
//!
//! # Metrics
//! - `harbormaster_syncs_total` (counter): balancer syncs by balancer, result
//! - `harbormaster_restarts_total` (counter): balancer restarts by result
//! - `harbormaster_control_commands_total` (counter): live socket commands by command, result
//! - `harbormaster_check_results_total` (counter): probe outcomes by service, check, result
//! - `harbormaster_reports_total` (counter): membership records published/retracted
//! - `harbormaster_cluster_nodes` (gauge): nodes currently known per cluster

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

fn result_label(success: bool) -> &'static str {
    if success {
        "ok"
    } else {
        "error"
    }
}

pub fn record_sync(balancer: &str, success: bool) {
    metrics::counter!(
        "harbormaster_syncs_total",
        "balancer" => balancer.to_string(),
        "result" => result_label(success)
    )
    .increment(1);
}

pub fn record_restart(success: bool) {
    metrics::counter!("harbormaster_restarts_total", "result" => result_label(success)).increment(1);
}

pub fn record_control_command(command: &'static str, success: bool) {
    metrics::counter!(
        "harbormaster_control_commands_total",
        "command" => command,
        "result" => result_label(success)
    )
    .increment(1);
}

pub fn record_check_result(service: &str, check: &str, passed: bool) {
    metrics::counter!(
        "harbormaster_check_results_total",
        "service" => service.to_string(),
        "check" => check.to_string(),
        "result" => if passed { "pass" } else { "fail" }
    )
    .increment(1);
}

pub fn record_report(direction: &'static str) {
    metrics::counter!("harbormaster_reports_total", "direction" => direction).increment(1);
}

pub fn record_cluster_nodes(cluster: &str, count: usize) {
    metrics::gauge!("harbormaster_cluster_nodes", "cluster" => cluster.to_string()).set(count as f64);
}
