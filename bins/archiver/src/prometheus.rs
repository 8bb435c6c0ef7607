//! Prometheus endpoint for multi-topic mode.

use std::net::{Ipv4Addr, SocketAddr};

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::ArchiverError;

/// Start the exporter's HTTP listener on every interface and describe the
/// archive counters. Does nothing when the port is disabled.
pub fn install(config: &MetricsConfig) -> Result<(), ArchiverError> {
    let Some(port) = config.port else {
        tracing::debug!("prometheus export disabled");
        return Ok(());
    };
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    let (files, messages) = counter_names(&config.prefix);
    metrics::describe_counter!(files, "The number of files processed.");
    metrics::describe_counter!(messages, "The number of messages processed.");

    tracing::info!(target: "prometheus", addr = %addr, "serving metrics");
    Ok(())
}

fn counter_names(prefix: &str) -> (String, String) {
    (format!("{prefix}file_count"), format!("{prefix}message_count"))
}
