//! Prometheus exporter.
//!
//! Library crates record through the `metrics` facade (see
//! `bazaar_core::metrics`); this module installs the recorder and the HTTP
//! listener that serves it.

use std::net::SocketAddr;

use bazaar_core::metrics::names;
use metrics::{Unit, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Installs the Prometheus recorder with an HTTP listener. Must run inside
/// the tokio runtime. Returns whether the exporter is active.
pub fn init_metrics(config: &MetricsConfig) -> bool {
    if !config.enabled {
        tracing::info!("Metrics exporter disabled");
        return false;
    }

    let addr: SocketAddr = match config.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(listen = %config.listen, error = %e, "Invalid metrics listen address");
            return false;
        }
    };

    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(%addr, "Prometheus metrics exporter listening");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

fn describe_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, Unit::Count, "Cache reads answered from the store");
    describe_counter!(names::CACHE_MISSES_TOTAL, Unit::Count, "Cache reads that found no entry");
    describe_counter!(
        names::CACHE_REBUILDS_TOTAL,
        Unit::Count,
        "Logical-expiration rebuilds by outcome"
    );
    describe_counter!(
        names::LOCK_ACQUISITIONS_TOTAL,
        Unit::Count,
        "Distributed lock attempts by outcome"
    );
    describe_counter!(
        names::SECKILL_ADMISSIONS_TOTAL,
        Unit::Count,
        "Seckill admission decisions by outcome"
    );
    describe_counter!(
        names::ORDER_QUEUE_ENTRIES_TOTAL,
        Unit::Count,
        "Order stream entries handled by outcome"
    );
}
