//! Prometheus counters for order and ledger activity, exposed at `/metrics`.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::errors::ServiceError;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ORDERS_CREATED: IntCounterVec = IntCounterVec::new(
        Opts::new("orders_created_total", "Total number of orders created"),
        &["order_type"]
    )
    .expect("metric can be created");
    pub static ref ORDER_STATUS_UPDATES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_status_updates_total",
            "Total number of applied order status updates"
        ),
        &["order_type", "status"]
    )
    .expect("metric can be created");
    pub static ref ORDER_STATUS_UPDATE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_status_update_failures_total",
            "Total number of rejected or failed order status updates"
        ),
        &["order_type"]
    )
    .expect("metric can be created");
    pub static ref LEDGER_POSTINGS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "inventory_ledger_postings_total",
            "Total number of inventory activity rows appended"
        ),
        &["tier", "reason"]
    )
    .expect("metric can be created");
    pub static ref LEDGER_DUPLICATE_POSTINGS: IntCounter = IntCounter::new(
        "inventory_ledger_duplicate_postings_total",
        "Order line postings skipped because they were already applied"
    )
    .expect("metric can be created");
    pub static ref EVENTS_DROPPED: IntCounter = IntCounter::new(
        "domain_events_dropped_total",
        "Domain events discarded because the event channel was full or closed"
    )
    .expect("metric can be created");
}

fn register_all() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ORDERS_CREATED.clone()),
        Box::new(ORDER_STATUS_UPDATES.clone()),
        Box::new(ORDER_STATUS_UPDATE_FAILURES.clone()),
        Box::new(LEDGER_POSTINGS.clone()),
        Box::new(LEDGER_DUPLICATE_POSTINGS.clone()),
        Box::new(EVENTS_DROPPED.clone()),
    ];
    for collector in collectors {
        // AlreadyReg on repeat calls is expected
        let _ = REGISTRY.register(collector);
    }
}

/// Renders every registered metric in the Prometheus text format.
pub async fn metrics_handler() -> Result<String, ServiceError> {
    register_all();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics are not utf-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exposes_counters_in_text_format() {
        ORDERS_CREATED.with_label_values(&["SECONDARY_ORDER"]).inc();
        let body = metrics_handler().await.unwrap();
        assert!(body.contains("orders_created_total"));
        assert!(body.contains("order_type=\"SECONDARY_ORDER\""));
    }
}
