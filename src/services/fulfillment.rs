//! Status changes for every order type, and the stock they move.
//!
//! The conditional status write and one ledger posting per line item share a
//! transaction. Postings run under a deadline so a stalled ledger fails the
//! request with a retryable error instead of holding the order row.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait};
use serde_json::Value;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ReceiptQuantity;
use crate::entities::order::{self, Entity as OrderEntity};
use crate::entities::order_line_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{ORDER_STATUS_UPDATES, ORDER_STATUS_UPDATE_FAILURES};
use crate::models::{OrderKind, OrderStatus, ReceivingParty, Transition};
use crate::services::directory::Directory;
use crate::services::inventory_ledger::{InventoryLedger, PostingOutcome, StockPosting};
use crate::services::orders::{load_order, whole_quantity, OrderView, ViewAssembler};

/// Runs `work` under `limit`; an elapsed deadline becomes a retryable
/// `ServiceUnavailable`.
pub async fn with_ledger_deadline<T, F>(limit: Duration, work: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_ms = limit.as_millis() as u64, "ledger posting timed out");
            Err(ServiceError::ServiceUnavailable(format!(
                "inventory ledger did not respond within {}ms",
                limit.as_millis()
            )))
        }
    }
}

/// Extracts the target status from a PATCH body. Only `status` may be sent.
pub fn parse_status_change(changes: &Value) -> Result<OrderStatus, ServiceError> {
    let fields = changes.as_object().ok_or_else(|| {
        ServiceError::ValidationError("request body must be a JSON object".to_string())
    })?;
    if let Some(field) = fields.keys().find(|k| k.as_str() != "status") {
        return Err(ServiceError::InvalidOperation(format!(
            "only status can be updated, got {}",
            field
        )));
    }
    let raw = fields
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::ValidationError("status is required".to_string()))?;
    OrderStatus::from_str(raw)
        .map_err(|_| ServiceError::ValidationError(format!("unknown status {}", raw)))
}

pub struct FulfillmentOrchestrator {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn Directory>,
    event_sender: Arc<EventSender>,
    ledger_timeout: Duration,
    receipt_quantity: ReceiptQuantity,
}

impl FulfillmentOrchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        directory: Arc<dyn Directory>,
        event_sender: Arc<EventSender>,
        ledger_timeout: Duration,
        receipt_quantity: ReceiptQuantity,
    ) -> Self {
        Self {
            db,
            directory,
            event_sender,
            ledger_timeout,
            receipt_quantity,
        }
    }

    /// Applies a status change set to an order of kind `K`.
    ///
    /// Re-sending the order's current status is a no-op that returns the
    /// order unchanged, so a retried REACHED_DESTINATION never posts twice.
    #[instrument(skip(self, changes), fields(order_type = %K::ORDER_TYPE))]
    pub async fn update_status<K: OrderKind>(
        &self,
        order_id: Uuid,
        changes: &Value,
        actor: &str,
    ) -> Result<OrderView, ServiceError> {
        match self.apply::<K>(order_id, changes, actor).await {
            Ok(view) => Ok(view),
            Err(e) => {
                ORDER_STATUS_UPDATE_FAILURES
                    .with_label_values(&[K::ORDER_TYPE.as_ref()])
                    .inc();
                Err(e)
            }
        }
    }

    async fn apply<K: OrderKind>(
        &self,
        order_id: Uuid,
        changes: &Value,
        actor: &str,
    ) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;
        let loaded = load_order::<K, _>(&txn, order_id).await?;
        let target = parse_status_change(changes)?;

        let transition = loaded.plan_transition(target)?;
        let (from, to) = match transition {
            Transition::Unchanged => {
                txn.rollback().await?;
                info!(%order_id, status = %target, "status unchanged");
                return ViewAssembler::new(self.directory.as_ref())
                    .assemble(loaded.order, loaded.line_items)
                    .await;
            }
            Transition::Apply { from, to } => (from, to),
        };
        let receiver = loaded.receiving_party()?;

        let written = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(to.to_string()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::UpdatedBy,
                Expr::value(Some(actor.to_string())),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(from.to_string()))
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, %order_id, "Failed to write order status");
                ServiceError::from(e)
            })?;
        if written.rows_affected == 0 {
            warn!(%order_id, expected = %from, "order status changed concurrently");
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        let mut received = Vec::new();
        if transition.receives_stock() {
            let postings = self.receipt_postings(order_id, receiver, &loaded.line_items, actor)?;
            received = with_ledger_deadline(self.ledger_timeout, async {
                let mut outcomes: Vec<(StockPosting, PostingOutcome)> =
                    Vec::with_capacity(postings.len());
                for posting in postings {
                    let outcome = InventoryLedger::increment_in(&txn, &posting).await?;
                    outcomes.push((posting, outcome));
                }
                Ok::<_, ServiceError>(outcomes)
            })
            .await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit status update");
            ServiceError::from(e)
        })?;

        ORDER_STATUS_UPDATES
            .with_label_values(&[K::ORDER_TYPE.as_ref(), to.as_ref()])
            .inc();
        info!(%order_id, old_status = %from, new_status = %to, "Order status updated");

        self.event_sender.publish(Event::OrderStatusChanged {
            order_id,
            order_type: K::ORDER_TYPE,
            old_status: from,
            new_status: to,
            actor: actor.to_string(),
        });
        for (posting, _) in received.into_iter().filter(|(_, o)| o.applied) {
            self.event_sender.publish(Event::StockReceived {
                order_id,
                tier: posting.tier,
                holder_id: posting.holder_id,
                sku_id: posting.sku_id,
                quantity: posting.delta,
            });
        }

        let updated = load_order::<K, _>(&*self.db, order_id).await?;
        ViewAssembler::new(self.directory.as_ref())
            .assemble(updated.order, updated.line_items)
            .await
    }

    fn receipt_postings(
        &self,
        order_id: Uuid,
        receiver: ReceivingParty,
        items: &[order_line_item::Model],
        actor: &str,
    ) -> Result<Vec<StockPosting>, ServiceError> {
        items
            .iter()
            .map(|item| {
                let quantity = match self.receipt_quantity {
                    ReceiptQuantity::Ordered => item.ordered_quantity.0,
                    ReceiptQuantity::Final => item.final_quantity.0,
                };
                let quantity = whole_quantity(quantity).ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "line item {} has a non-integral quantity",
                        item.id
                    ))
                })?;
                Ok(StockPosting::order_receipt(
                    receiver.tier(),
                    receiver.holder_id(),
                    item.sku_id,
                    quantity,
                    order_id,
                    item.id,
                    actor,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn stalled_ledger_work_becomes_service_unavailable() {
        let result: Result<(), ServiceError> = with_ledger_deadline(
            Duration::from_millis(10),
            std::future::pending::<Result<(), ServiceError>>(),
        )
        .await;
        let err = result.unwrap_err();
        assert_matches!(err, ServiceError::ServiceUnavailable(_));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn ledger_errors_pass_through_the_deadline() {
        let result: Result<(), ServiceError> =
            with_ledger_deadline(Duration::from_secs(1), async {
                Err(ServiceError::ConcurrentModification(Uuid::nil()))
            })
            .await;
        assert_matches!(result, Err(ServiceError::ConcurrentModification(_)));
    }

    #[test]
    fn status_change_accepts_only_status() {
        assert_eq!(
            parse_status_change(&json!({"status": "ORDER_APPROVED"})).unwrap(),
            OrderStatus::OrderApproved
        );
        assert_matches!(
            parse_status_change(&json!({"status": "ORDER_APPROVED", "note": "x"})),
            Err(ServiceError::InvalidOperation(_))
        );
        assert_matches!(
            parse_status_change(&json!({"note": null})),
            Err(ServiceError::InvalidOperation(_))
        );
        assert_matches!(
            parse_status_change(&json!({})),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            parse_status_change(&json!({"status": "SHIPPED"})),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            parse_status_change(&json!(["status"])),
            Err(ServiceError::ValidationError(_))
        );
    }
}
