use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::EVENTS_DROPPED;
use crate::models::{OrderStatus, OrderType, Tier};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Queues an event after the owning transaction committed. Never waits:
    /// the write already happened, so a full or closed channel drops the
    /// event with a warning.
    pub fn publish(&self, event: Event) {
        let (reason, event) = match self.sender.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Full(event)) => ("event channel full", event),
            Err(TrySendError::Closed(event)) => ("event channel closed", event),
        };
        EVENTS_DROPPED.inc();
        warn!(?event, "Dropping domain event: {}", reason);
    }
}

// Domain events emitted after a committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_type: OrderType,
        invoice_number: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        order_type: OrderType,
        old_status: OrderStatus,
        new_status: OrderStatus,
        actor: String,
    },
    OrderDeleted {
        order_id: Uuid,
        order_type: OrderType,
        actor: String,
    },
    StockReceived {
        order_id: Uuid,
        tier: Tier,
        holder_id: Uuid,
        sku_id: Uuid,
        quantity: i64,
    },
    OpeningStockRecorded {
        tier: Tier,
        holder_id: Uuid,
        sku_id: Uuid,
        quantity: i64,
    },
    InventoryAdjusted {
        tier: Tier,
        holder_id: Uuid,
        sku_id: Uuid,
        old_level: i64,
        new_level: i64,
    },
}

/// Drains the event channel, logging each event with structured fields.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_type,
                invoice_number,
            } => info!(%order_id, %order_type, %invoice_number, "order created"),
            Event::OrderStatusChanged {
                order_id,
                order_type,
                old_status,
                new_status,
                actor,
            } => info!(
                %order_id,
                %order_type,
                %old_status,
                %new_status,
                %actor,
                "order status changed"
            ),
            Event::OrderDeleted {
                order_id,
                order_type,
                actor,
            } => info!(%order_id, %order_type, %actor, "order deleted"),
            Event::StockReceived {
                order_id,
                tier,
                holder_id,
                sku_id,
                quantity,
            } => info!(%order_id, %tier, %holder_id, %sku_id, quantity, "stock received"),
            Event::OpeningStockRecorded {
                tier,
                holder_id,
                sku_id,
                quantity,
            } => info!(%tier, %holder_id, %sku_id, quantity, "opening stock recorded"),
            Event::InventoryAdjusted {
                tier,
                holder_id,
                sku_id,
                old_level,
                new_level,
            } => info!(
                %tier,
                %holder_id,
                %sku_id,
                old_level,
                new_level,
                "inventory adjusted"
            ),
        }
    }

    info!("Event processing loop stopped");
}
