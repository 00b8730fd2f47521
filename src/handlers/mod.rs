pub mod inventory;
pub mod orders;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::models::{PrimaryOrder, SecondPrimaryOrder, SecondaryOrder};
use crate::services::{
    directory::Directory, fulfillment::FulfillmentOrchestrator, inventory_ledger::InventoryLedger,
    orders::TieredOrderService, sequence::SequenceCounter,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub directory: Arc<dyn Directory>,
    pub sequences: Arc<SequenceCounter>,
    pub ledger: Arc<InventoryLedger>,
    pub fulfillment: Arc<FulfillmentOrchestrator>,
    pub primary_orders: Arc<TieredOrderService<PrimaryOrder>>,
    pub second_primary_orders: Arc<TieredOrderService<SecondPrimaryOrder>>,
    pub secondary_orders: Arc<TieredOrderService<SecondaryOrder>>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        directory: Arc<dyn Directory>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        Self {
            sequences: Arc::new(SequenceCounter::new(db_pool.clone())),
            ledger: Arc::new(InventoryLedger::new(
                db_pool.clone(),
                directory.clone(),
                event_sender.clone(),
            )),
            fulfillment: Arc::new(FulfillmentOrchestrator::new(
                db_pool.clone(),
                directory.clone(),
                event_sender.clone(),
                config.ledger_timeout(),
                config.receipt_quantity,
            )),
            primary_orders: Arc::new(order_service(&db_pool, &directory, &event_sender)),
            second_primary_orders: Arc::new(order_service(&db_pool, &directory, &event_sender)),
            secondary_orders: Arc::new(order_service(&db_pool, &directory, &event_sender)),
            directory,
        }
    }
}

fn order_service<K: crate::models::OrderKind>(
    db_pool: &Arc<DbPool>,
    directory: &Arc<dyn Directory>,
    event_sender: &Arc<EventSender>,
) -> TieredOrderService<K> {
    TieredOrderService::new(db_pool.clone(), directory.clone(), event_sender.clone())
}
