//! Per-tier stock ledger.
//!
//! Every movement appends an `inventory_activities` row and then applies the
//! same delta to the `inventory_balances` projection with a single upsert. The
//! activity log is authoritative; [`InventoryLedger::rebuild_projection`] is
//! the only path that writes a balance level directly.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    FromQueryResult, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::inventory_activity::{self, Entity as InventoryActivity};
use crate::entities::inventory_balance::{self, Entity as InventoryBalance};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{LEDGER_DUPLICATE_POSTINGS, LEDGER_POSTINGS};
use crate::models::Tier;
use crate::services::directory::Directory;

pub const OPENING_STOCK_REASON: &str = "opening stock";
pub const ORDER_RECEIPT_REASON: &str = "new stock from order";
pub const MANUAL_ADJUSTMENT_REASON: &str = "manual adjustment";

/// One signed movement against a (tier, holder, sku) balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockPosting {
    pub tier: Tier,
    pub holder_id: Uuid,
    pub sku_id: Uuid,
    pub delta: i64,
    pub reason: String,
    pub originating_order_id: Option<Uuid>,
    pub order_line_item_id: Option<Uuid>,
    pub actor: Option<String>,
}

impl StockPosting {
    /// Receipt of one order line at the receiving holder.
    pub fn order_receipt(
        tier: Tier,
        holder_id: Uuid,
        sku_id: Uuid,
        quantity: i64,
        order_id: Uuid,
        line_item_id: Uuid,
        actor: &str,
    ) -> Self {
        Self {
            tier,
            holder_id,
            sku_id,
            delta: quantity,
            reason: ORDER_RECEIPT_REASON.to_string(),
            originating_order_id: Some(order_id),
            order_line_item_id: Some(line_item_id),
            actor: Some(actor.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostingOutcome {
    pub balance: inventory_balance::Model,
    /// False when the order line had already been posted and nothing changed.
    pub applied: bool,
}

/// Balance row enriched with catalog names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub id: Uuid,
    pub tier: String,
    pub holder_id: Uuid,
    pub sku_id: Uuid,
    pub sku_name: Option<String>,
    pub product_name: Option<String>,
    pub current_inventory_level: i64,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BalanceView {
    fn bare(balance: inventory_balance::Model) -> Self {
        Self {
            id: balance.id,
            tier: balance.tier,
            holder_id: balance.holder_id,
            sku_id: balance.sku_id,
            sku_name: None,
            product_name: None,
            current_inventory_level: balance.current_inventory_level,
            version: balance.version,
            created_at: balance.created_at,
            updated_at: balance.updated_at,
        }
    }
}

/// A SKU whose balance disagrees with the sum of its activity deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDrift {
    pub sku_id: Uuid,
    pub balance_level: Option<i64>,
    pub ledger_total: i64,
}

pub struct InventoryLedger {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn Directory>,
    event_sender: Arc<EventSender>,
}

impl InventoryLedger {
    pub fn new(
        db: Arc<DatabaseConnection>,
        directory: Arc<dyn Directory>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            directory,
            event_sender,
        }
    }

    /// Appends the posting's activity and applies its delta to the balance,
    /// creating the balance row on first movement.
    ///
    /// Runs on `conn` so callers can fold it into a larger transaction. A
    /// posting whose (order, line item) pair is already in the log is skipped
    /// and the current balance returned.
    #[instrument(skip(conn, posting), fields(tier = %posting.tier, holder_id = %posting.holder_id, sku_id = %posting.sku_id, delta = posting.delta))]
    pub async fn increment_in<C>(
        conn: &C,
        posting: &StockPosting,
    ) -> Result<PostingOutcome, ServiceError>
    where
        C: ConnectionTrait,
    {
        if let (Some(order_id), Some(line_id)) =
            (posting.originating_order_id, posting.order_line_item_id)
        {
            let existing = InventoryActivity::find()
                .filter(inventory_activity::Column::OriginatingOrderId.eq(order_id))
                .filter(inventory_activity::Column::OrderLineItemId.eq(line_id))
                .one(conn)
                .await?;
            if existing.is_some() {
                LEDGER_DUPLICATE_POSTINGS.inc();
                warn!(%order_id, %line_id, "order line already posted; skipping");
                let balance = find_balance(conn, posting.tier, posting.holder_id, posting.sku_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(format!(
                            "activity exists for line {} but no balance row",
                            line_id
                        ))
                    })?;
                return Ok(PostingOutcome {
                    balance,
                    applied: false,
                });
            }
        }

        let now = Utc::now();
        inventory_activity::ActiveModel {
            id: Set(Uuid::new_v4()),
            tier: Set(posting.tier.to_string()),
            holder_id: Set(posting.holder_id),
            sku_id: Set(posting.sku_id),
            quantity_delta: Set(posting.delta),
            comment: Set(posting.reason.clone()),
            originating_order_id: Set(posting.originating_order_id),
            order_line_item_id: Set(posting.order_line_item_id),
            actor: Set(posting.actor.clone()),
            created_at: Set(now),
        }
        .insert(conn)
        .await
        .map_err(|e| {
            error!("Failed to append inventory activity: {}", e);
            ServiceError::from(e)
        })?;

        let stmt = Query::insert()
            .into_table(InventoryBalance)
            .columns([
                inventory_balance::Column::Id,
                inventory_balance::Column::Tier,
                inventory_balance::Column::HolderId,
                inventory_balance::Column::SkuId,
                inventory_balance::Column::CurrentInventoryLevel,
                inventory_balance::Column::Version,
                inventory_balance::Column::CreatedAt,
                inventory_balance::Column::UpdatedAt,
            ])
            .values([
                Uuid::new_v4().into(),
                posting.tier.to_string().into(),
                posting.holder_id.into(),
                posting.sku_id.into(),
                posting.delta.into(),
                1i32.into(),
                now.into(),
                now.into(),
            ])
            .map_err(|e| ServiceError::InternalError(format!("balance upsert: {}", e)))?
            .on_conflict(
                OnConflict::columns([
                    inventory_balance::Column::Tier,
                    inventory_balance::Column::HolderId,
                    inventory_balance::Column::SkuId,
                ])
                .value(
                    inventory_balance::Column::CurrentInventoryLevel,
                    Expr::col((
                        InventoryBalance,
                        inventory_balance::Column::CurrentInventoryLevel,
                    ))
                    .add(posting.delta),
                )
                .value(
                    inventory_balance::Column::Version,
                    Expr::col((InventoryBalance, inventory_balance::Column::Version)).add(1),
                )
                .value(inventory_balance::Column::UpdatedAt, now)
                .to_owned(),
            )
            .returning_all()
            .to_owned();

        let backend = conn.get_database_backend();
        let row = conn
            .query_one(backend.build(&stmt))
            .await
            .map_err(|e| {
                error!("Failed to upsert inventory balance: {}", e);
                ServiceError::from(e)
            })?
            .ok_or_else(|| ServiceError::InternalError("balance upsert returned no row".into()))?;
        let balance = inventory_balance::Model::from_query_result(&row, "")?;

        LEDGER_POSTINGS
            .with_label_values(&[posting.tier.as_ref(), posting.reason.as_str()])
            .inc();

        Ok(PostingOutcome {
            balance,
            applied: true,
        })
    }

    /// Posts one movement in its own transaction.
    pub async fn increment_balance(
        &self,
        posting: StockPosting,
    ) -> Result<PostingOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let outcome = Self::increment_in(&txn, &posting).await?;
        txn.commit().await?;
        Ok(outcome)
    }

    /// Seeds the first balance for a (tier, holder, sku). Fails with
    /// `Duplicate` if any balance already exists for the key.
    #[instrument(skip(self))]
    pub async fn record_opening_stock(
        &self,
        tier: Tier,
        holder_id: Uuid,
        sku_id: Uuid,
        quantity: i64,
        actor: &str,
    ) -> Result<BalanceView, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "opening quantity must not be negative".to_string(),
            ));
        }
        self.directory.require_party(tier, holder_id).await?;
        let sku = self.directory.require_sku(sku_id).await?;

        let txn = self.db.begin().await?;
        if find_balance(&txn, tier, holder_id, sku_id).await?.is_some() {
            return Err(ServiceError::Duplicate(format!(
                "inventory for SKU {} already exists at {} {}",
                sku_id, tier, holder_id
            )));
        }

        let now = Utc::now();
        inventory_activity::ActiveModel {
            id: Set(Uuid::new_v4()),
            tier: Set(tier.to_string()),
            holder_id: Set(holder_id),
            sku_id: Set(sku_id),
            quantity_delta: Set(quantity),
            comment: Set(OPENING_STOCK_REASON.to_string()),
            originating_order_id: Set(None),
            order_line_item_id: Set(None),
            actor: Set(Some(actor.to_string())),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let balance = inventory_balance::ActiveModel {
            id: Set(Uuid::new_v4()),
            tier: Set(tier.to_string()),
            holder_id: Set(holder_id),
            sku_id: Set(sku_id),
            current_inventory_level: Set(quantity),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        LEDGER_POSTINGS
            .with_label_values(&[tier.as_ref(), OPENING_STOCK_REASON])
            .inc();
        info!(%tier, %holder_id, %sku_id, quantity, "opening stock recorded");
        self.event_sender.publish(Event::OpeningStockRecorded {
            tier,
            holder_id,
            sku_id,
            quantity,
        });

        let mut view = BalanceView::bare(balance);
        view.sku_name = Some(sku.name);
        view.product_name = Some(sku.product_name);
        Ok(view)
    }

    /// Sets a balance to `new_level` by posting the difference as a
    /// "manual adjustment" activity.
    #[instrument(skip(self))]
    pub async fn manual_adjust(
        &self,
        tier: Tier,
        holder_id: Uuid,
        balance_id: Uuid,
        new_level: i64,
        actor: &str,
    ) -> Result<BalanceView, ServiceError> {
        if new_level < 0 {
            return Err(ServiceError::ValidationError(
                "current_inventory_level must not be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let current = InventoryBalance::find_by_id(balance_id)
            .one(&txn)
            .await?
            .filter(|b| b.tier == tier.to_string() && b.holder_id == holder_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "inventory {} not found for {} {}",
                    balance_id, tier, holder_id
                ))
            })?;

        let old_level = current.current_inventory_level;
        let delta = new_level - old_level;
        if delta == 0 {
            txn.commit().await?;
            return self.enrich(current).await;
        }

        let posting = StockPosting {
            tier,
            holder_id,
            sku_id: current.sku_id,
            delta,
            reason: MANUAL_ADJUSTMENT_REASON.to_string(),
            originating_order_id: None,
            order_line_item_id: None,
            actor: Some(actor.to_string()),
        };
        let outcome = Self::increment_in(&txn, &posting).await?;
        if outcome.balance.current_inventory_level != new_level {
            // Dropping the transaction rolls the posting back.
            warn!(%balance_id, new_level, "inventory changed while it was being adjusted");
            return Err(ServiceError::ConcurrentModification(balance_id));
        }
        txn.commit().await?;

        info!(%tier, %holder_id, sku_id = %current.sku_id, old_level, new_level, "inventory adjusted");
        self.event_sender.publish(Event::InventoryAdjusted {
            tier,
            holder_id,
            sku_id: current.sku_id,
            old_level,
            new_level,
        });

        self.enrich(outcome.balance).await
    }

    /// Balances held by one holder with SKU and product names.
    #[instrument(skip(self))]
    pub async fn list_balances(
        &self,
        tier: Tier,
        holder_id: Uuid,
    ) -> Result<Vec<BalanceView>, ServiceError> {
        let balances = InventoryBalance::find()
            .filter(inventory_balance::Column::Tier.eq(tier.to_string()))
            .filter(inventory_balance::Column::HolderId.eq(holder_id))
            .order_by_asc(inventory_balance::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut views = Vec::with_capacity(balances.len());
        for balance in balances {
            views.push(self.enrich(balance).await?);
        }
        Ok(views)
    }

    /// Activity rows for one holder, newest first.
    pub async fn list_activity(
        &self,
        tier: Tier,
        holder_id: Uuid,
        sku_id: Option<Uuid>,
    ) -> Result<Vec<inventory_activity::Model>, ServiceError> {
        let mut query = InventoryActivity::find()
            .filter(inventory_activity::Column::Tier.eq(tier.to_string()))
            .filter(inventory_activity::Column::HolderId.eq(holder_id));
        if let Some(sku_id) = sku_id {
            query = query.filter(inventory_activity::Column::SkuId.eq(sku_id));
        }
        Ok(query
            .order_by_desc(inventory_activity::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Compares every balance against the sum of its activity deltas.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        tier: Tier,
        holder_id: Uuid,
    ) -> Result<Vec<BalanceDrift>, ServiceError> {
        let (balances, totals) = load_projection(&*self.db, tier, holder_id).await?;
        let drift = compute_drift(&balances, &totals);
        if !drift.is_empty() {
            warn!(%tier, %holder_id, drifted = drift.len(), "inventory balances drifted from ledger");
        }
        Ok(drift)
    }

    /// Rewrites the holder's balances from the activity log and returns the
    /// rows that were corrected.
    #[instrument(skip(self))]
    pub async fn rebuild_projection(
        &self,
        tier: Tier,
        holder_id: Uuid,
    ) -> Result<Vec<BalanceDrift>, ServiceError> {
        let txn = self.db.begin().await?;
        let (balances, totals) = load_projection(&txn, tier, holder_id).await?;
        let drift = compute_drift(&balances, &totals);
        let now = Utc::now();

        for fix in &drift {
            match balances.get(&fix.sku_id) {
                Some(balance) => {
                    let mut active: inventory_balance::ActiveModel = balance.clone().into();
                    active.current_inventory_level = Set(fix.ledger_total);
                    active.version = Set(balance.version + 1);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                }
                None => {
                    inventory_balance::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        tier: Set(tier.to_string()),
                        holder_id: Set(holder_id),
                        sku_id: Set(fix.sku_id),
                        current_inventory_level: Set(fix.ledger_total),
                        version: Set(1),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(&txn)
                    .await?;
                }
            }
        }
        txn.commit().await?;

        info!(%tier, %holder_id, corrected = drift.len(), "inventory projection rebuilt");
        Ok(drift)
    }

    async fn enrich(&self, balance: inventory_balance::Model) -> Result<BalanceView, ServiceError> {
        let sku = self.directory.sku(balance.sku_id).await?;
        let mut view = BalanceView::bare(balance);
        if let Some(sku) = sku {
            view.sku_name = Some(sku.name);
            view.product_name = Some(sku.product_name);
        }
        Ok(view)
    }
}

async fn find_balance<C>(
    conn: &C,
    tier: Tier,
    holder_id: Uuid,
    sku_id: Uuid,
) -> Result<Option<inventory_balance::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(InventoryBalance::find()
        .filter(inventory_balance::Column::Tier.eq(tier.to_string()))
        .filter(inventory_balance::Column::HolderId.eq(holder_id))
        .filter(inventory_balance::Column::SkuId.eq(sku_id))
        .one(conn)
        .await?)
}

type Projection = (
    BTreeMap<Uuid, inventory_balance::Model>,
    BTreeMap<Uuid, i64>,
);

async fn load_projection<C>(
    conn: &C,
    tier: Tier,
    holder_id: Uuid,
) -> Result<Projection, ServiceError>
where
    C: ConnectionTrait,
{
    let balances = InventoryBalance::find()
        .filter(inventory_balance::Column::Tier.eq(tier.to_string()))
        .filter(inventory_balance::Column::HolderId.eq(holder_id))
        .all(conn)
        .await?
        .into_iter()
        .map(|b| (b.sku_id, b))
        .collect();

    let activities = InventoryActivity::find()
        .filter(inventory_activity::Column::Tier.eq(tier.to_string()))
        .filter(inventory_activity::Column::HolderId.eq(holder_id))
        .all(conn)
        .await?;
    let mut totals = BTreeMap::new();
    for activity in activities {
        *totals.entry(activity.sku_id).or_insert(0i64) += activity.quantity_delta;
    }

    Ok((balances, totals))
}

fn compute_drift(
    balances: &BTreeMap<Uuid, inventory_balance::Model>,
    totals: &BTreeMap<Uuid, i64>,
) -> Vec<BalanceDrift> {
    let skus: BTreeSet<Uuid> = balances.keys().chain(totals.keys()).copied().collect();
    skus.into_iter()
        .filter_map(|sku_id| {
            let balance_level = balances.get(&sku_id).map(|b| b.current_inventory_level);
            let ledger_total = totals.get(&sku_id).copied().unwrap_or(0);
            (balance_level != Some(ledger_total)).then_some(BalanceDrift {
                sku_id,
                balance_level,
                ledger_total,
            })
        })
        .collect()
}
