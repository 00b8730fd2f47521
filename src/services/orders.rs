use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::entities::order::{self, Entity as OrderEntity};
use crate::entities::order_line_item::{self, Entity as LineItemEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::ORDERS_CREATED;
use crate::models::{
    OrderKind, OrderParties, OrderStatus, OrderType, ReceivingParty, Tier, TieredOrder,
};
use crate::services::directory::{Directory, PartyRecord, SkuRecord};
use crate::services::sequence::SequenceCounter;

/// One line on a create request. Omitted values fall back to the catalog
/// margin, the ordered quantity, and `ordered_quantity * landed_cost`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemInput {
    pub sku_id: Uuid,
    pub ordered_quantity: Decimal,
    pub final_quantity: Option<Decimal>,
    pub margin: Option<Decimal>,
    pub landed_cost: Decimal,
    pub total_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub super_stockist_id: Option<Uuid>,
    pub distributor_id: Option<Uuid>,
    pub retailer_id: Option<Uuid>,
    #[validate(length(max = 2000, message = "note must be at most 2000 characters"))]
    pub note: Option<String>,
    #[validate(length(min = 1, message = "at least one line item is required"))]
    pub line_items: Vec<LineItemInput>,
}

impl CreateOrderRequest {
    pub fn parties(&self) -> OrderParties {
        OrderParties {
            super_stockist_id: self.super_stockist_id,
            distributor_id: self.distributor_id,
            retailer_id: self.retailer_id,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOrdersQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    /// Substring match on the invoice number.
    pub invoice_number: Option<String>,
    /// Matches any party on the order.
    pub holder_id: Option<Uuid>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<PageRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<PageRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderList {
    pub count: u64,
    pub pagination: Pagination,
    pub orders: Vec<OrderView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyView {
    pub id: Uuid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemView {
    pub id: Uuid,
    pub position: i32,
    pub sku_id: Uuid,
    pub sku_name: Option<String>,
    pub product_name: Option<String>,
    pub ordered_quantity: Decimal,
    pub final_quantity: Decimal,
    pub margin: Decimal,
    pub landed_cost: Decimal,
    pub total_cost: Decimal,
}

/// Order with party and SKU names resolved and totals computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderView {
    pub id: Uuid,
    pub order_type: OrderType,
    pub invoice_number: String,
    pub status: OrderStatus,
    pub super_stockist: Option<PartyView>,
    pub distributor: Option<PartyView>,
    pub retailer: Option<PartyView>,
    pub receiving_party: ReceivingParty,
    pub ordered_by: String,
    pub note: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub line_items: Vec<LineItemView>,
    pub total_quantity: Decimal,
    pub total_cost: Decimal,
}

/// Builds [`OrderView`]s, memoizing directory lookups across orders.
pub struct ViewAssembler<'a> {
    directory: &'a dyn Directory,
    parties: HashMap<(Tier, Uuid), Option<PartyRecord>>,
    skus: HashMap<Uuid, Option<SkuRecord>>,
}

impl<'a> ViewAssembler<'a> {
    pub fn new(directory: &'a dyn Directory) -> Self {
        Self {
            directory,
            parties: HashMap::new(),
            skus: HashMap::new(),
        }
    }

    async fn party(&mut self, tier: Tier, id: Option<Uuid>) -> Result<Option<PartyView>, ServiceError> {
        let Some(id) = id else {
            return Ok(None);
        };
        if !self.parties.contains_key(&(tier, id)) {
            let record = self.directory.party(tier, id).await?;
            self.parties.insert((tier, id), record);
        }
        let name = self
            .parties
            .get(&(tier, id))
            .and_then(|r| r.as_ref())
            .map(|r| r.name.clone());
        Ok(Some(PartyView { id, name }))
    }

    async fn sku(&mut self, id: Uuid) -> Result<Option<SkuRecord>, ServiceError> {
        if !self.skus.contains_key(&id) {
            let record = self.directory.sku(id).await?;
            self.skus.insert(id, record);
        }
        Ok(self.skus.get(&id).cloned().flatten())
    }

    pub async fn assemble(
        &mut self,
        order: order::Model,
        mut items: Vec<order_line_item::Model>,
    ) -> Result<OrderView, ServiceError> {
        let order_type = OrderType::from_str(&order.order_type).map_err(|_| {
            ServiceError::InternalError(format!("order {} has unknown type", order.id))
        })?;
        let status = OrderStatus::from_str(&order.status).map_err(|_| {
            ServiceError::InternalError(format!("order {} has unknown status", order.id))
        })?;
        let receiving_tier = Tier::from_str(&order.receiving_tier).map_err(|_| {
            ServiceError::InternalError(format!("order {} has unknown receiving tier", order.id))
        })?;

        items.sort_by_key(|item| item.position);
        let mut line_items = Vec::with_capacity(items.len());
        for item in items {
            let sku = self.sku(item.sku_id).await?;
            line_items.push(LineItemView {
                id: item.id,
                position: item.position,
                sku_id: item.sku_id,
                sku_name: sku.as_ref().map(|s| s.name.clone()),
                product_name: sku.map(|s| s.product_name),
                ordered_quantity: item.ordered_quantity.0,
                final_quantity: item.final_quantity.0,
                margin: item.margin.0,
                landed_cost: item.landed_cost.0,
                total_cost: item.total_cost.0,
            });
        }
        let total_quantity = checked_sum(line_items.iter().map(|l| l.ordered_quantity))
            .ok_or_else(|| {
                ServiceError::InternalError(format!("order {} quantity overflows", order.id))
            })?;
        let total_cost = checked_sum(line_items.iter().map(|l| l.total_cost)).ok_or_else(|| {
            ServiceError::InternalError(format!("order {} total cost overflows", order.id))
        })?;

        Ok(OrderView {
            id: order.id,
            order_type,
            invoice_number: order.invoice_number,
            status,
            super_stockist: self
                .party(Tier::SuperStockist, order.super_stockist_id)
                .await?,
            distributor: self.party(Tier::Distributor, order.distributor_id).await?,
            retailer: self.party(Tier::Retailer, order.retailer_id).await?,
            receiving_party: ReceivingParty::new(receiving_tier, order.receiving_holder_id),
            ordered_by: order.ordered_by,
            note: order.note,
            version: order.version,
            created_at: order.created_at,
            updated_at: order.updated_at,
            updated_by: order.updated_by,
            line_items,
            total_quantity,
            total_cost,
        })
    }
}

/// Loads an order of kind `K` with its line items; orders of another type
/// are reported as missing.
pub async fn load_order<K, C>(conn: &C, id: Uuid) -> Result<TieredOrder<K>, ServiceError>
where
    K: OrderKind,
    C: ConnectionTrait,
{
    let order = OrderEntity::find_by_id(id)
        .one(conn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %id, "Failed to fetch order");
            ServiceError::from(e)
        })?
        .ok_or_else(|| ServiceError::NotFound(format!("{} {} not found", K::ORDER_TYPE, id)))?;
    let items = order.find_related(LineItemEntity).all(conn).await?;
    TieredOrder::new(order, items)
}

/// Whole, non-negative quantity as stored on a line.
pub fn whole_quantity(value: Decimal) -> Option<i64> {
    if value.is_sign_negative() || !value.fract().is_zero() {
        return None;
    }
    value.to_i64()
}

/// Integer digits and scale of the `NUMERIC(19, 4)` columns lines are stored in.
const STORED_INTEGER_DIGITS: u32 = 15;
const STORED_SCALE: u32 = 4;

/// Whether `value` can be stored on a line without rounding or overflow.
pub fn fits_stored_numeric(value: Decimal) -> bool {
    value.normalize().scale() <= STORED_SCALE
        && value.abs() < Decimal::from(10i64.pow(STORED_INTEGER_DIGITS))
}

/// `ordered_quantity * landed_cost`, when the product is storable.
fn default_total_cost(line: &LineItemInput) -> Option<Decimal> {
    line.ordered_quantity
        .checked_mul(line.landed_cost)
        .filter(|total| fits_stored_numeric(*total))
}

fn checked_sum(values: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    values.fold(Some(Decimal::ZERO), |acc, v| acc?.checked_add(v))
}

fn out_of_range(index: usize, field: &str) -> String {
    format!(
        "line_items[{}].{}: must have at most {} integer digits and {} decimal places",
        index, field, STORED_INTEGER_DIGITS, STORED_SCALE
    )
}

struct PreparedLine {
    input: LineItemInput,
    final_quantity: Decimal,
    margin: Decimal,
    total_cost: Decimal,
}

fn check_line(index: usize, line: &LineItemInput, errors: &mut Vec<String>) {
    match whole_quantity(line.ordered_quantity) {
        Some(q) if q > 0 => {
            if !fits_stored_numeric(line.ordered_quantity) {
                errors.push(out_of_range(index, "ordered_quantity"));
            }
        }
        _ => errors.push(format!(
            "line_items[{}].ordered_quantity: must be a positive whole number",
            index
        )),
    }
    if let Some(final_quantity) = line.final_quantity {
        if whole_quantity(final_quantity).is_none() {
            errors.push(format!(
                "line_items[{}].final_quantity: must be a non-negative whole number",
                index
            ));
        } else if !fits_stored_numeric(final_quantity) {
            errors.push(out_of_range(index, "final_quantity"));
        }
    }
    if line.margin.is_some_and(|m| !fits_stored_numeric(m)) {
        errors.push(out_of_range(index, "margin"));
    }
    if line.landed_cost.is_sign_negative() {
        errors.push(format!(
            "line_items[{}].landed_cost: must not be negative",
            index
        ));
    } else if !fits_stored_numeric(line.landed_cost) {
        errors.push(out_of_range(index, "landed_cost"));
    }
    match line.total_cost {
        Some(total) if total.is_sign_negative() => errors.push(format!(
            "line_items[{}].total_cost: must not be negative",
            index
        )),
        Some(total) if !fits_stored_numeric(total) => {
            errors.push(out_of_range(index, "total_cost"))
        }
        Some(_) => {}
        None if default_total_cost(line).is_none() => {
            errors.push(out_of_range(index, "total_cost"))
        }
        None => {}
    }
}

/// Create, read, list and delete for one order type. Status changes go
/// through the fulfillment orchestrator.
pub struct TieredOrderService<K: OrderKind> {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn Directory>,
    event_sender: Arc<EventSender>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: OrderKind> TieredOrderService<K> {
    pub fn new(
        db: Arc<DatabaseConnection>,
        directory: Arc<dyn Directory>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            directory,
            event_sender,
            _kind: PhantomData,
        }
    }

    /// Creates an order in ORDERED with a freshly minted invoice number.
    #[instrument(skip(self, request), fields(order_type = %K::ORDER_TYPE))]
    pub async fn create(
        &self,
        request: CreateOrderRequest,
        actor: &str,
    ) -> Result<OrderView, ServiceError> {
        request.validate()?;
        let receiver = K::resolve_receiver(&request.parties())?;

        let mut errors = Vec::new();
        for (index, line) in request.line_items.iter().enumerate() {
            check_line(index, line, &mut errors);
        }
        if !errors.is_empty() {
            return Err(ServiceError::FieldValidation(errors));
        }

        for (tier, id) in request.parties().references() {
            self.directory.require_party(tier, id).await?;
        }
        let mut lines = Vec::with_capacity(request.line_items.len());
        for (index, input) in request.line_items.iter().cloned().enumerate() {
            let sku = self.directory.require_sku(input.sku_id).await?;
            let total_cost = match input.total_cost {
                Some(total) => total,
                None => default_total_cost(&input).ok_or_else(|| {
                    ServiceError::FieldValidation(vec![out_of_range(index, "total_cost")])
                })?,
            };
            let margin = input.margin.unwrap_or(sku.margin);
            if !fits_stored_numeric(margin) {
                return Err(ServiceError::FieldValidation(vec![out_of_range(
                    index, "margin",
                )]));
            }
            lines.push(PreparedLine {
                final_quantity: input.final_quantity.unwrap_or(input.ordered_quantity),
                margin,
                total_cost,
                input,
            });
        }

        let order_type = K::ORDER_TYPE;
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::from(e)
        })?;
        let sequence = SequenceCounter::next_value(&txn, order_type.sequence_name()).await?;
        let invoice_number = order_type.invoice_number(sequence);

        let order = order::ActiveModel {
            id: Set(order_id),
            order_type: Set(order_type.to_string()),
            invoice_number: Set(invoice_number.clone()),
            status: Set(OrderStatus::Ordered.to_string()),
            super_stockist_id: Set(request.super_stockist_id),
            distributor_id: Set(request.distributor_id),
            retailer_id: Set(request.retailer_id),
            receiving_tier: Set(receiver.tier().to_string()),
            receiving_holder_id: Set(receiver.holder_id()),
            ordered_by: Set(actor.to_string()),
            note: Set(request.note.clone()),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
            updated_by: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, %order_id, "Failed to insert order");
            ServiceError::from(e)
        })?;

        let mut items = Vec::with_capacity(lines.len());
        for (position, line) in lines.into_iter().enumerate() {
            let item = order_line_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                position: Set(position as i32),
                sku_id: Set(line.input.sku_id),
                ordered_quantity: Set(line.input.ordered_quantity.into()),
                final_quantity: Set(line.final_quantity.into()),
                margin: Set(line.margin.into()),
                landed_cost: Set(line.input.landed_cost.into()),
                total_cost: Set(line.total_cost.into()),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order creation");
            ServiceError::from(e)
        })?;

        ORDERS_CREATED
            .with_label_values(&[order_type.as_ref()])
            .inc();
        info!(%order_id, %invoice_number, "Order created");
        self.event_sender.publish(Event::OrderCreated {
            order_id,
            order_type,
            invoice_number,
        });

        ViewAssembler::new(self.directory.as_ref())
            .assemble(order, items)
            .await
    }

    #[instrument(skip(self), fields(order_type = %K::ORDER_TYPE))]
    pub async fn get(&self, id: Uuid) -> Result<OrderView, ServiceError> {
        let loaded = load_order::<K, _>(&*self.db, id).await?;
        ViewAssembler::new(self.directory.as_ref())
            .assemble(loaded.order, loaded.line_items)
            .await
    }

    /// Newest first, 1-based pages of `limit` orders. `query.limit` is
    /// ignored; callers resolve it against their configured bounds.
    #[instrument(skip(self), fields(order_type = %K::ORDER_TYPE))]
    pub async fn list(&self, query: ListOrdersQuery, limit: u64) -> Result<OrderList, ServiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = limit.max(1);
        let offset = (page - 1)
            .checked_mul(limit)
            .filter(|offset| i64::try_from(*offset).is_ok());
        if offset.is_none() {
            return Err(ServiceError::ValidationError(format!(
                "page {} is out of range for limit {}",
                page, limit
            )));
        }

        let mut select =
            OrderEntity::find().filter(order::Column::OrderType.eq(K::ORDER_TYPE.to_string()));
        if let Some(invoice) = query.invoice_number.as_deref().filter(|s| !s.is_empty()) {
            select = select.filter(order::Column::InvoiceNumber.contains(invoice));
        }
        if let Some(holder_id) = query.holder_id {
            select = select.filter(
                Condition::any()
                    .add(order::Column::SuperStockistId.eq(holder_id))
                    .add(order::Column::DistributorId.eq(holder_id))
                    .add(order::Column::RetailerId.eq(holder_id)),
            );
        }
        if let Some(status) = query.status.as_deref() {
            let status = OrderStatus::from_str(status).map_err(|_| {
                ServiceError::ValidationError(format!("unknown status {}", status))
            })?;
            select = select.filter(order::Column::Status.eq(status.to_string()));
        }

        let paginator = select
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::InvoiceNumber)
            .paginate(&*self.db, limit);
        let count = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_line_item::Model>> = HashMap::new();
        if !ids.is_empty() {
            for item in LineItemEntity::find()
                .filter(order_line_item::Column::OrderId.is_in(ids))
                .all(&*self.db)
                .await?
            {
                items_by_order.entry(item.order_id).or_default().push(item);
            }
        }

        let has_next = page.checked_mul(limit).is_some_and(|seen| seen < count);
        let mut assembler = ViewAssembler::new(self.directory.as_ref());
        let mut views = Vec::with_capacity(orders.len());
        for order in orders {
            let items = items_by_order.remove(&order.id).unwrap_or_default();
            views.push(assembler.assemble(order, items).await?);
        }

        Ok(OrderList {
            count,
            pagination: Pagination {
                next: has_next.then_some(PageRef {
                    page: page + 1,
                    limit,
                }),
                prev: (page > 1).then_some(PageRef {
                    page: page - 1,
                    limit,
                }),
            },
            orders: views,
        })
    }

    /// Removes the order and its line items. Stock already posted from the
    /// order stays in the ledger.
    #[instrument(skip(self), fields(order_type = %K::ORDER_TYPE))]
    pub async fn delete(&self, id: Uuid, actor: &str) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let loaded = load_order::<K, _>(&txn, id).await?;
        LineItemEntity::delete_many()
            .filter(order_line_item::Column::OrderId.eq(id))
            .exec(&txn)
            .await?;
        OrderEntity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        info!(order_id = %id, invoice_number = %loaded.order.invoice_number, "Order deleted");
        self.event_sender.publish(Event::OrderDeleted {
            order_id: id,
            order_type: K::ORDER_TYPE,
            actor: actor.to_string(),
        });
        Ok(())
    }
}
