//! One order implementation for all three order types.
//!
//! An [`OrderKind`] marker fixes the stored discriminator, the invoice prefix,
//! which parties may cancel, and how the receiving party is resolved from the
//! party ids on a create request. [`TieredOrder`] pairs a loaded order with its
//! kind so every status change is checked against the right rules.

use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order_status::{OrderStatus, OrderType};
use super::tier::{ReceivingParty, Tier};
use crate::entities::{order, order_line_item};
use crate::errors::ServiceError;

/// Party ids as supplied on a create request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderParties {
    pub super_stockist_id: Option<Uuid>,
    pub distributor_id: Option<Uuid>,
    pub retailer_id: Option<Uuid>,
}

impl OrderParties {
    /// Every referenced party with the tier it must exist under.
    pub fn references(&self) -> Vec<(Tier, Uuid)> {
        let mut refs = Vec::with_capacity(3);
        if let Some(id) = self.super_stockist_id {
            refs.push((Tier::SuperStockist, id));
        }
        if let Some(id) = self.distributor_id {
            refs.push((Tier::Distributor, id));
        }
        if let Some(id) = self.retailer_id {
            refs.push((Tier::Retailer, id));
        }
        refs
    }
}

pub trait OrderKind: Send + Sync + 'static {
    const ORDER_TYPE: OrderType;

    /// Cancellation statuses this order type accepts from ORDERED.
    const CANCELLATION_STATUSES: &'static [OrderStatus];

    /// Checks the party ids for this order type and picks the receiver.
    fn resolve_receiver(parties: &OrderParties) -> Result<ReceivingParty, ServiceError>;

    fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
        match (from, to) {
            (OrderStatus::Ordered, OrderStatus::OrderApproved) => true,
            (OrderStatus::OrderApproved, OrderStatus::ReachedDestination) => true,
            (OrderStatus::Ordered, target) if target.is_cancellation() => {
                Self::CANCELLATION_STATUSES.contains(&target)
            }
            _ => false,
        }
    }

    /// Statuses that may ever be stored on an order of this type.
    fn accepts_status(status: OrderStatus) -> bool {
        !status.is_cancellation() || Self::CANCELLATION_STATUSES.contains(&status)
    }
}

/// Factory to super-stockist or factory to distributor.
#[derive(Debug, Clone, Copy)]
pub struct PrimaryOrder;

/// Super-stockist to distributor.
#[derive(Debug, Clone, Copy)]
pub struct SecondPrimaryOrder;

/// Distributor to retailer.
#[derive(Debug, Clone, Copy)]
pub struct SecondaryOrder;

fn required(id: Option<Uuid>, field: &str) -> Result<Uuid, ServiceError> {
    id.ok_or_else(|| ServiceError::ValidationError(format!("{} is required", field)))
}

fn forbidden(id: Option<Uuid>, field: &str, order_type: OrderType) -> Result<(), ServiceError> {
    match id {
        Some(_) => Err(ServiceError::ValidationError(format!(
            "{} is not allowed on a {}",
            field, order_type
        ))),
        None => Ok(()),
    }
}

impl OrderKind for PrimaryOrder {
    const ORDER_TYPE: OrderType = OrderType::PrimaryOrder;
    const CANCELLATION_STATUSES: &'static [OrderStatus] = &[
        OrderStatus::OrderCancelledByFactory,
        OrderStatus::OrderCancelledBySuperStockist,
        OrderStatus::OrderCancelledByDistributor,
    ];

    fn resolve_receiver(parties: &OrderParties) -> Result<ReceivingParty, ServiceError> {
        forbidden(parties.retailer_id, "retailer_id", Self::ORDER_TYPE)?;
        match (parties.super_stockist_id, parties.distributor_id) {
            (Some(ss), None) => Ok(ReceivingParty::SuperStockist(ss)),
            (None, Some(distributor)) => Ok(ReceivingParty::Distributor(distributor)),
            _ => Err(ServiceError::ValidationError(
                "exactly one of super_stockist_id or distributor_id is required".to_string(),
            )),
        }
    }
}

impl OrderKind for SecondPrimaryOrder {
    const ORDER_TYPE: OrderType = OrderType::SecondPrimaryOrder;
    const CANCELLATION_STATUSES: &'static [OrderStatus] = &[
        OrderStatus::OrderCancelledBySuperStockist,
        OrderStatus::OrderCancelledByDistributor,
    ];

    fn resolve_receiver(parties: &OrderParties) -> Result<ReceivingParty, ServiceError> {
        forbidden(parties.retailer_id, "retailer_id", Self::ORDER_TYPE)?;
        required(parties.super_stockist_id, "super_stockist_id")?;
        let distributor = required(parties.distributor_id, "distributor_id")?;
        Ok(ReceivingParty::Distributor(distributor))
    }
}

impl OrderKind for SecondaryOrder {
    const ORDER_TYPE: OrderType = OrderType::SecondaryOrder;
    const CANCELLATION_STATUSES: &'static [OrderStatus] = &[
        OrderStatus::OrderCancelledByRetailer,
        OrderStatus::OrderCancelledByDistributor,
    ];

    fn resolve_receiver(parties: &OrderParties) -> Result<ReceivingParty, ServiceError> {
        forbidden(parties.super_stockist_id, "super_stockist_id", Self::ORDER_TYPE)?;
        required(parties.distributor_id, "distributor_id")?;
        let retailer = required(parties.retailer_id, "retailer_id")?;
        Ok(ReceivingParty::Retailer(retailer))
    }
}

/// Outcome of checking a requested status against the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The order is already in the requested status; nothing to write.
    Unchanged,
    Apply { from: OrderStatus, to: OrderStatus },
}

impl Transition {
    /// Whether applying this transition posts stock to the receiver.
    pub fn receives_stock(&self) -> bool {
        matches!(
            self,
            Transition::Apply {
                to: OrderStatus::ReachedDestination,
                ..
            }
        )
    }
}

/// A stored order checked to be of kind `K`.
#[derive(Debug, Clone)]
pub struct TieredOrder<K: OrderKind> {
    pub order: order::Model,
    pub line_items: Vec<order_line_item::Model>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: OrderKind> TieredOrder<K> {
    pub fn new(
        order: order::Model,
        line_items: Vec<order_line_item::Model>,
    ) -> Result<Self, ServiceError> {
        if order.order_type != K::ORDER_TYPE.to_string() {
            return Err(ServiceError::NotFound(format!(
                "{} {} not found",
                K::ORDER_TYPE,
                order.id
            )));
        }
        Ok(Self {
            order,
            line_items,
            _kind: PhantomData,
        })
    }

    pub fn status(&self) -> Result<OrderStatus, ServiceError> {
        OrderStatus::from_str(&self.order.status).map_err(|_| {
            ServiceError::InternalError(format!(
                "order {} has unknown stored status {}",
                self.order.id, self.order.status
            ))
        })
    }

    pub fn receiving_party(&self) -> Result<ReceivingParty, ServiceError> {
        let tier = Tier::from_str(&self.order.receiving_tier).map_err(|_| {
            ServiceError::InternalError(format!(
                "order {} has unknown receiving tier {}",
                self.order.id, self.order.receiving_tier
            ))
        })?;
        Ok(ReceivingParty::new(tier, self.order.receiving_holder_id))
    }

    /// Validates a move to `target` for this order's kind.
    pub fn plan_transition(&self, target: OrderStatus) -> Result<Transition, ServiceError> {
        let current = self.status()?;
        if !K::accepts_status(target) {
            return Err(ServiceError::InvalidOperation(format!(
                "status {} does not apply to a {}",
                target,
                K::ORDER_TYPE
            )));
        }
        if current == target {
            return Ok(Transition::Unchanged);
        }
        if current.is_terminal() {
            return Err(ServiceError::InvalidOperation(format!(
                "{} is closed at {} and cannot change status",
                self.order.invoice_number, current
            )));
        }
        if !K::can_transition(current, target) {
            return Err(ServiceError::InvalidOperation(format!(
                "cannot move {} from {} to {}",
                self.order.invoice_number, current, target
            )));
        }
        Ok(Transition::Apply {
            from: current,
            to: target,
        })
    }
}
