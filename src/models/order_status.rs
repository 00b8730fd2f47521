use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Lifecycle state of an order of any type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Ordered,
    OrderApproved,
    ReachedDestination,
    OrderCancelledByFactory,
    OrderCancelledBySuperStockist,
    OrderCancelledByDistributor,
    OrderCancelledByRetailer,
}

impl OrderStatus {
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            OrderStatus::OrderCancelledByFactory
                | OrderStatus::OrderCancelledBySuperStockist
                | OrderStatus::OrderCancelledByDistributor
                | OrderStatus::OrderCancelledByRetailer
        )
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::ReachedDestination) || self.is_cancellation()
    }
}

/// Order types share one implementation; this is the stored discriminator.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    PrimaryOrder,
    SecondPrimaryOrder,
    SecondaryOrder,
}

impl OrderType {
    pub fn invoice_prefix(&self) -> &'static str {
        match self {
            OrderType::PrimaryOrder => "PO",
            OrderType::SecondPrimaryOrder => "SPO",
            OrderType::SecondaryOrder => "SO",
        }
    }

    /// Name of the counter that mints this type's invoice numbers.
    pub fn sequence_name(&self) -> &'static str {
        self.path_segment()
    }

    pub fn path_segment(&self) -> &'static str {
        match self {
            OrderType::PrimaryOrder => "primary-order",
            OrderType::SecondPrimaryOrder => "second-primary-order",
            OrderType::SecondaryOrder => "secondary-order",
        }
    }

    pub fn invoice_number(&self, sequence: i64) -> String {
        format!("{}-{}", self.invoice_prefix(), sequence)
    }
}
