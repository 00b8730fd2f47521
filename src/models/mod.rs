pub mod order_kind;
pub mod order_status;
pub mod tier;

pub use order_kind::{
    OrderKind, OrderParties, PrimaryOrder, SecondPrimaryOrder, SecondaryOrder, TieredOrder,
    Transition,
};
pub use order_status::{OrderStatus, OrderType};
pub use tier::{
    DistributorTier, ReceivingParty, RetailerTier, SuperStockistTier, Tier, TierScope,
};
