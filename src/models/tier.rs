use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

/// A level of the distribution network that holds stock.
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
pub enum Tier {
    SuperStockist,
    Distributor,
    Retailer,
}

impl Tier {
    /// URL segment the tier's inventory routes are mounted under.
    pub fn path_segment(&self) -> &'static str {
        match self {
            Tier::SuperStockist => "super-stockist",
            Tier::Distributor => "distributor",
            Tier::Retailer => "retailer",
        }
    }
}

/// The party an order delivers to. Stored on the order as an explicit
/// `(tier, holder_id)` pair and never inferred from which party ids are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "tier", content = "holder_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceivingParty {
    SuperStockist(Uuid),
    Distributor(Uuid),
    Retailer(Uuid),
}

impl ReceivingParty {
    pub fn new(tier: Tier, holder_id: Uuid) -> Self {
        match tier {
            Tier::SuperStockist => ReceivingParty::SuperStockist(holder_id),
            Tier::Distributor => ReceivingParty::Distributor(holder_id),
            Tier::Retailer => ReceivingParty::Retailer(holder_id),
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            ReceivingParty::SuperStockist(_) => Tier::SuperStockist,
            ReceivingParty::Distributor(_) => Tier::Distributor,
            ReceivingParty::Retailer(_) => Tier::Retailer,
        }
    }

    pub fn holder_id(&self) -> Uuid {
        match self {
            ReceivingParty::SuperStockist(id)
            | ReceivingParty::Distributor(id)
            | ReceivingParty::Retailer(id) => *id,
        }
    }
}

/// Compile-time tier selector for the per-tier inventory routes.
pub trait TierScope: Send + Sync + 'static {
    const TIER: Tier;
}

#[derive(Debug, Clone, Copy)]
pub struct SuperStockistTier;
#[derive(Debug, Clone, Copy)]
pub struct DistributorTier;
#[derive(Debug, Clone, Copy)]
pub struct RetailerTier;

impl TierScope for SuperStockistTier {
    const TIER: Tier = Tier::SuperStockist;
}

impl TierScope for DistributorTier {
    const TIER: Tier = Tier::Distributor;
}

impl TierScope for RetailerTier {
    const TIER: Tier = Tier::Retailer;
}
