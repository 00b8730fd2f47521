pub mod directory;
pub mod fulfillment;
pub mod inventory_ledger;
pub mod orders;
pub mod sequence;
