pub mod inventory_activity;
pub mod inventory_balance;
pub mod numeric;
pub mod order;
pub mod order_line_item;
pub mod party;
pub mod sequence_counter;
pub mod sku;
