use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_directory_tables::Migration),
            Box::new(m20240101_000002_create_sequence_counters_table::Migration),
            Box::new(m20240101_000003_create_orders_tables::Migration),
            Box::new(m20240101_000004_create_inventory_ledger_tables::Migration),
        ]
    }
}

/// Exact `NUMERIC(19, 4)` on Postgres. SQLite would store a decimal column
/// as a float, so it gets text and `entities::numeric::Numeric` parses it.
fn fixed_point<T: IntoIden>(manager: &SchemaManager, name: T) -> ColumnDef {
    let mut column = ColumnDef::new(name);
    match manager.get_database_backend() {
        sea_orm::DbBackend::Sqlite => column.text(),
        _ => column.decimal_len(19, 4),
    };
    column.not_null();
    column
}

// Migration implementations

mod m20240101_000001_create_directory_tables {
    use super::fixed_point;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_directory_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Read-only mirrors of the territory and catalog services
            manager
                .create_table(
                    Table::create()
                        .table(Parties::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Parties::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Parties::Tier).string().not_null())
                        .col(ColumnDef::new(Parties::Name).string().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Skus::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Skus::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Skus::Name).string().not_null())
                        .col(ColumnDef::new(Skus::ProductName).string().not_null())
                        .col(fixed_point(manager, Skus::Margin))
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Skus::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Parties::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Parties {
        Table,
        Id,
        Tier,
        Name,
    }

    #[derive(DeriveIden)]
    enum Skus {
        Table,
        Id,
        Name,
        ProductName,
        Margin,
    }
}

mod m20240101_000002_create_sequence_counters_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_sequence_counters_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SequenceCounters::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SequenceCounters::Name)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SequenceCounters::Value)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SequenceCounters::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum SequenceCounters {
        Table,
        Name,
        Value,
    }
}

mod m20240101_000003_create_orders_tables {
    use super::fixed_point;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create orders table aligned with entities::order Model
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderType).string().not_null())
                        .col(ColumnDef::new(Orders::InvoiceNumber).string().not_null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::SuperStockistId).uuid().null())
                        .col(ColumnDef::new(Orders::DistributorId).uuid().null())
                        .col(ColumnDef::new(Orders::RetailerId).uuid().null())
                        .col(ColumnDef::new(Orders::ReceivingTier).string().not_null())
                        .col(ColumnDef::new(Orders::ReceivingHolderId).uuid().not_null())
                        .col(ColumnDef::new(Orders::OrderedBy).string().not_null())
                        .col(ColumnDef::new(Orders::Note).text().null())
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::UpdatedBy).string().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_invoice_number")
                        .table(Orders::Table)
                        .col(Orders::InvoiceNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_type_status")
                        .table(Orders::Table)
                        .col(Orders::OrderType)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_receiving_holder")
                        .table(Orders::Table)
                        .col(Orders::ReceivingHolderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderLineItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderLineItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderLineItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderLineItems::Position).integer().not_null())
                        .col(ColumnDef::new(OrderLineItems::SkuId).uuid().not_null())
                        .col(fixed_point(manager, OrderLineItems::OrderedQuantity))
                        .col(fixed_point(manager, OrderLineItems::FinalQuantity))
                        .col(fixed_point(manager, OrderLineItems::Margin))
                        .col(fixed_point(manager, OrderLineItems::LandedCost))
                        .col(fixed_point(manager, OrderLineItems::TotalCost))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_line_items_order")
                                .from(OrderLineItems::Table, OrderLineItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_order_line_items_order")
                        .table(OrderLineItems::Table)
                        .col(OrderLineItems::OrderId)
                        .col(OrderLineItems::Position)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderLineItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderType,
        InvoiceNumber,
        Status,
        SuperStockistId,
        DistributorId,
        RetailerId,
        ReceivingTier,
        ReceivingHolderId,
        OrderedBy,
        Note,
        Version,
        CreatedAt,
        UpdatedAt,
        UpdatedBy,
    }

    #[derive(DeriveIden)]
    enum OrderLineItems {
        Table,
        Id,
        OrderId,
        Position,
        SkuId,
        OrderedQuantity,
        FinalQuantity,
        Margin,
        LandedCost,
        TotalCost,
    }
}

mod m20240101_000004_create_inventory_ledger_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_inventory_ledger_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryBalances::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryBalances::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryBalances::Tier).string().not_null())
                        .col(ColumnDef::new(InventoryBalances::HolderId).uuid().not_null())
                        .col(ColumnDef::new(InventoryBalances::SkuId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryBalances::CurrentInventoryLevel)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryBalances::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(InventoryBalances::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryBalances::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Upserts conflict on this key
            manager
                .create_index(
                    Index::create()
                        .name("idx_inventory_balances_tier_holder_sku")
                        .table(InventoryBalances::Table)
                        .col(InventoryBalances::Tier)
                        .col(InventoryBalances::HolderId)
                        .col(InventoryBalances::SkuId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryActivities::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryActivities::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryActivities::Tier).string().not_null())
                        .col(
                            ColumnDef::new(InventoryActivities::HolderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryActivities::SkuId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryActivities::QuantityDelta)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryActivities::Comment)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryActivities::OriginatingOrderId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryActivities::OrderLineItemId)
                                .uuid()
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryActivities::Actor).string().null())
                        .col(
                            ColumnDef::new(InventoryActivities::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_inventory_activities_holder_sku")
                        .table(InventoryActivities::Table)
                        .col(InventoryActivities::Tier)
                        .col(InventoryActivities::HolderId)
                        .col(InventoryActivities::SkuId)
                        .to_owned(),
                )
                .await?;

            // A line item is posted at most once; NULL pairs (opening stock,
            // manual adjustments) never collide.
            manager
                .create_index(
                    Index::create()
                        .name("idx_inventory_activities_order_line")
                        .table(InventoryActivities::Table)
                        .col(InventoryActivities::OriginatingOrderId)
                        .col(InventoryActivities::OrderLineItemId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryActivities::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryBalances::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryBalances {
        Table,
        Id,
        Tier,
        HolderId,
        SkuId,
        CurrentInventoryLevel,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryActivities {
        Table,
        Id,
        Tier,
        HolderId,
        SkuId,
        QuantityDelta,
        Comment,
        OriginatingOrderId,
        OrderLineItemId,
        Actor,
        CreatedAt,
    }
}
