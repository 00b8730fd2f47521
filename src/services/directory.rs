use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::entities::{party, sku};
use crate::errors::ServiceError;
use crate::models::Tier;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyRecord {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuRecord {
    pub id: Uuid,
    pub name: String,
    pub product_name: String,
    pub margin: Decimal,
}

/// Read-only view onto the territory and catalog services.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn party(&self, tier: Tier, id: Uuid) -> Result<Option<PartyRecord>, ServiceError>;

    async fn sku(&self, id: Uuid) -> Result<Option<SkuRecord>, ServiceError>;

    async fn require_party(&self, tier: Tier, id: Uuid) -> Result<PartyRecord, ServiceError> {
        self.party(tier, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("{} {} not found", tier, id)))
    }

    async fn require_sku(&self, id: Uuid) -> Result<SkuRecord, ServiceError> {
        self.sku(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("SKU {} not found", id)))
    }
}

/// Directory backed by the `parties` and `skus` tables.
#[derive(Clone)]
pub struct DbDirectory {
    db: Arc<DatabaseConnection>,
}

impl DbDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Directory for DbDirectory {
    async fn party(&self, tier: Tier, id: Uuid) -> Result<Option<PartyRecord>, ServiceError> {
        let found = party::Entity::find_by_id(id)
            .filter(party::Column::Tier.eq(tier.to_string()))
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to look up {} {}: {}", tier, id, e);
                ServiceError::from(e)
            })?;
        Ok(found.map(|p| PartyRecord {
            id: p.id,
            name: p.name,
        }))
    }

    async fn sku(&self, id: Uuid) -> Result<Option<SkuRecord>, ServiceError> {
        let found = sku::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to look up SKU {}: {}", id, e);
                ServiceError::from(e)
            })?;
        Ok(found.map(|s| SkuRecord {
            id: s.id,
            name: s.name,
            product_name: s.product_name,
            margin: s.margin.0,
        }))
    }
}
