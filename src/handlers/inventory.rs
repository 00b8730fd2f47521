use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::consts as perm;
use crate::entities::inventory_activity;
use crate::models::TierScope;
use crate::services::inventory_ledger::{BalanceDrift, BalanceView};
use crate::{auth::AuthUser, errors::ServiceError, ApiResponse, ApiResult, AppState};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct OpeningStockRequest {
    pub sku_id: Uuid,
    #[validate(range(min = 0, message = "current_inventory_level must not be negative"))]
    pub current_inventory_level: i64,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AdjustInventoryRequest {
    #[validate(range(min = 0, message = "current_inventory_level must not be negative"))]
    pub current_inventory_level: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub sku_id: Option<Uuid>,
}

/// Ledger routes for one tier, mounted under `/<tier>`.
pub fn inventory_routes<T: TierScope>() -> Router<AppState> {
    Router::new()
        .route(
            "/:holder_id/inventory",
            get(list_inventory::<T>).post(record_opening_stock::<T>),
        )
        .route(
            "/:holder_id/inventory/activity",
            get(list_activity::<T>),
        )
        .route(
            "/:holder_id/inventory/reconcile",
            get(reconcile_inventory::<T>),
        )
        .route(
            "/:holder_id/inventory/rebuild",
            post(rebuild_inventory::<T>),
        )
        .route(
            "/:holder_id/inventory/:inventory_id",
            patch(adjust_inventory::<T>),
        )
}

/// Record the first stock level of a SKU for a holder
pub async fn record_opening_stock<T: TierScope>(
    State(state): State<AppState>,
    Path(holder_id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<OpeningStockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    auth_user.require(perm::INVENTORY_ADJUST)?;
    request.validate()?;

    let balance = state
        .services
        .ledger
        .record_opening_stock(
            T::TIER,
            holder_id,
            request.sku_id,
            request.current_inventory_level,
            &auth_user.user_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(balance))))
}

/// Set a balance to an absolute level through a ledgered adjustment
pub async fn adjust_inventory<T: TierScope>(
    State(state): State<AppState>,
    Path((holder_id, inventory_id)): Path<(Uuid, Uuid)>,
    auth_user: AuthUser,
    Json(request): Json<AdjustInventoryRequest>,
) -> ApiResult<BalanceView> {
    auth_user.require(perm::INVENTORY_ADJUST)?;
    request.validate()?;

    let balance = state
        .services
        .ledger
        .manual_adjust(
            T::TIER,
            holder_id,
            inventory_id,
            request.current_inventory_level,
            &auth_user.user_id,
        )
        .await?;
    Ok(Json(ApiResponse::success(balance)))
}

pub async fn list_inventory<T: TierScope>(
    State(state): State<AppState>,
    Path(holder_id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<Vec<BalanceView>> {
    auth_user.require(perm::INVENTORY_READ)?;

    let balances = state.services.ledger.list_balances(T::TIER, holder_id).await?;
    Ok(Json(ApiResponse::success(balances)))
}

pub async fn list_activity<T: TierScope>(
    State(state): State<AppState>,
    Path(holder_id): Path<Uuid>,
    Query(query): Query<ActivityQuery>,
    auth_user: AuthUser,
) -> ApiResult<Vec<inventory_activity::Model>> {
    auth_user.require(perm::INVENTORY_READ)?;

    let activity = state
        .services
        .ledger
        .list_activity(T::TIER, holder_id, query.sku_id)
        .await?;
    Ok(Json(ApiResponse::success(activity)))
}

/// Report balances that disagree with the activity log
pub async fn reconcile_inventory<T: TierScope>(
    State(state): State<AppState>,
    Path(holder_id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<Vec<BalanceDrift>> {
    auth_user.require(perm::INVENTORY_READ)?;

    let drift = state.services.ledger.reconcile(T::TIER, holder_id).await?;
    Ok(Json(ApiResponse::success(drift)))
}

/// Rewrite balances from the activity log
pub async fn rebuild_inventory<T: TierScope>(
    State(state): State<AppState>,
    Path(holder_id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<Vec<BalanceDrift>> {
    auth_user.require(perm::INVENTORY_ADJUST)?;

    let corrected = state
        .services
        .ledger
        .rebuild_projection(T::TIER, holder_id)
        .await?;
    Ok(Json(ApiResponse::success(corrected)))
}
