use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::consts as perm;
use crate::handlers::AppServices;
use crate::models::{OrderKind, PrimaryOrder, SecondPrimaryOrder, SecondaryOrder};
use crate::services::orders::{
    CreateOrderRequest, ListOrdersQuery, OrderList, OrderView, TieredOrderService,
};
use crate::{auth::AuthUser, errors::ServiceError, ApiResponse, ApiResult, AppState};

/// Order kinds that are served over HTTP.
pub trait OrderRoutes: OrderKind + Sized {
    fn service(services: &AppServices) -> Arc<TieredOrderService<Self>>;
}

impl OrderRoutes for PrimaryOrder {
    fn service(services: &AppServices) -> Arc<TieredOrderService<Self>> {
        services.primary_orders.clone()
    }
}

impl OrderRoutes for SecondPrimaryOrder {
    fn service(services: &AppServices) -> Arc<TieredOrderService<Self>> {
        services.second_primary_orders.clone()
    }
}

impl OrderRoutes for SecondaryOrder {
    fn service(services: &AppServices) -> Arc<TieredOrderService<Self>> {
        services.secondary_orders.clone()
    }
}

/// Routes for one order type, mounted under `/order/<type>`.
pub fn order_routes<K: OrderRoutes>() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders::<K>).post(create_order::<K>))
        .route(
            "/:id",
            get(get_order::<K>)
                .patch(update_order_status::<K>)
                .delete(delete_order::<K>),
        )
}

/// Create an order in ORDERED with the next invoice number
#[instrument(skip(state, auth_user, request), fields(order_type = %K::ORDER_TYPE))]
pub async fn create_order<K: OrderRoutes>(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    auth_user.require(perm::ORDERS_CREATE)?;

    let created = K::service(&state.services)
        .create(request, &auth_user.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

pub async fn get_order<K: OrderRoutes>(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<OrderView> {
    auth_user.require(perm::ORDERS_READ)?;

    let order = K::service(&state.services).get(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// List orders with pagination and filters
pub async fn list_orders<K: OrderRoutes>(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
    auth_user: AuthUser,
) -> ApiResult<OrderList> {
    auth_user.require(perm::ORDERS_READ)?;

    let limit = state.config.page_size(query.limit);
    let orders = K::service(&state.services).list(query, limit).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// Change the status of an order. The body may only carry `status`.
#[instrument(skip(state, auth_user, changes), fields(order_type = %K::ORDER_TYPE))]
pub async fn update_order_status<K: OrderRoutes>(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(changes): Json<Value>,
) -> ApiResult<OrderView> {
    auth_user.require(perm::ORDERS_UPDATE)?;

    let order = state
        .services
        .fulfillment
        .update_status::<K>(id, &changes, &auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn delete_order<K: OrderRoutes>(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    auth_user.require(perm::ORDERS_DELETE)?;

    K::service(&state.services)
        .delete(id, &auth_user.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
