//! Tierstock API Library
//!
//! Order fulfillment and per-tier inventory ledgers for a factory,
//! super-stockist, distributor and retailer distribution network.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod services;
pub mod tracing;

use axum::{
    extract::{FromRef, State},
    http::HeaderValue,
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{AuthConfig, AuthService};
use crate::models::{
    DistributorTier, OrderType, PrimaryOrder, RetailerTier, SecondPrimaryOrder, SecondaryOrder,
    SuperStockistTier, Tier, TierScope,
};
use crate::services::directory::{DbDirectory, Directory};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Wires the services against the database-backed directory.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let directory: Arc<dyn Directory> = Arc::new(DbDirectory::new(db.clone()));
        Self::with_directory(db, config, event_sender, directory)
    }

    pub fn with_directory(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
        directory: Arc<dyn Directory>,
    ) -> Self {
        let event_sender = Arc::new(event_sender);
        let services =
            handlers::AppServices::new(db.clone(), directory, event_sender.clone(), &config);
        let auth = Arc::new(AuthService::new(AuthConfig::from_app_config(&config)));
        Self {
            db,
            config: Arc::new(config),
            event_sender,
            services,
            auth,
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

fn tier_routes<T: TierScope>(router: Router<AppState>) -> Router<AppState> {
    router.nest(
        &format!("/{}", T::TIER.path_segment()),
        handlers::inventory::inventory_routes::<T>(),
    )
}

pub fn api_v1_routes() -> Router<AppState> {
    use handlers::orders::order_routes;

    let router = Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .nest(
            &format!("/order/{}", OrderType::PrimaryOrder.path_segment()),
            order_routes::<PrimaryOrder>(),
        )
        .nest(
            &format!("/order/{}", OrderType::SecondPrimaryOrder.path_segment()),
            order_routes::<SecondPrimaryOrder>(),
        )
        .nest(
            &format!("/order/{}", OrderType::SecondaryOrder.path_segment()),
            order_routes::<SecondaryOrder>(),
        );

    let router = tier_routes::<SuperStockistTier>(router);
    let router = tier_routes::<DistributorTier>(router);
    tier_routes::<RetailerTier>(router)
}

fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Option<Vec<HeaderValue>> = cfg.cors_origins().map(|origins| {
        origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect()
    });

    match origins {
        Some(origins) if !origins.is_empty() => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        _ => CorsLayer::permissive(),
    }
}

/// Full application router: `/metrics`, the v1 API, and the HTTP layers.
pub fn app_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/api/v1", api_v1_routes())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(cors)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let mut sequences = serde_json::Map::new();
    for order_type in OrderType::iter() {
        let current = state
            .services
            .sequences
            .current(order_type.sequence_name())
            .await?;
        sequences.insert(order_type.sequence_name().to_string(), json!(current));
    }

    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "tierstock-api",
        "environment": state.config.environment,
        "tiers": Tier::iter().map(|t| t.path_segment()).collect::<Vec<_>>(),
        "invoice_sequences": sequences,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    db::check_connection(&state.db).await?;

    let health_data = json!({
        "status": "healthy",
        "checks": {
            "database": "healthy",
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
