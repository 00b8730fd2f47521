#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tierstock_api::{
    auth::consts as perm,
    config::AppConfig,
    db,
    entities::{party, sku},
    events::{self, EventSender},
    models::Tier,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    token: String,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: Option<TempDir>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // Every sqlite::memory: connection is its own database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        customize(&mut cfg);
        Self::start(cfg, None).await
    }

    /// Application over a SQLite file shared by `connections` pooled
    /// connections, so concurrent requests really run side by side.
    pub async fn file_backed(connections: u32) -> Self {
        let dir = TempDir::new().expect("create database directory");
        let path = dir.path().join("tierstock.db");
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", path.display()),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;
        Self::start(cfg, Some(dir)).await
    }

    async fn start(cfg: AppConfig, db_dir: Option<TempDir>) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), cfg, EventSender::new(event_tx));
        let token = state
            .auth
            .issue_token("test-admin", vec![perm::ADMIN_ROLE.to_string()], vec![])
            .expect("issue admin token");
        let router = tierstock_api::app_router(state.clone());

        Self {
            router,
            state,
            token,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Access the bearer token for the default admin user.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Token for a non-admin user holding only `permissions`.
    pub fn token_with(&self, user_id: &str, permissions: &[&str]) -> String {
        self.state
            .auth
            .issue_token(
                user_id,
                vec![],
                permissions.iter().map(|p| p.to_string()).collect(),
            )
            .expect("issue scoped token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for authenticated JSON requests.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Authenticated request returning the status and parsed JSON body.
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = self.request_authenticated(method, uri, body).await;
        read_json(response).await
    }

    pub async fn seed_party(&self, tier: Tier, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        party::ActiveModel {
            id: Set(id),
            tier: Set(tier.to_string()),
            name: Set(name.to_string()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed party");
        id
    }

    pub async fn seed_sku(&self, name: &str, margin: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        sku::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            product_name: Set(format!("{} product", name)),
            margin: Set(margin.into()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed sku");
        id
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body is json")
    };
    (status, body)
}
