//! Per-tier ledger tests over HTTP and against the service.

mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use tierstock_api::entities::inventory_balance;
use tierstock_api::errors::ServiceError;
use tierstock_api::models::Tier;
use tierstock_api::services::inventory_ledger::{StockPosting, ORDER_RECEIPT_REASON};
use uuid::Uuid;

#[tokio::test]
async fn opening_stock_is_recorded_once() {
    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "West Distribution").await;
    let sku = app.seed_sku("Soap", dec!(1.25)).await;
    let uri = format!("/api/v1/distributor/{}/inventory", distributor);

    let (status, body) = app
        .call(
            Method::POST,
            &uri,
            Some(json!({ "sku_id": sku, "current_inventory_level": 40 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["current_inventory_level"], 40);
    assert_eq!(body["data"]["sku_name"], "Soap");

    let (status, body) = app
        .call(
            Method::POST,
            &uri,
            Some(json!({ "sku_id": sku, "current_inventory_level": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);

    let (_, activity) = app
        .call(Method::GET, &format!("{}/activity", uri), None)
        .await;
    let rows = activity["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["comment"], "opening stock");
    assert_eq!(rows[0]["quantity_delta"], 40);
}

#[tokio::test]
async fn opening_stock_requires_known_holder_and_sku() {
    let app = TestApp::new().await;
    let retailer = app.seed_party(Tier::Retailer, "Kiosk").await;
    let sku = app.seed_sku("Matches", dec!(0.1)).await;

    // A retailer id is not a distributor
    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/distributor/{}/inventory", retailer),
            Some(json!({ "sku_id": sku, "current_inventory_level": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/retailer/{}/inventory", retailer),
            Some(json!({ "sku_id": Uuid::new_v4(), "current_inventory_level": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/v1/retailer/{}/inventory", retailer),
            Some(json!({ "sku_id": sku, "current_inventory_level": -1 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["validationErrors"].is_array());
}

#[tokio::test]
async fn manual_adjustment_is_ledgered_as_a_delta() {
    let app = TestApp::new().await;
    let ss = app.seed_party(Tier::SuperStockist, "Hub").await;
    let sku = app.seed_sku("Oil 1L", dec!(3)).await;
    let uri = format!("/api/v1/super-stockist/{}/inventory", ss);

    let (_, opened) = app
        .call(
            Method::POST,
            &uri,
            Some(json!({ "sku_id": sku, "current_inventory_level": 10 })),
        )
        .await;
    let balance_id = opened["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(
            Method::PATCH,
            &format!("{}/{}", uri, balance_id),
            Some(json!({ "current_inventory_level": 25 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["current_inventory_level"], 25);

    let (_, activity) = app
        .call(Method::GET, &format!("{}/activity?sku_id={}", uri, sku), None)
        .await;
    let rows = activity["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    let adjustment = rows
        .iter()
        .find(|r| r["comment"] == "manual adjustment")
        .expect("adjustment row");
    assert_eq!(adjustment["quantity_delta"], 15);
    assert_eq!(adjustment["actor"], "test-admin");

    // Lowering is a negative delta
    let (status, body) = app
        .call(
            Method::PATCH,
            &format!("{}/{}", uri, balance_id),
            Some(json!({ "current_inventory_level": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["current_inventory_level"], 0);

    let (_, drift) = app
        .call(Method::GET, &format!("{}/reconcile", uri), None)
        .await;
    assert_eq!(drift["data"], json!([]));
}

#[tokio::test]
async fn manual_adjustment_rejects_bad_targets() {
    let app = TestApp::new().await;
    let ss = app.seed_party(Tier::SuperStockist, "Hub").await;
    let other = app.seed_party(Tier::SuperStockist, "Other Hub").await;
    let sku = app.seed_sku("Salt", dec!(0.5)).await;
    let uri = format!("/api/v1/super-stockist/{}/inventory", ss);
    let (_, opened) = app
        .call(
            Method::POST,
            &uri,
            Some(json!({ "sku_id": sku, "current_inventory_level": 3 })),
        )
        .await;
    let balance_id = opened["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .call(
            Method::PATCH,
            &format!("{}/{}", uri, balance_id),
            Some(json!({ "current_inventory_level": -4 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Balance belongs to another holder
    let (status, _) = app
        .call(
            Method::PATCH,
            &format!("/api/v1/super-stockist/{}/inventory/{}", other, balance_id),
            Some(json!({ "current_inventory_level": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Same holder id under the wrong tier
    let (status, _) = app
        .call(
            Method::PATCH,
            &format!("/api/v1/retailer/{}/inventory/{}", ss, balance_id),
            Some(json!({ "current_inventory_level": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_line_postings_are_applied_once() {
    let app = TestApp::new().await;
    let retailer = app.seed_party(Tier::Retailer, "Shop").await;
    let sku = app.seed_sku("Biscuits", dec!(0.2)).await;
    let ledger = app.state.services.ledger.clone();
    let order_id = Uuid::new_v4();
    let line_id = Uuid::new_v4();

    let posting =
        StockPosting::order_receipt(Tier::Retailer, retailer, sku, 12, order_id, line_id, "u-1");
    let first = ledger.increment_balance(posting.clone()).await.unwrap();
    assert!(first.applied);
    assert_eq!(first.balance.current_inventory_level, 12);

    let second = ledger.increment_balance(posting).await.unwrap();
    assert!(!second.applied);
    assert_eq!(second.balance.current_inventory_level, 12);

    let activity = ledger
        .list_activity(Tier::Retailer, retailer, Some(sku))
        .await
        .unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].comment, ORDER_RECEIPT_REASON);
}

#[tokio::test]
async fn increments_create_the_balance_lazily_and_allow_negative_levels() {
    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "Depot").await;
    let sku = app.seed_sku("Sugar", dec!(1)).await;
    let ledger = app.state.services.ledger.clone();

    let outcome = ledger
        .increment_balance(StockPosting {
            tier: Tier::Distributor,
            holder_id: distributor,
            sku_id: sku,
            delta: -3,
            reason: "correction".into(),
            originating_order_id: None,
            order_line_item_id: None,
            actor: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.balance.current_inventory_level, -3);
    assert_eq!(outcome.balance.version, 1);

    let outcome = ledger
        .increment_balance(StockPosting {
            tier: Tier::Distributor,
            holder_id: distributor,
            sku_id: sku,
            delta: 8,
            reason: "correction".into(),
            originating_order_id: None,
            order_line_item_id: None,
            actor: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.balance.current_inventory_level, 5);
    assert_eq!(outcome.balance.version, 2);

    let balances = ledger
        .list_balances(Tier::Distributor, distributor)
        .await
        .unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].product_name.as_deref(), Some("Sugar product"));
}

#[tokio::test]
async fn rebuild_restores_balances_from_the_log() {
    let app = TestApp::new().await;
    let retailer = app.seed_party(Tier::Retailer, "Stall").await;
    let sku = app.seed_sku("Candles", dec!(0.3)).await;
    let ledger = app.state.services.ledger.clone();

    let opened = ledger
        .record_opening_stock(Tier::Retailer, retailer, sku, 9, "seed")
        .await
        .unwrap();

    // Tamper with the projection behind the ledger's back
    let row = inventory_balance::Entity::find_by_id(opened.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: inventory_balance::ActiveModel = row.into();
    active.current_inventory_level = Set(100);
    active.update(&*app.state.db).await.unwrap();

    let uri = format!("/api/v1/retailer/{}/inventory", retailer);
    let (_, drift) = app
        .call(Method::GET, &format!("{}/reconcile", uri), None)
        .await;
    assert_eq!(
        drift["data"],
        json!([{ "sku_id": sku, "balance_level": 100, "ledger_total": 9 }])
    );

    let (status, fixed) = app
        .call(Method::POST, &format!("{}/rebuild", uri), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fixed["data"].as_array().unwrap().len(), 1);

    let (_, drift) = app
        .call(Method::GET, &format!("{}/reconcile", uri), None)
        .await;
    assert_eq!(drift["data"], json!([]));
    let (_, balances) = app.call(Method::GET, &uri, None).await;
    assert_eq!(balances["data"][0]["current_inventory_level"], 9);
}

#[tokio::test]
async fn duplicate_opening_stock_maps_to_duplicate_error() {
    let app = TestApp::new().await;
    let retailer = app.seed_party(Tier::Retailer, "Booth").await;
    let sku = app.seed_sku("Pens", dec!(0.05)).await;
    let ledger = app.state.services.ledger.clone();

    ledger
        .record_opening_stock(Tier::Retailer, retailer, sku, 1, "seed")
        .await
        .unwrap();
    assert_matches!(
        ledger
            .record_opening_stock(Tier::Retailer, retailer, sku, 1, "seed")
            .await,
        Err(ServiceError::Duplicate(_))
    );
}

#[tokio::test]
async fn inventory_routes_enforce_permissions() {
    let app = TestApp::new().await;
    let retailer = app.seed_party(Tier::Retailer, "Booth").await;
    let sku = app.seed_sku("Ink", dec!(0.05)).await;
    let uri = format!("/api/v1/retailer/{}/inventory", retailer);

    let reader = app.token_with("auditor", &["inventory:read"]);
    let response = app
        .request(
            Method::POST,
            &uri,
            Some(json!({ "sku_id": sku, "current_inventory_level": 1 })),
            Some(&reader),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.request(Method::GET, &uri, None, Some(&reader)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
