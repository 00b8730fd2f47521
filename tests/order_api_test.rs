//! Order CRUD endpoints: validation, defaults, listing and deletion.

mod common;

use std::str::FromStr;

use axum::http::{Method, StatusCode};
use common::{read_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tierstock_api::models::Tier;
use uuid::Uuid;

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a decimal: {}", other),
    }
}

async fn create_primary(app: &TestApp, distributor: Uuid, sku: Uuid, quantity: i64) -> Value {
    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/order/primary-order",
            Some(json!({
                "distributor_id": distributor,
                "line_items": [{ "sku_id": sku, "ordered_quantity": quantity, "landed_cost": "2.00" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["data"].clone()
}

#[tokio::test]
async fn create_fills_line_defaults_and_resolves_names() {
    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "Harbour Distribution").await;
    let ss = app.seed_party(Tier::SuperStockist, "Inland Stockist").await;
    let tea = app.seed_sku("Tea 250g", dec!(1.75)).await;
    let coffee = app.seed_sku("Coffee 100g", dec!(3)).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/order/second-primary-order",
            Some(json!({
                "super_stockist_id": ss,
                "distributor_id": distributor,
                "note": "first order of the season",
                "line_items": [
                    { "sku_id": tea, "ordered_quantity": 4, "landed_cost": "2.50" },
                    {
                        "sku_id": coffee,
                        "ordered_quantity": "3",
                        "final_quantity": 2,
                        "margin": "0.5",
                        "landed_cost": 10,
                        "total_cost": "25"
                    }
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let order = &body["data"];

    assert_eq!(order["order_type"], "SECOND_PRIMARY_ORDER");
    assert_eq!(order["invoice_number"], "SPO-1");
    assert_eq!(order["status"], "ORDERED");
    assert_eq!(order["version"], 1);
    assert_eq!(order["ordered_by"], "test-admin");
    assert_eq!(order["super_stockist"]["name"], "Inland Stockist");
    assert_eq!(order["distributor"]["name"], "Harbour Distribution");
    assert_eq!(order["retailer"], Value::Null);
    assert_eq!(order["receiving_party"]["tier"], "DISTRIBUTOR");

    let lines = order["line_items"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["position"], 0);
    assert_eq!(lines[0]["sku_name"], "Tea 250g");
    assert_eq!(lines[0]["product_name"], "Tea 250g product");
    assert_eq!(decimal(&lines[0]["final_quantity"]), dec!(4));
    assert_eq!(decimal(&lines[0]["margin"]), dec!(1.75));
    assert_eq!(decimal(&lines[0]["total_cost"]), dec!(10));

    assert_eq!(decimal(&lines[1]["final_quantity"]), dec!(2));
    assert_eq!(decimal(&lines[1]["margin"]), dec!(0.5));
    assert_eq!(decimal(&lines[1]["total_cost"]), dec!(25));

    assert_eq!(decimal(&order["total_quantity"]), dec!(7));
    assert_eq!(decimal(&order["total_cost"]), dec!(35));

    let (status, fetched) = app
        .call(
            Method::GET,
            &format!("/api/v1/order/second-primary-order/{}", order["id"].as_str().unwrap()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["data"]["invoice_number"], "SPO-1");
    assert_eq!(fetched["data"]["note"], "first order of the season");
}

#[tokio::test]
async fn create_rejects_wrong_party_combinations() {
    let app = TestApp::new().await;
    let ss = app.seed_party(Tier::SuperStockist, "Stockist").await;
    let distributor = app.seed_party(Tier::Distributor, "Distribution").await;
    let retailer = app.seed_party(Tier::Retailer, "Shop").await;
    let sku = app.seed_sku("Rice", dec!(1)).await;
    let line = json!([{ "sku_id": sku, "ordered_quantity": 1, "landed_cost": "1" }]);

    let cases = [
        (
            "primary-order",
            json!({ "super_stockist_id": ss, "distributor_id": distributor, "line_items": line }),
        ),
        ("primary-order", json!({ "line_items": line })),
        (
            "primary-order",
            json!({ "distributor_id": distributor, "retailer_id": retailer, "line_items": line }),
        ),
        (
            "second-primary-order",
            json!({ "distributor_id": distributor, "line_items": line }),
        ),
        (
            "secondary-order",
            json!({ "super_stockist_id": ss, "distributor_id": distributor, "retailer_id": retailer, "line_items": line }),
        ),
        (
            "secondary-order",
            json!({ "distributor_id": distributor, "retailer_id": retailer, "line_items": [] }),
        ),
    ];
    for (path, body) in cases {
        let (status, err) = app
            .call(Method::POST, &format!("/api/v1/order/{}", path), Some(body.clone()))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}: {}", path, body, err);
    }

    // Nothing was minted for rejected requests
    let (_, status_body) = app.call(Method::GET, "/api/v1/status", None).await;
    assert_eq!(status_body["data"]["invoice_sequences"]["primary-order"], Value::Null);
}

#[tokio::test]
async fn create_reports_every_bad_line_field() {
    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "Distribution").await;
    let sku = app.seed_sku("Rice", dec!(1)).await;

    let (status, err) = app
        .call(
            Method::POST,
            "/api/v1/order/primary-order",
            Some(json!({
                "distributor_id": distributor,
                "line_items": [
                    { "sku_id": sku, "ordered_quantity": "2.5", "landed_cost": "1" },
                    { "sku_id": sku, "ordered_quantity": 0, "landed_cost": "-1" }
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let messages: Vec<&str> = err["validationErrors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m.as_str().unwrap())
        .collect();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].starts_with("line_items[0].ordered_quantity"));
    assert!(messages.iter().any(|m| m.starts_with("line_items[1].landed_cost")));
}

#[tokio::test]
async fn create_requires_known_parties_and_skus() {
    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "Distribution").await;
    let sku = app.seed_sku("Rice", dec!(1)).await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/order/primary-order",
            Some(json!({
                "distributor_id": distributor,
                "line_items": [{ "sku_id": Uuid::new_v4(), "ordered_quantity": 1, "landed_cost": "1" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, err) = app
        .call(
            Method::POST,
            "/api/v1/order/primary-order",
            Some(json!({
                "super_stockist_id": distributor,
                "line_items": [{ "sku_id": sku, "ordered_quantity": 1, "landed_cost": "1" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "Not Found");
}

#[tokio::test]
async fn list_filters_and_paginates() {
    let app = TestApp::new().await;
    let north = app.seed_party(Tier::Distributor, "North").await;
    let south = app.seed_party(Tier::Distributor, "South").await;
    let sku = app.seed_sku("Rice", dec!(1)).await;

    let first = create_primary(&app, north, sku, 1).await;
    create_primary(&app, south, sku, 2).await;
    create_primary(&app, north, sku, 3).await;

    let (status, page) = app
        .call(Method::GET, "/api/v1/order/primary-order?limit=2", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"]["count"], 3);
    let invoices: Vec<&str> = page["data"]["orders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["invoice_number"].as_str().unwrap())
        .collect();
    assert_eq!(invoices, vec!["PO-3", "PO-2"]);
    assert_eq!(page["data"]["pagination"]["next"], json!({ "page": 2, "limit": 2 }));
    assert!(page["data"]["pagination"].get("prev").is_none());

    let (_, page2) = app
        .call(Method::GET, "/api/v1/order/primary-order?page=2&limit=2", None)
        .await;
    assert_eq!(page2["data"]["orders"][0]["invoice_number"], "PO-1");
    assert_eq!(page2["data"]["pagination"]["prev"], json!({ "page": 1, "limit": 2 }));
    assert!(page2["data"]["pagination"].get("next").is_none());

    let (_, by_holder) = app
        .call(
            Method::GET,
            &format!("/api/v1/order/primary-order?holder_id={}", north),
            None,
        )
        .await;
    assert_eq!(by_holder["data"]["count"], 2);

    let (_, by_invoice) = app
        .call(Method::GET, "/api/v1/order/primary-order?invoice_number=O-2", None)
        .await;
    assert_eq!(by_invoice["data"]["count"], 1);
    assert_eq!(by_invoice["data"]["orders"][0]["invoice_number"], "PO-2");

    let first_id = first["id"].as_str().unwrap();
    app.call(
        Method::PATCH,
        &format!("/api/v1/order/primary-order/{}", first_id),
        Some(json!({ "status": "ORDER_APPROVED" })),
    )
    .await;
    let (_, approved) = app
        .call(Method::GET, "/api/v1/order/primary-order?status=ORDER_APPROVED", None)
        .await;
    assert_eq!(approved["data"]["count"], 1);
    assert_eq!(approved["data"]["orders"][0]["id"], first_id);

    let (status, _) = app
        .call(Method::GET, "/api/v1/order/primary-order?status=LOST", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Other order types are listed separately
    let (_, secondary) = app
        .call(Method::GET, "/api/v1/order/secondary-order", None)
        .await;
    assert_eq!(secondary["data"]["count"], 0);
    assert_eq!(secondary["data"]["orders"], json!([]));
}

#[tokio::test]
async fn out_of_range_pages_are_rejected() {
    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "Depot").await;
    let sku = app.seed_sku("Rice", dec!(1)).await;
    create_primary(&app, distributor, sku, 1).await;

    for uri in [
        "/api/v1/order/primary-order?page=18446744073709551615",
        "/api/v1/order/primary-order?page=9223372036854775807&limit=2",
    ] {
        let (status, err) = app.call(Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(err["error"], "Bad Request");
    }

    // Far but representable pages are simply empty
    let (status, page) = app
        .call(Method::GET, "/api/v1/order/primary-order?page=1000", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"]["count"], 1);
    assert_eq!(page["data"]["orders"], json!([]));
    assert!(page["data"]["pagination"].get("next").is_none());
}

#[tokio::test]
async fn oversized_line_values_are_rejected_instead_of_overflowing() {
    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "Depot").await;
    let sku = app.seed_sku("Rice", dec!(1)).await;

    let (status, err) = app
        .call(
            Method::POST,
            "/api/v1/order/primary-order",
            Some(json!({
                "distributor_id": distributor,
                "line_items": [
                    {
                        "sku_id": sku,
                        "ordered_quantity": "9000000000000000000",
                        "landed_cost": "79228162514264337593543950335"
                    },
                    { "sku_id": sku, "ordered_quantity": 1000000000, "landed_cost": "10000000" }
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", err);
    let fields: Vec<&str> = err["validationErrors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m.as_str().unwrap().split(':').next().unwrap())
        .collect();
    assert_eq!(
        fields,
        vec![
            "line_items[0].ordered_quantity",
            "line_items[0].landed_cost",
            "line_items[0].total_cost",
            "line_items[1].total_cost",
        ]
    );

    let (_, listed) = app
        .call(Method::GET, "/api/v1/order/primary-order", None)
        .await;
    assert_eq!(listed["data"]["count"], 0);
}

#[tokio::test]
async fn fixed_point_values_are_stored_exactly() {
    use sea_orm::EntityTrait;
    use tierstock_api::entities::{numeric::Numeric, sku};

    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "Depot").await;
    let sku_id = app.seed_sku("Saffron", dec!(1234567890.1234)).await;

    let stored = sku::Entity::find_by_id(sku_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.margin, Numeric(dec!(1234567890.1234)));
    assert_eq!(stored.margin.to_string(), "1234567890.1234");

    let (status, created) = app
        .call(
            Method::POST,
            "/api/v1/order/primary-order",
            Some(json!({
                "distributor_id": distributor,
                "line_items": [{ "sku_id": sku_id, "ordered_quantity": 3, "landed_cost": "1234567890.1234" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);

    let (_, fetched) = app
        .call(
            Method::GET,
            &format!(
                "/api/v1/order/primary-order/{}",
                created["data"]["id"].as_str().unwrap()
            ),
            None,
        )
        .await;
    let line = &fetched["data"]["line_items"][0];
    assert_eq!(line["landed_cost"], "1234567890.1234");
    assert_eq!(line["margin"], "1234567890.1234");
    assert_eq!(line["total_cost"], "3703703670.3702");
    assert_eq!(fetched["data"]["total_cost"], "3703703670.3702");
}

#[tokio::test]
async fn page_size_is_clamped_to_the_configured_maximum() {
    let app = TestApp::with_config(|cfg| cfg.api_max_page_size = 2).await;
    let distributor = app.seed_party(Tier::Distributor, "Depot").await;
    let sku = app.seed_sku("Rice", dec!(1)).await;
    for quantity in 1..=3 {
        create_primary(&app, distributor, sku, quantity).await;
    }

    let (_, page) = app
        .call(Method::GET, "/api/v1/order/primary-order?limit=50", None)
        .await;
    assert_eq!(page["data"]["orders"].as_array().unwrap().len(), 2);
    assert_eq!(page["data"]["pagination"]["next"]["limit"], 2);
}

#[tokio::test]
async fn delete_removes_the_order_but_keeps_posted_stock() {
    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "Depot").await;
    let sku = app.seed_sku("Rice", dec!(1)).await;
    let order = create_primary(&app, distributor, sku, 6).await;
    let uri = format!("/api/v1/order/primary-order/{}", order["id"].as_str().unwrap());

    for status in ["ORDER_APPROVED", "REACHED_DESTINATION"] {
        let (code, _) = app
            .call(Method::PATCH, &uri, Some(json!({ "status": status })))
            .await;
        assert_eq!(code, StatusCode::OK);
    }

    let (status, body) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = app.call(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, balances) = app
        .call(
            Method::GET,
            &format!("/api/v1/distributor/{}/inventory", distributor),
            None,
        )
        .await;
    assert_eq!(balances["data"][0]["current_inventory_level"], 6);
}

#[tokio::test]
async fn order_routes_enforce_permissions() {
    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "Depot").await;
    let sku = app.seed_sku("Rice", dec!(1)).await;
    let body = json!({
        "distributor_id": distributor,
        "line_items": [{ "sku_id": sku, "ordered_quantity": 1, "landed_cost": "1" }]
    });

    let reader = app.token_with("viewer", &["orders:read"]);
    let response = app
        .request(
            Method::POST,
            "/api/v1/order/primary-order",
            Some(body.clone()),
            Some(&reader),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .request(Method::GET, "/api/v1/order/primary-order", None, Some(&reader))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(Method::GET, "/api/v1/order/primary-order", None, None)
        .await;
    let (status, err) = read_json(response).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["status"], 401);

    let response = app
        .request(
            Method::GET,
            "/api/v1/order/primary-order",
            None,
            Some("not-a-token"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let clerk = app.token_with("clerk", &["orders:create"]);
    let response = app
        .request(
            Method::POST,
            "/api/v1/order/primary-order",
            Some(body),
            Some(&clerk),
        )
        .await;
    let (status, created) = read_json(response).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["ordered_by"], "clerk");
}

#[tokio::test]
async fn service_endpoints_report_health_and_metrics() {
    let app = TestApp::new().await;
    let distributor = app.seed_party(Tier::Distributor, "Depot").await;
    let sku = app.seed_sku("Rice", dec!(1)).await;
    create_primary(&app, distributor, sku, 1).await;

    let (status, health) = app.call(Method::GET, "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["data"]["status"], "healthy");

    let (status, info) = app.call(Method::GET, "/api/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["success"], true);
    assert_eq!(
        info["data"]["tiers"],
        json!(["super-stockist", "distributor", "retailer"])
    );

    let response = app.request(Method::GET, "/metrics", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("orders_created_total"));

    let response = app
        .request_authenticated(Method::GET, "/api/v1/health", None)
        .await;
    assert!(response.headers().contains_key("x-request-id"));
}
