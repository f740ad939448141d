use serde_json::Value;

use crate::helpers::spawn_app;

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn adjustment_moves_stock_and_is_queryable() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    let seed = app.seed_company("RETAIL", "BUC1", 0).await;
    app.receive(&seed, "TS-01", 12, 1500).await;
    app.receive(&seed, "HD-07", 3, 6000).await;
    app.seed_stock(&seed.warehouse, "TS-01", -2).await;

    let quantity = app.get_json("/inventory/quantity/TS-01").await;
    assert_eq!(
        quantity,
        serde_json::json!([{"warehouse": "BUC1", "quantity": 10}])
    );
    let operations = app.get_json("/inventory/operations/TS-01").await;
    assert_eq!(operations.as_array().unwrap().len(), 2);

    let response = app
        .request_client
        .get(format!("{}/inventory/", app.private_base_uri()))
        .query(&[("keyword", "TS"), ("showZeroQuantity", "true")])
        .send()
        .await
        .expect("Failed to request");
    assert!(response.status().is_success());
    let page: Value = response.json().await.expect("Failed to deserialize json");
    let items = page["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["sku"], "TS-01");
    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn adjustment_needs_a_reason_and_a_known_item() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    let seed = app.seed_company("RETAIL", "BUC1", 0).await;
    app.receive(&seed, "TS-01", 1, 1500).await;
    let response = app
        .post_json(
            "/inventory/adjustments",
            &serde_json::json!({"sku": "TS-01", "warehouse": "BUC1", "delta": 1, "reason": " "}),
        )
        .await;
    assert_eq!(400, response.status().as_u16());
    let response = app
        .post_json(
            "/inventory/adjustments",
            &serde_json::json!({"sku": "TS-01", "warehouse": "CLJ9", "delta": 1, "reason": "found"}),
        )
        .await;
    assert_eq!(404, response.status().as_u16());
    let response = app
        .post_json(
            "/inventory/adjustments",
            &serde_json::json!({"sku": "XX-99", "warehouse": "BUC1", "delta": 1, "reason": "found"}),
        )
        .await;
    assert_eq!(404, response.status().as_u16());
    app.cleanup().await;
}
