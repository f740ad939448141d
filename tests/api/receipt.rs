use serde_json::Value;

use crate::helpers::{spawn_app, TestApp};

async fn create_receipt(app: &TestApp, company_id: &str, warehouse: &str) -> Value {
    let response = app
        .post_json(
            "/receipts/",
            &serde_json::json!({
                "companyId": company_id,
                "warehouse": warehouse,
                "supplierName": "Textile Grup SRL",
                "supplierInvoiceNo": "TG-1182",
                "lines": [
                    {"sku": "TS-01", "name": "T-shirt", "expectedQty": 10, "unitCost": 1500},
                    {"sku": "HD-07", "name": "Hoodie", "expectedQty": 4, "unitCost": 6000},
                ],
            }),
        )
        .await;
    assert_eq!(201, response.status().as_u16());
    response.json().await.unwrap()
}

async fn act(app: &TestApp, id: &str, action: &str, body: Value) -> Value {
    let response = app.post_json(&format!("/receipts/{id}/{action}"), &body).await;
    assert!(
        response.status().is_success(),
        "{action} failed with {}",
        response.status()
    );
    response.json().await.unwrap()
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn matching_receipt_is_approved_and_posted_to_stock() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    let seed = app.seed_company("RETAIL", "BUC1", 0).await;
    let receipt = create_receipt(&app, &seed.company_id, &seed.warehouse).await;
    assert_eq!(receipt["status"], "CIORNA");
    assert!(receipt["receiptNo"].as_str().unwrap().starts_with("NIR-"));
    let id = receipt["id"].as_str().unwrap().to_owned();

    act(&app, &id, "start", Value::Null).await;
    act(
        &app,
        &id,
        "counts",
        serde_json::json!([
            {"sku": "TS-01", "receivedQty": 10},
            {"sku": "HD-07", "receivedQty": 4},
        ]),
    )
    .await;
    let verified = act(&app, &id, "verify", Value::Null).await;
    assert_eq!(verified["status"], "VERIFICAT");
    assert_eq!(verified["hasDifferences"], false);
    let approved = act(&app, &id, "approve", Value::Null).await;
    assert_eq!(approved["status"], "APROBAT");
    assert_eq!(approved["operationIds"].as_array().unwrap().len(), 2);

    let quantity = app.get_json("/inventory/quantity/HD-07").await;
    assert_eq!(quantity, serde_json::json!([{"warehouse": "BUC1", "quantity": 4}]));
    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn differences_need_a_manager_before_approval() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    let clerk = app.client_with_role("clerk1", "editor").await;
    let seed = app.seed_company("RETAIL", "BUC1", 0).await;
    let receipt = create_receipt(&app, &seed.company_id, &seed.warehouse).await;
    let id = receipt["id"].as_str().unwrap().to_owned();
    act(&app, &id, "start", Value::Null).await;
    act(
        &app,
        &id,
        "counts",
        serde_json::json!([
            {"sku": "TS-01", "receivedQty": 8},
            {"sku": "HD-07", "receivedQty": 4, "damagedQty": 1},
        ]),
    )
    .await;
    let verified = act(&app, &id, "verify", Value::Null).await;
    assert_eq!(verified["hasDifferences"], true);
    assert_eq!(verified["differences"].as_array().unwrap().len(), 2);

    let base = app.private_base_uri();
    let response = clerk
        .post(format!("{base}/receipts/{id}/approve"))
        .send()
        .await
        .expect("Failed execute request");
    assert_eq!(403, response.status().as_u16());
    let response = clerk
        .post(format!("{base}/receipts/{id}/approve_differences"))
        .send()
        .await
        .expect("Failed execute request");
    assert_eq!(403, response.status().as_u16());

    let approved = act(
        &app,
        &id,
        "approve_differences",
        serde_json::json!({"note": "supplier credit note follows"}),
    )
    .await;
    assert!(approved["managerApproval"].is_object());
    let response = clerk
        .post(format!("{base}/receipts/{id}/approve"))
        .send()
        .await
        .expect("Failed execute request");
    assert!(response.status().is_success());

    let quantity = app.get_json("/inventory/quantity/HD-07").await;
    assert_eq!(quantity, serde_json::json!([{"warehouse": "BUC1", "quantity": 3}]));
    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn rejected_receipt_can_be_reopened_and_recounted() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    let seed = app.seed_company("RETAIL", "BUC1", 0).await;
    let receipt = create_receipt(&app, &seed.company_id, &seed.warehouse).await;
    let id = receipt["id"].as_str().unwrap().to_owned();
    act(&app, &id, "start", Value::Null).await;
    act(
        &app,
        &id,
        "counts",
        serde_json::json!([{"sku": "TS-01", "receivedQty": 1}, {"sku": "HD-07", "receivedQty": 4}]),
    )
    .await;
    act(&app, &id, "verify", Value::Null).await;

    let response = app
        .post_json(&format!("/receipts/{id}/reject"), &serde_json::json!({"reason": ""}))
        .await;
    assert_eq!(400, response.status().as_u16());
    let rejected = act(
        &app,
        &id,
        "reject",
        serde_json::json!({"reason": "wrong delivery"}),
    )
    .await;
    assert_eq!(rejected["status"], "RESPINS");
    let reopened = act(&app, &id, "reopen", Value::Null).await;
    assert_eq!(reopened["status"], "IN_RECEPTIE");
    assert_eq!(reopened["differences"], serde_json::json!([]));

    // approving out of order is a conflict
    let response = app
        .post_json(&format!("/receipts/{id}/approve"), &Value::Null)
        .await;
    assert_eq!(409, response.status().as_u16());
    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn receipt_warehouse_must_belong_to_its_company() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    let retail = app.seed_company("RETAIL", "BUC1", 0).await;
    let import = app.seed_company("IMPORT", "CLJ1", 5).await;
    let response = app
        .post_json(
            "/receipts/",
            &serde_json::json!({
                "companyId": retail.company_id,
                "warehouse": import.warehouse,
                "supplierName": "Textile Grup SRL",
                "lines": [{"sku": "TS-01", "expectedQty": 1, "unitCost": 1500}],
            }),
        )
        .await;
    assert_eq!(400, response.status().as_u16());
    app.cleanup().await;
}
