use chrono::Utc;
use serde_json::Value;

use crate::helpers::{spawn_app, Seed, TestApp};

async fn ship(app: &TestApp, warehouse: &str, awb_number: &str) {
    let response = app
        .post_json(
            "/handovers/",
            &serde_json::json!({"warehouse": warehouse, "courier": "fan_courier"}),
        )
        .await;
    let session: Value = response.json().await.unwrap();
    let session_id = session["id"].as_str().unwrap();
    let response = app
        .post_json(
            &format!("/handovers/{session_id}/scan"),
            &serde_json::json!({"awbNumber": awb_number}),
        )
        .await;
    assert!(response.status().is_success());
    let response = app
        .post_json(&format!("/handovers/{session_id}/finalize"), &Value::Null)
        .await;
    assert!(response.status().is_success());
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn shipment_from_a_sister_company_is_settled_with_markup() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    let import = app.seed_company("IMPORT", "CLJ1", 10).await;
    let retail = app.seed_company("RETAIL", "BUC1", 0).await;
    app.receive(&import, "TS-01", 10, 1500).await;
    // retail sells from the import warehouse
    let cross = Seed {
        company_id: retail.company_id.clone(),
        warehouse: import.warehouse.clone(),
    };
    let order_id = app.seed_invoiced_order(&cross, "SH-3001", "TS-01", 2).await;
    app.seed_awb(&order_id, "2150000201").await;
    ship(&app, &import.warehouse, "2150000201").await;

    let today = Utc::now().date_naive();
    let period = serde_json::json!({
        "from": (today - chrono::Duration::days(1)).to_string(),
        "to": (today + chrono::Duration::days(1)).to_string(),
    });
    let response = app.post_json("/settlements/run", &period).await;
    assert!(response.status().is_success());
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["ordersSettled"], 1);
    let created = outcome["created"].as_array().unwrap();
    assert_eq!(created.len(), 1);
    let settlement_id = created[0].as_str().unwrap().to_owned();

    let settlement = app.get_json(&format!("/settlements/{settlement_id}")).await;
    assert_eq!(settlement["issuerCompanyId"], import.company_id.as_str());
    assert_eq!(settlement["recipientCompanyId"], retail.company_id.as_str());
    assert_eq!(settlement["subtotal"], 3000);
    assert_eq!(settlement["markupAmount"], 300);
    assert_eq!(settlement["total"], 3300);
    assert_eq!(settlement["status"], "draft");

    // a settled order is not picked up again
    let response = app.post_json("/settlements/run", &period).await;
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["created"], serde_json::json!([]));

    let response = app
        .post_json(
            &format!("/settlements/{settlement_id}/issue"),
            &serde_json::json!({"series": "IC", "number": "0001", "issuedAt": Utc::now().timestamp()}),
        )
        .await;
    assert!(response.status().is_success());
    let issued: Value = response.json().await.unwrap();
    assert_eq!(issued["status"], "issued");
    assert_eq!(issued["invoice"]["provider"], "oblio");

    let response = app
        .post_json(&format!("/settlements/{settlement_id}/paid"), &Value::Null)
        .await;
    assert!(response.status().is_success());
    let response = app
        .post_json(&format!("/settlements/{settlement_id}/cancel"), &Value::Null)
        .await;
    assert_eq!(409, response.status().as_u16());
    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn own_warehouse_shipments_are_not_settled() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    let retail = app.seed_company("RETAIL", "BUC1", 0).await;
    let order_id = app.seed_invoiced_order(&retail, "SH-4001", "TS-01", 1).await;
    app.seed_awb(&order_id, "2150000301").await;
    ship(&app, &retail.warehouse, "2150000301").await;

    let today = Utc::now().date_naive();
    let response = app
        .post_json(
            "/settlements/run",
            &serde_json::json!({
                "from": (today - chrono::Duration::days(1)).to_string(),
                "to": (today + chrono::Duration::days(1)).to_string(),
            }),
        )
        .await;
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["created"], serde_json::json!([]));
    assert_eq!(outcome["skippedSameCompany"], 1);

    let response = app
        .post_json(
            "/settlements/run",
            &serde_json::json!({"from": today.to_string(), "to": (today - chrono::Duration::days(1)).to_string()}),
        )
        .await;
    assert_eq!(400, response.status().as_u16());
    app.cleanup().await;
}
