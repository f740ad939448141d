use serde_json::Value;

use crate::helpers::{spawn_app, Seed, TestApp};

async fn open_session(app: &TestApp, seed: &Seed) -> String {
    let response = app
        .post_json(
            "/handovers/",
            &serde_json::json!({"warehouse": seed.warehouse, "courier": "fan_courier"}),
        )
        .await;
    assert_eq!(201, response.status().as_u16());
    let session: Value = response.json().await.unwrap();
    assert_eq!(session["status"], "open");
    session["id"].as_str().unwrap().to_owned()
}

async fn scan(app: &TestApp, session_id: &str, awb_number: &str) -> reqwest::Response {
    app.post_json(
        &format!("/handovers/{session_id}/scan"),
        &serde_json::json!({"awbNumber": awb_number}),
    )
    .await
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn missing_awbs_need_a_manager_to_finalize() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    let clerk = app.client_with_role("clerk1", "editor").await;
    let seed = app.seed_company("RETAIL", "BUC1", 0).await;
    app.receive(&seed, "TS-01", 10, 1500).await;
    let first = app.seed_invoiced_order(&seed, "SH-1001", "TS-01", 2).await;
    let second = app.seed_invoiced_order(&seed, "SH-1002", "TS-01", 1).await;
    app.seed_awb(&first, "2150000001").await;
    app.seed_awb(&second, "2150000002").await;

    let session_id = open_session(&app, &seed).await;
    // opening twice for the same day returns the same session
    let response = app
        .post_json(
            "/handovers/",
            &serde_json::json!({"warehouse": seed.warehouse, "courier": "fan_courier"}),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let same: Value = response.json().await.unwrap();
    assert_eq!(same["id"], session_id.as_str());

    assert_eq!(201, scan(&app, &session_id, "2150000001").await.status().as_u16());
    let response = scan(&app, &session_id, " 2150000001 ").await;
    assert_eq!(200, response.status().as_u16());
    let duplicate: Value = response.json().await.unwrap();
    assert_eq!(duplicate["duplicate"], true);

    let report = app
        .get_json(&format!("/handovers/{session_id}/report"))
        .await;
    assert_eq!(report["expectedCount"], 2);
    assert_eq!(report["scannedCount"], 1);
    assert_eq!(report["missing"], serde_json::json!(["2150000002"]));

    let base = app.private_base_uri();
    let response = clerk
        .post(format!("{base}/handovers/{session_id}/finalize"))
        .send()
        .await
        .expect("Failed execute request");
    assert_eq!(403, response.status().as_u16());

    let response = app
        .post_json(
            &format!("/handovers/{session_id}/finalize"),
            &serde_json::json!({"note": "courier left early"}),
        )
        .await;
    assert!(response.status().is_success());
    let finalized: Value = response.json().await.unwrap();
    assert_eq!(finalized["session"]["status"], "finalized");
    assert_eq!(
        finalized["session"]["missingAtFinalization"],
        serde_json::json!(["2150000002"])
    );
    assert!(finalized["session"]["managerOverride"].is_object());
    assert_eq!(finalized["ordersShipped"], 1);

    let order = app.get_json(&format!("/orders/{first}")).await;
    assert_eq!(order["status"], "shipped");
    let awb = app.get_json("/awbs/2150000001").await;
    assert_eq!(awb["status"], "handed_over");
    let quantity = app.get_json("/inventory/quantity/TS-01").await;
    assert_eq!(quantity, serde_json::json!([{"warehouse": "BUC1", "quantity": 8}]));

    // finalized sessions take no more scans
    assert_eq!(409, scan(&app, &session_id, "2150000002").await.status().as_u16());
    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn complete_handover_is_finalized_by_a_clerk() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    let clerk = app.client_with_role("clerk1", "editor").await;
    let seed = app.seed_company("RETAIL", "BUC1", 0).await;
    let order = app.seed_invoiced_order(&seed, "SH-2001", "HD-07", 1).await;
    app.seed_awb(&order, "2150000101").await;
    let session_id = open_session(&app, &seed).await;

    assert_eq!(400, scan(&app, &session_id, "21500A0101").await.status().as_u16());
    assert_eq!(404, scan(&app, &session_id, "2159999999").await.status().as_u16());
    assert_eq!(201, scan(&app, &session_id, "2150000101").await.status().as_u16());

    let base = app.private_base_uri();
    let response = clerk
        .post(format!("{base}/handovers/{session_id}/finalize"))
        .send()
        .await
        .expect("Failed execute request");
    assert!(response.status().is_success());
    let finalized: Value = response.json().await.unwrap();
    assert_eq!(finalized["session"]["managerOverride"], Value::Null);
    // stock may go negative on shipment
    let quantity = app.get_json("/inventory/quantity/HD-07").await;
    assert_eq!(quantity, serde_json::json!([{"warehouse": "BUC1", "quantity": -1}]));

    let reopened: Value = app
        .post_json(&format!("/handovers/{session_id}/reopen"), &Value::Null)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(reopened["status"], "open");
    app.cleanup().await;
}
