use backoffice_server::{
    db::mongo::DbClient,
    telemetry::{get_subscriber, init_subscriber},
};
use chrono::Utc;
use fake::{faker::company::en::CompanyName, Fake};
use once_cell::sync::Lazy;
use serde_json::Value;

use std::net::TcpListener;

pub struct TestApp {
    pub address: String,
    pub db: DbClient,
    pub request_client: reqwest::Client,
}

static TRACING: Lazy<()> = Lazy::new(|| {
    std::env::set_var("IS_TEST", "true");
    let subscriber = get_subscriber("test".into(), "debug".into(), std::io::stdout);
    init_subscriber(subscriber);
});

pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{port}");
    let database_name = uuid::Uuid::new_v4().to_string();
    let connect_string = "mongodb://127.0.0.1:27017";
    let db_client = DbClient::init(connect_string, &database_name)
        .await
        .expect("Failed to connect to mongodb");
    tokio::spawn(backoffice_server::server::server_start(
        db_client.clone(),
        listener,
    ));
    TestApp {
        address,
        db: db_client,
        request_client: cookie_client(),
    }
}

fn cookie_client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .unwrap()
}

/// a seeded company with one warehouse
pub struct Seed {
    pub company_id: String,
    pub warehouse: String,
}

impl TestApp {
    pub fn public_base_uri(&self) -> String {
        format!("{}/api/v1/public", self.address)
    }
    pub fn private_base_uri(&self) -> String {
        format!("{}/api/v1/private", self.address)
    }

    pub async fn signup_user(&self, username: &str, role: &str) -> (String, String) {
        let password = "123456";
        let body = serde_json::json!(
            {
                "username":username,
                "password":password,
                "role":role,
                "secret":"change_me_signup"
            }
        );
        let response = self
            .request_client
            .post(format!("{}/signup", self.public_base_uri()))
            .json(&body)
            .send()
            .await
            .expect("Failed execute request");
        assert_eq!(201, response.status().as_u16());
        (username.to_owned(), password.to_owned())
    }

    async fn login(&self, client: &reqwest::Client, username: &str, password: &str) {
        let body = serde_json::json!(
            {
                "username":username,
                "password":password
            }
        );
        let response = client
            .post(format!("{}/login", self.public_base_uri()))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request");
        assert!(response.status().is_success());
        assert!(response.cookies().any(|c| c.name() == "bo_token"));
        assert!(response.cookies().any(|c| c.name() == "bo_id"));
    }

    /// signs up a manager and logs the app client in with it
    pub async fn signup_and_login(&self) {
        let (username, password) = self.signup_user("manager1", "full").await;
        self.login(&self.request_client, &username, &password).await;
    }

    /// a second logged in client, used to act with a lower role
    pub async fn client_with_role(&self, username: &str, role: &str) -> reqwest::Client {
        let (username, password) = self.signup_user(username, role).await;
        let client = cookie_client();
        self.login(&client, &username, &password).await;
        client
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.request_client
            .post(format!("{}{path}", self.private_base_uri()))
            .json(body)
            .send()
            .await
            .expect("Failed execute request")
    }

    pub async fn get_json(&self, path: &str) -> Value {
        let response = self
            .request_client
            .get(format!("{}{path}", self.private_base_uri()))
            .send()
            .await
            .expect("Failed execute request");
        assert!(response.status().is_success(), "GET {path} failed");
        response.json().await.expect("Failed to deserialize json")
    }

    pub async fn seed_company(&self, code: &str, warehouse: &str, markup: u32) -> Seed {
        let name: String = CompanyName().fake();
        let response = self
            .post_json(
                "/companies/",
                &serde_json::json!({
                    "code": code,
                    "name": name,
                    "cui": format!("RO{}", (10_000_000..99_999_999).fake::<u32>()),
                    "invoicingProvider": "oblio",
                    "intercompanyMarkupPercent": markup,
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16());
        let company: Value = response.json().await.unwrap();
        let company_id = company["id"].as_str().unwrap().to_owned();
        let response = self
            .post_json(
                "/warehouses/",
                &serde_json::json!({
                    "code": warehouse,
                    "name": format!("{warehouse} depot"),
                    "companyId": company_id,
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16());
        Seed {
            company_id,
            warehouse: warehouse.to_owned(),
        }
    }

    /// ingests an order and invoices it, returning the order id
    pub async fn seed_invoiced_order(
        &self,
        seed: &Seed,
        external_id: &str,
        sku: &str,
        quantity: u32,
    ) -> String {
        let response = self
            .post_json(
                "/orders/",
                &serde_json::json!({
                    "channel": "shopify",
                    "externalId": external_id,
                    "companyId": seed.company_id,
                    "warehouse": seed.warehouse,
                    "customerName": "Ion Popescu",
                    "lines": [{"sku": sku, "name": "T-shirt", "quantity": quantity, "unitPrice": 4999}],
                    "codAmount": 4999 * i64::from(quantity),
                    "placedAt": Utc::now().timestamp(),
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16());
        let order: Value = response.json().await.unwrap();
        let order_id = order["id"].as_str().unwrap().to_owned();
        let response = self
            .post_json(
                &format!("/orders/{order_id}/invoice"),
                &serde_json::json!({
                    "series": "BO",
                    "number": 6.fake::<String>(),
                    "issuedAt": Utc::now().timestamp(),
                }),
            )
            .await;
        assert!(response.status().is_success());
        order_id
    }

    pub async fn seed_awb(&self, order_id: &str, awb_number: &str) {
        let response = self
            .post_json(
                "/awbs/",
                &serde_json::json!({
                    "awbNumber": awb_number,
                    "courier": "fan_courier",
                    "orderId": order_id,
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16());
    }

    /// receives stock at a known cost through an approved receipt
    pub async fn receive(&self, seed: &Seed, sku: &str, quantity: u32, unit_cost: i64) {
        let response = self
            .post_json(
                "/receipts/",
                &serde_json::json!({
                    "companyId": seed.company_id,
                    "warehouse": seed.warehouse,
                    "supplierName": "Textile Grup SRL",
                    "lines": [{"sku": sku, "expectedQty": quantity, "unitCost": unit_cost}],
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16());
        let receipt: Value = response.json().await.unwrap();
        let id = receipt["id"].as_str().unwrap();
        for (action, body) in [
            ("start", Value::Null),
            ("counts", serde_json::json!([{"sku": sku, "receivedQty": quantity}])),
            ("verify", Value::Null),
            ("approve", Value::Null),
        ] {
            let response = self.post_json(&format!("/receipts/{id}/{action}"), &body).await;
            assert!(response.status().is_success(), "{action} failed");
        }
    }

    /// adjusts stock of an existing sku
    pub async fn seed_stock(&self, warehouse: &str, sku: &str, delta: i32) {
        let response = self
            .post_json(
                "/inventory/adjustments",
                &serde_json::json!({
                    "sku": sku,
                    "warehouse": warehouse,
                    "delta": delta,
                    "reason": "opening balance",
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16());
    }

    pub async fn cleanup(self) {
        self.db
            .bo_db
            .drop(None)
            .await
            .expect("Failed to drop database");
    }
}
