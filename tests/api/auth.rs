use crate::helpers::spawn_app;

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn signup_login_refresh_works() {
    let app = spawn_app().await;
    let public_base_uri = app.public_base_uri();
    app.signup_and_login().await;
    let response = app
        .request_client
        .get(format!("{public_base_uri}/refresh_token"))
        .send()
        .await
        .expect("Failed to execute request");
    assert!(response.status().is_success());
    assert!(response.cookies().any(|c| c.name() == "bo_token"));
    assert!(response.cookies().any(|c| c.name() == "bo_id"));
    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn signup_failed() {
    let app = spawn_app().await;
    let public_base_uri = app.public_base_uri();
    let body = serde_json::json!(
        {
            "username":"random-username",
            "password":"random-password",
            "role":"full",
        }
    );
    let response = app
        .request_client
        .post(format!("{public_base_uri}/signup"))
        .json(&body)
        .send()
        .await
        .expect("Failed execute request");
    assert_eq!(422, response.status().as_u16());
    let body = serde_json::json!(
        {
            "username":"random-username",
            "password":"random-password",
            "role":"full",
            "secret":"invalid-secret"
        }
    );
    let response = app
        .request_client
        .post(format!("{public_base_uri}/signup"))
        .json(&body)
        .send()
        .await
        .expect("Failed execute request");
    assert_eq!(400, response.status().as_u16());
    assert_eq!("invalid signup secret", &response.text().await.unwrap());
    app.signup_user("clerk1", "editor").await;
    let body = serde_json::json!(
        {
            "username":"clerk1",
            "password":"123456",
            "role":"editor",
            "secret":"change_me_signup"
        }
    );
    let response = app
        .request_client
        .post(format!("{public_base_uri}/signup"))
        .json(&body)
        .send()
        .await
        .expect("Failed execute request");
    assert_eq!(400, response.status().as_u16());
    assert_eq!("username is occupied", &response.text().await.unwrap());
    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn login_failed() {
    let app = spawn_app().await;
    let (username, _) = app.signup_user("clerk1", "editor").await;
    let public_base_uri = app.public_base_uri();
    for (username, password) in [("invalid-username", "invalid-password"), (&*username, "nope")] {
        let response = app
            .request_client
            .post(format!("{public_base_uri}/login"))
            .json(&serde_json::json!({"username": username, "password": password}))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(401, response.status().as_u16());
    }
    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn refresh_redirect_outside_the_app_is_refused() {
    let app = spawn_app().await;
    app.signup_and_login().await;
    // "https://evil.example" in url safe base64
    let response = app
        .request_client
        .get(format!("{}/refresh_token", app.public_base_uri()))
        .query(&[("uri", "aHR0cHM6Ly9ldmlsLmV4YW1wbGU")])
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(400, response.status().as_u16());
    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires mongodb replica set at 127.0.0.1:27017"]
async fn private_routes_need_login_and_role() {
    let app = spawn_app().await;
    let response = app
        .request_client
        .get(format!("{}/health_check/", app.private_base_uri()))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(401, response.status().as_u16());
    let visitor = app.client_with_role("guest1", "visitor").await;
    let response = visitor
        .get(format!("{}/health_check/", app.private_base_uri()))
        .send()
        .await
        .expect("Failed to execute request");
    assert!(response.status().is_success());
    let response = visitor
        .get(format!("{}/settlements/", app.private_base_uri()))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(403, response.status().as_u16());
    app.cleanup().await;
}
