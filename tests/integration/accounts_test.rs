//! Account/session lifecycle: signup, login, double-submit CSRF, logout,
//! logout-everywhere, and password-change session invalidation.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use crate::common::{assert_error_code, assert_ok_data, SignupRequest, TestApp};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post_json(app: &TestApp, path: &str, body: &impl serde::Serialize) -> axum::response::Response {
    app.router
        .clone()
        .oneshot(
            Request::post(path)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn signup_rejects_duplicate_username() {
    let app = TestApp::spawn().await;
    let signup = SignupRequest::new();

    let first = post_json(&app, "/api/create-account", &signup).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = post_json(&app, "/api/create-account", &signup).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = body_json(second).await;
    assert_error_code(&body, "CONFLICT");
}

#[tokio::test]
async fn login_then_authenticated_call_then_logout() {
    let app = TestApp::spawn().await;
    let signup = SignupRequest::new();
    let created = post_json(&app, "/api/create-account", &signup).await;
    assert_eq!(created.status(), StatusCode::OK);

    let login_response = post_json(
        &app,
        "/api/login",
        &serde_json::json!({ "username": signup.username, "password": signup.password }),
    )
    .await;
    assert_eq!(login_response.status(), StatusCode::OK);
    let login_body = body_json(login_response).await;
    let data = assert_ok_data(&login_body);
    let cookie_token = data["cookie_token"].as_str().unwrap().to_string();
    let request_token = data["request_token"].as_str().unwrap().to_string();

    let authed = app
        .router
        .clone()
        .oneshot(
            Request::get("/api/account")
                .header("cookie", format!("__Host-session={cookie_token}"))
                .header("x-csrf-token", request_token.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(authed.status(), StatusCode::OK);
    let authed_body = body_json(authed).await;
    assert_eq!(assert_ok_data(&authed_body)["username"], signup.username.to_lowercase());

    let logout = app
        .router
        .clone()
        .oneshot(
            Request::post("/api/logout")
                .header("cookie", format!("__Host-session={cookie_token}"))
                .header("x-csrf-token", request_token.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::OK);

    let after_logout = app
        .router
        .clone()
        .oneshot(
            Request::get("/api/account")
                .header("cookie", format!("__Host-session={cookie_token}"))
                .header("x-csrf-token", request_token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(after_logout.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn mismatched_csrf_token_is_rejected() {
    let app = TestApp::spawn().await;
    let signup = SignupRequest::new();
    post_json(&app, "/api/create-account", &signup).await;

    let login_response = post_json(
        &app,
        "/api/login",
        &serde_json::json!({ "username": signup.username, "password": signup.password }),
    )
    .await;
    let login_body = body_json(login_response).await;
    let cookie_token = assert_ok_data(&login_body)["cookie_token"].as_str().unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/api/account")
                .header("cookie", format!("__Host-session={cookie_token}"))
                .header("x-csrf-token", "not-the-real-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

async fn signup_and_login(app: &TestApp) -> (String, String) {
    let signup = SignupRequest::new();
    post_json(app, "/api/create-account", &signup).await;
    let login_response = post_json(
        app,
        "/api/login",
        &serde_json::json!({ "username": signup.username, "password": signup.password }),
    )
    .await;
    let login_body = body_json(login_response).await;
    let data = assert_ok_data(&login_body);
    (
        data["cookie_token"].as_str().unwrap().to_string(),
        data["request_token"].as_str().unwrap().to_string(),
    )
}

async fn post_configuration(
    app: &TestApp,
    cookie_token: &str,
    request_token: &str,
    body: &impl serde::Serialize,
) -> axum::response::Response {
    app.router
        .clone()
        .oneshot(
            Request::post("/api/configuration")
                .header("cookie", format!("__Host-session={cookie_token}"))
                .header("x-csrf-token", request_token)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn configuration_requires_a_session() {
    let app = TestApp::spawn().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/api/configuration")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&serde_json::json!({})).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn configuration_update_within_bounds_is_accepted_and_persisted() {
    let app = TestApp::spawn().await;
    let (cookie_token, request_token) = signup_and_login(&app).await;

    let response = post_configuration(
        &app,
        &cookie_token,
        &request_token,
        &serde_json::json!({ "verify_interval": 7_200, "alert_delay": 120_000 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let authed = app
        .router
        .clone()
        .oneshot(
            Request::get("/api/account")
                .header("cookie", format!("__Host-session={cookie_token}"))
                .header("x-csrf-token", request_token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let account_body = body_json(authed).await;
    let data = assert_ok_data(&account_body);
    assert_eq!(data["verify_interval"].as_i64().unwrap(), 7_200);
    assert_eq!(data["alert_delay"].as_i64().unwrap(), 120_000);
}

#[tokio::test]
async fn configuration_update_violating_alert_delay_invariant_is_rejected() {
    let app = TestApp::spawn().await;
    let (cookie_token, request_token) = signup_and_login(&app).await;

    // Both within their own [min, max] bounds, but alert_delay <= verify_interval.
    let response = post_configuration(
        &app,
        &cookie_token,
        &request_token,
        &serde_json::json!({ "verify_interval": 600_000, "alert_delay": 115_200 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_error_code(&body, "MALFORMED");
}
