//! `/api/devices.json`, `/api/attestation-history.json`, and
//! `/api/delete-device/{fingerprint}` — exercised against a device row
//! inserted directly (bypassing `/verify`, which needs a real attestation
//! chain fixture the pinning-store unit tests already cover in full).

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;

use crate::common::{assert_ok_data, SignupRequest, TestApp};

struct AuthedUser {
    user_id: i64,
    cookie_token: String,
    request_token: String,
}

async fn signup_and_login(app: &TestApp) -> AuthedUser {
    let signup = SignupRequest::new();

    let created = app
        .router
        .clone()
        .oneshot(
            Request::post("/api/create-account")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&signup).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::OK);
    let created_bytes = to_bytes(created.into_body(), usize::MAX).await.unwrap();
    let created_body: Value = serde_json::from_slice(&created_bytes).unwrap();
    let user_id = assert_ok_data(&created_body)["user_id"].as_i64().unwrap();

    let login = app
        .router
        .clone()
        .oneshot(
            Request::post("/api/login")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&serde_json::json!({
                        "username": signup.username,
                        "password": signup.password,
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    let login_bytes = to_bytes(login.into_body(), usize::MAX).await.unwrap();
    let login_body: Value = serde_json::from_slice(&login_bytes).unwrap();
    let data = assert_ok_data(&login_body);

    AuthedUser {
        user_id,
        cookie_token: data["cookie_token"].as_str().unwrap().to_string(),
        request_token: data["request_token"].as_str().unwrap().to_string(),
    }
}

async fn insert_pinned_device(app: &TestApp, fingerprint: &[u8], user_id: i64) {
    let now = Utc::now();
    sqlx::query!(
        r#"
        INSERT INTO devices (
            fingerprint, pinned_certificate_0, pinned_certificate_1,
            pinned_certificate_2, pinned_certificate_3,
            pinned_verified_boot_key, verified_boot_hash,
            pinned_os_version, pinned_os_patch_level,
            pinned_vendor_patch_level, pinned_boot_patch_level, pinned_app_version,
            pinned_security_level, user_id, verified_time_first, verified_time_last
        ) VALUES (
            $1, $2, $2, $2, $2, $2, $2, 140000, 20260101, 20260101, 20260101, 1,
            'tee', $3, $4, $4
        )
        "#,
        fingerprint,
        b"placeholder".to_vec(),
        user_id,
        now,
    )
    .execute(&app.db)
    .await
    .expect("insert pinned device fixture");

    sqlx::query!(
        r#"
        INSERT INTO attestation_history (fingerprint, time, strong, tee_enforced, os_enforced)
        VALUES ($1, $2, false, 'os_version: 140000', 'os_version: 140000')
        "#,
        fingerprint,
        now,
    )
    .execute(&app.db)
    .await
    .expect("insert attestation history fixture");
}

#[tokio::test]
async fn list_devices_returns_only_the_caller_own_devices() {
    let app = TestApp::spawn().await;
    let owner = signup_and_login(&app).await;
    let other = signup_and_login(&app).await;

    let owned_fingerprint = [0xAAu8; 32];
    let other_fingerprint = [0xBBu8; 32];
    insert_pinned_device(&app, &owned_fingerprint, owner.user_id).await;
    insert_pinned_device(&app, &other_fingerprint, other.user_id).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/api/devices.json")
                .header("cookie", format!("__Host-session={}", owner.cookie_token))
                .header("x-csrf-token", owner.request_token.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let devices = assert_ok_data(&body).as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["user_id"].as_i64().unwrap(), owner.user_id);
}

#[tokio::test]
async fn attestation_history_rejects_non_owner() {
    let app = TestApp::spawn().await;
    let owner = signup_and_login(&app).await;
    let intruder = signup_and_login(&app).await;

    let fingerprint = [0xCCu8; 32];
    insert_pinned_device(&app, &fingerprint, owner.user_id).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/api/attestation-history.json")
                .header("cookie", format!("__Host-session={}", intruder.cookie_token))
                .header("x-csrf-token", intruder.request_token.clone())
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&serde_json::json!({ "fingerprint": hex::encode(fingerprint) })).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn attestation_history_paginates_by_id_with_a_page_size_of_twenty() {
    let app = TestApp::spawn().await;
    let owner = signup_and_login(&app).await;
    let fingerprint = [0xEEu8; 32];
    insert_pinned_device(&app, &fingerprint, owner.user_id).await;

    // One row was inserted by the pin fixture; add enough more to cross a page.
    for _ in 0..25 {
        sqlx::query!(
            r#"INSERT INTO attestation_history (fingerprint, time, strong, tee_enforced, os_enforced)
               VALUES ($1, now(), false, 'osVersion: 140000', 'osVersion: 140000')"#,
            fingerprint.to_vec(),
        )
        .execute(&app.db)
        .await
        .expect("insert extra history rows");
    }

    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/api/attestation-history.json")
                .header("cookie", format!("__Host-session={}", owner.cookie_token))
                .header("x-csrf-token", owner.request_token.clone())
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&serde_json::json!({ "fingerprint": hex::encode(fingerprint) })).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let rows = assert_ok_data(&body).as_array().unwrap().clone();
    assert_eq!(rows.len(), 20);

    let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    let mut sorted_desc = ids.clone();
    sorted_desc.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(ids, sorted_desc);

    let next_offset = *ids.last().unwrap() - 1;
    let next_page = app
        .router
        .clone()
        .oneshot(
            Request::post("/api/attestation-history.json")
                .header("cookie", format!("__Host-session={}", owner.cookie_token))
                .header("x-csrf-token", owner.request_token.clone())
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&serde_json::json!({
                        "fingerprint": hex::encode(fingerprint),
                        "offset_id": next_offset,
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let next_bytes = to_bytes(next_page.into_body(), usize::MAX).await.unwrap();
    let next_body: Value = serde_json::from_slice(&next_bytes).unwrap();
    let next_rows = assert_ok_data(&next_body).as_array().unwrap().clone();
    assert!(next_rows.iter().all(|r| r["id"].as_i64().unwrap() <= next_offset));
}

#[tokio::test]
async fn delete_device_soft_deletes_and_removes_it_from_the_listing() {
    let app = TestApp::spawn().await;
    let owner = signup_and_login(&app).await;
    let fingerprint = [0xDDu8; 32];
    insert_pinned_device(&app, &fingerprint, owner.user_id).await;

    let delete_response = app
        .router
        .clone()
        .oneshot(
            Request::delete(format!("/api/delete-device/{}", hex::encode(fingerprint)))
                .header("cookie", format!("__Host-session={}", owner.cookie_token))
                .header("x-csrf-token", owner.request_token.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete_response.status(), StatusCode::OK);

    let listing = app
        .router
        .clone()
        .oneshot(
            Request::get("/api/devices.json")
                .header("cookie", format!("__Host-session={}", owner.cookie_token))
                .header("x-csrf-token", owner.request_token.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = to_bytes(listing.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(assert_ok_data(&body).as_array().unwrap().is_empty());
}
