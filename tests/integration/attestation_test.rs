//! `/challenge`, `/verify`, and `/submit` surface.
//!
//! A fully valid hardware-keystore attestation chain cannot be generated
//! without a real device or a pre-captured fixture, so this exercises the
//! framing/size/auth checks end to end and leaves the full 8-step
//! verification pipeline to `attestation_verifier`'s own unit tests.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use crate::common::{RawBundleFactory, TestApp};

#[tokio::test]
async fn challenge_issues_a_64_char_hex_nonce() {
    let app = TestApp::spawn().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::post("/challenge").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let hex_nonce = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(hex_nonce.len(), 64);
    assert!(hex_nonce.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn two_challenge_calls_issue_distinct_nonces() {
    let app = TestApp::spawn().await;
    let first = app
        .router
        .clone()
        .oneshot(Request::post("/challenge").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let second = app
        .router
        .clone()
        .oneshot(Request::post("/challenge").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let first_bytes = axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap();
    let second_bytes = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
    assert_ne!(first_bytes, second_bytes);
}

#[tokio::test]
async fn verify_rejects_empty_body_as_malformed() {
    let app = TestApp::spawn().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/verify?user_id=1")
                .body(Body::from(RawBundleFactory::empty()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verify_rejects_oversized_body() {
    let app = TestApp::spawn().await;
    let oversized = vec![0u8; app.config.max_message_size + 1];
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/verify?user_id=1")
                .body(Body::from(oversized))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn verify_rejects_truncated_framing() {
    let app = TestApp::spawn().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/verify?user_id=1")
                .body(Body::from(RawBundleFactory::truncated_length_prefix()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_rejects_oversized_sample() {
    let app = TestApp::spawn().await;
    let fingerprint = hex::encode([0x11u8; 32]);
    let oversized = vec![0u8; app.config.max_sample_size + 1];
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post(format!("/submit?fingerprint={fingerprint}"))
                .body(Body::from(oversized))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn submit_accepts_a_within_bounds_sample_and_does_not_touch_the_primary_db() {
    let app = TestApp::spawn().await;
    let fingerprint = hex::encode([0x22u8; 32]);
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post(format!("/submit?fingerprint={fingerprint}"))
                .body(Body::from(RawBundleFactory::garbage(1024)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM samples")
        .fetch_one(&app.samples_db)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let devices_count: i64 = sqlx::query_scalar("SELECT count(*) FROM devices")
        .fetch_one(&app.db)
        .await
        .unwrap();
    assert_eq!(devices_count, 0);
}

#[tokio::test]
async fn submit_rejects_non_hex_fingerprint() {
    let app = TestApp::spawn().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/submit?fingerprint=not-hex")
                .body(Body::from(RawBundleFactory::garbage(16)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
