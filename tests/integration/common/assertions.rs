//! Custom assertions for integration tests
//!
//! Domain-specific assertions over the JSON envelope (`ApiResponse`) and
//! error payloads (`ApiErrorWithRequestId`).

use serde_json::Value;

/// Assert the response envelope carries a `data` field and return it.
pub fn assert_ok_data(response: &Value) -> &Value {
    response.get("data").expect("response missing data field")
}

/// Assert the response envelope carries `meta.request_id`.
pub fn assert_has_request_id(response: &Value) {
    let request_id = response.pointer("/meta/request_id").and_then(|v| v.as_str());
    assert!(request_id.is_some(), "response missing meta.request_id");
}

/// Assert an error response carries the expected error code string.
pub fn assert_error_code(response: &Value, expected: &str) {
    let code = response
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .expect("missing error.code in response");
    assert_eq!(code, expected, "expected error code '{expected}', got '{code}'");
}
