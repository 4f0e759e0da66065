//! Integration tests for the HTTP API.
//!
//! These drive the real axum router over an in-memory store with scripted
//! blob, extraction and spreadsheet services:
//! - folder definition and idempotent replay
//! - single and batch uploads
//! - CSV download and spreadsheet export preconditions
//! - authentication and owner checks

mod common;

use api_lib::web::{self, state::AppState};
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{
    guest_token, test_config, token_for, CornerMarket, CountingSheets, MemoryBlobs,
    StalledExtractor,
};
use receipt_pipeline_core::memory::InMemoryStore;
use receipt_pipeline_core::ExtractionService;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "receipt-test-boundary";

struct TestApp {
    router: Router,
    sheets: Arc<CountingSheets>,
    token: String,
}

fn test_app() -> TestApp {
    test_app_with(test_config(), Arc::new(CornerMarket), CountingSheets::default())
}

fn test_app_with(
    config: api_lib::config::Config,
    extractor: Arc<dyn ExtractionService>,
    sheets: CountingSheets,
) -> TestApp {
    let sheets = Arc::new(sheets);
    let state = AppState::new(
        Arc::new(config),
        Arc::new(InMemoryStore::new()),
        Arc::new(MemoryBlobs),
        extractor,
        sheets.clone(),
    );
    let token = token_for("owner-1");
    TestApp {
        router: web::router(Arc::new(state)),
        sheets,
        token,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, _, bytes) = self.send(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn upload(&self, uri: &str, fields: &[(&str, &str)], files: &[(&str, &str)]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields, files)))
            .unwrap();
        let (status, _, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn create_groceries(&self) {
        let (status, _) = self
            .json("POST", "/folders/create", Some(groceries_folder()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    for (filename, content_type) in files {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\nfake-image-bytes\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body.into_bytes()
}

fn groceries_folder() -> Value {
    json!({
        "folderId": "f1",
        "name": "Groceries",
        "categories": [
            { "name": "Vendor", "type": "text", "required": true },
            { "name": "Total", "type": "number", "required": true }
        ]
    })
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn health_is_public() {
    let app = test_app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = test_app();
    let request = Request::builder()
        .uri("/folders/getFolders")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "unauthenticated");

    let request = Request::builder()
        .uri("/folders/getFolders")
        .header(header::AUTHORIZATION, "Bearer a.b.c")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn guest_sessions_get_their_own_space() {
    let mut app = test_app();
    app.create_groceries().await;

    app.token = guest_token("guest-7");
    let (status, body) = app.json("GET", "/folders/getFolders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["folders"], json!([]));
}

#[tokio::test]
async fn guest_token_cannot_reach_a_signed_owners_data() {
    let mut app = test_app();
    app.create_groceries().await;

    app.token = guest_token("owner-1");
    let (status, body) = app.json("GET", "/folders/getFolders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["folders"], json!([]));

    let (status, _) = app
        .json("POST", "/sheets/download-csv", Some(json!({ "folderId": "f1" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.json("DELETE", "/folders/f1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.token = token_for("owner-1");
    let (_, body) = app.json("GET", "/folders/getFolders", None).await;
    assert_eq!(body["folders"][0]["folderId"], "f1");
}

#[tokio::test]
async fn folder_definition_is_idempotent_but_never_overwritten() {
    let app = test_app();
    app.create_groceries().await;

    let (status, body) = app
        .json("POST", "/folders/create", Some(groceries_folder()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["folderId"], "f1");

    let mut changed = groceries_folder();
    changed["name"] = json!("Food");
    let (status, body) = app.json("POST", "/folders/create", Some(changed)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, body) = app.json("GET", "/folders/getFolders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["folders"][0]["name"], "Groceries");
}

#[tokio::test]
async fn invalid_columns_are_rejected() {
    let app = test_app();
    let folder = json!({
        "folderId": "f2",
        "name": "Bad",
        "categories": [
            { "name": "Total", "type": "number" },
            { "name": "total", "type": "text" }
        ]
    });
    let (status, body) = app.json("POST", "/folders/create", Some(folder)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let folder = json!({ "folderId": "f3", "name": "Bad", "categories": [ { "name": "When", "type": "timestamp" } ] });
    let (status, _) = app.json("POST", "/folders/create", Some(folder)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_then_download_csv_end_to_end() {
    let app = test_app();
    app.create_groceries().await;

    let (status, body) = app
        .upload(
            "/upload/single",
            &[("collectionId", "f1"), ("receiptId", "r-1"), ("ownerId", "owner-1")],
            &[("receipt.jpg", "image/jpeg")],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "extracted");
    assert_eq!(body["receipt"]["receiptId"], "r-1");
    // Keys outside the folder's columns never reach the store.
    assert!(body["receipt"]["items"][0]["fields"].get("Cashier").is_none());

    let request = Request::builder()
        .method("POST")
        .uri("/sheets/download-csv")
        .header(header::AUTHORIZATION, format!("Bearer {}", app.token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "folderId": "f1" }).to_string()))
        .unwrap();
    let (status, headers, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Groceries.csv\""
    );
    assert_eq!(body, b"Vendor,Total\nCorner Market,26.06");
}

#[tokio::test]
async fn upload_for_another_owner_is_forbidden() {
    let app = test_app();
    app.create_groceries().await;
    let (status, body) = app
        .upload(
            "/upload/single",
            &[("collectionId", "f1"), ("ownerId", "someone-else")],
            &[("receipt.jpg", "image/jpeg")],
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn batch_upload_reports_each_file() {
    let app = test_app();
    app.create_groceries().await;
    let (status, body) = app
        .upload(
            "/upload/batch",
            &[("collectionId", "f1")],
            &[
                ("one.jpg", "image/jpeg"),
                ("two.txt", "text/plain"),
                ("three.png", "image/png"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["completed"].as_array().unwrap().len(), 2);
    assert_eq!(body["failed"].as_array().unwrap().len(), 1);
    assert_eq!(body["failed"][0]["filename"], "two.txt");
    assert_eq!(body["failed"][0]["index"], 1);
    assert_eq!(body["failed"][0]["kind"], "validation");
}

#[tokio::test]
async fn spreadsheet_export_needs_a_linked_account() {
    let app = test_app();
    app.create_groceries().await;
    app.upload("/upload/single", &[("collectionId", "f1")], &[("a.jpg", "image/jpeg")])
        .await;

    let (status, body) = app
        .json("POST", "/sheets/export", Some(json!({ "folderId": "f1" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unlinked_account");
    assert_eq!(app.sheets.calls.load(Ordering::SeqCst), 0);

    let (status, _) = app
        .json("POST", "/sheets/link", Some(json!({ "refreshToken": "refresh-1" })))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = app.json("GET", "/sheets/status", None).await;
    assert_eq!(body["linked"], true);

    let (status, body) = app
        .json("POST", "/sheets/export", Some(json!({ "folderId": "f1" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["spreadsheetId"], "sheet-9");
    assert_eq!(body["totalRows"], 1);
    assert_eq!(body["totalReceipts"], 1);
    assert_eq!(app.sheets.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn exporting_an_empty_folder_is_no_data() {
    let app = test_app();
    app.create_groceries().await;
    let (status, body) = app
        .json("POST", "/sheets/download-csv", Some(json!({ "folderId": "f1" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "no_data");
}

#[tokio::test]
async fn deleting_a_folder_leaves_its_receipts_uncategorized() {
    let app = test_app();
    app.create_groceries().await;
    app.upload(
        "/upload/single",
        &[("collectionId", "f1"), ("receiptId", "r-9")],
        &[("a.jpg", "image/jpeg")],
    )
    .await;

    let (status, _) = app.json("DELETE", "/folders/f1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = app.json("GET", "/receipts/uncategorized", None).await;
    assert_eq!(body["receipts"][0]["receiptId"], "r-9");
    assert_eq!(body["receipts"][0]["folderId"], Value::Null);

    app.create_groceries().await;
    let (status, body) = app.json("GET", "/receipts/folder/f1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["receipts"], json!([]));

    let (status, _) = app.json("DELETE", "/receipts/r-9", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.json("DELETE", "/receipts/r-9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn receipts_can_move_between_folders() {
    let app = test_app();
    app.create_groceries().await;
    app.upload("/upload/single", &[("receiptId", "loose")], &[("a.jpg", "image/jpeg")])
        .await;

    let (status, body) = app
        .json("PUT", "/receipts/loose/folder", Some(json!({ "folderId": "f1" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["folderId"], "f1");

    let (status, body) = app
        .json("PUT", "/receipts/loose/folder", Some(json!({ "folderId": "nope" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = app.json("POST", "/upload/reprocess/loose", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "extracted");
}

#[tokio::test]
async fn failed_row_write_reports_the_orphaned_spreadsheet() {
    let app = test_app_with(
        test_config(),
        Arc::new(CornerMarket),
        CountingSheets::failing_write(),
    );
    app.create_groceries().await;
    app.upload("/upload/single", &[("collectionId", "f1")], &[("a.jpg", "image/jpeg")])
        .await;
    let (status, _) = app
        .json("POST", "/sheets/link", Some(json!({ "refreshToken": "refresh-1" })))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .json("POST", "/sheets/export", Some(json!({ "folderId": "f1" })))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "partial_failure");
    assert_eq!(body["spreadsheetId"], "sheet-9");
    assert_eq!(body["spreadsheetUrl"], "https://sheets.test/sheet-9");
    assert_eq!(body["failedStep"], "write_rows");
    assert_eq!(app.sheets.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn slow_extraction_times_out_with_gateway_timeout() {
    let mut config = test_config();
    config.external_call_timeout = std::time::Duration::from_millis(50);
    let app = test_app_with(config, Arc::new(StalledExtractor), CountingSheets::default());
    app.create_groceries().await;

    let (status, body) = app
        .upload(
            "/upload/single",
            &[("collectionId", "f1"), ("receiptId", "slow-1")],
            &[("a.jpg", "image/jpeg")],
        )
        .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "transient");
    assert_eq!(body["failedStep"], "extraction");
    assert_eq!(body["retryable"], true);

    let (_, body) = app.json("GET", "/receipts/folder/f1", None).await;
    assert_eq!(body["receipts"][0]["receiptId"], "slow-1");
}
