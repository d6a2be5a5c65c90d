use axum::body::{to_bytes, Body};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use std::sync::Arc;
use tower::ServiceExt;

use yuanjing_verify::api::{self, AppState, CLAIMED_DIGEST_HEADER, POLICY_VERSION_HEADER};
use yuanjing_verify::mmr_store::AuditLog;
use yuanjing_verify::scoring::{ReferenceScorer, Thresholds};
use yuanjing_verify::signer::RecordSigner;
use yuanjing_verify::store::SledRecordStore;
use yuanjing_verify::{Sha256Engine, VerificationService};

fn test_app() -> Router {
    test_app_with_limit(1024 * 1024)
}

fn test_app_with_limit(max_upload_bytes: usize) -> Router {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let service = VerificationService::new(
        Arc::new(Sha256Engine),
        Arc::new(ReferenceScorer::new(0, Thresholds::default())),
        Arc::new(SledRecordStore::open(&db).unwrap()),
        Arc::new(RecordSigner::generate()),
        Arc::new(AuditLog::open(&db).unwrap()),
    );
    api::app(Arc::new(AppState {
        service,
        max_upload_bytes,
    }))
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn post_verify(bytes: &[u8], claimed: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/verify").header("content-type", "image/jpeg");
    if let Some(c) = claimed {
        builder = builder.header(CLAIMED_DIGEST_HEADER, c);
    }
    builder.body(Body::from(bytes.to_vec())).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let app = test_app();
    let (status, body) = send(&app, post_verify(b"", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "MissingArtifact");
    assert!(body.get("id").is_none());
}

#[tokio::test]
async fn matching_digest_is_verified() {
    let app = test_app();
    let bytes = b"\xFF\xD8\xFF\xE0 camera original";
    let claimed = sha256_hex(bytes);
    let (status, body) = send(&app, post_verify(bytes, Some(claimed.as_str()))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["digest"], claimed.as_str());
    assert_eq!(body["id"].as_str().unwrap().len(), 24);

    let score = body["authenticityScore"].as_f64().unwrap();
    let ai = body["aiProbability"].as_f64().unwrap();
    assert!((score + ai - 1.0).abs() < 1e-9);
    assert!((0.60..=0.95).contains(&score));
    assert!(["Authentic", "Uncertain", "Synthetic"].contains(&body["label"].as_str().unwrap()));
    assert!(body["evidence"].is_object());
    assert!(body.get("message").is_none());
}

#[tokio::test]
async fn zero_digest_is_reported_as_tampering() {
    let app = test_app();
    let zeros = "0".repeat(64);
    let (status, body) = send(&app, post_verify(b"some bytes", Some(zeros.as_str()))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "DigestMismatch");
    assert!(body["message"].as_str().unwrap().contains("DigestMismatch"));
    assert!(body.get("authenticityScore").is_none());
}

#[tokio::test]
async fn same_bytes_share_an_id_and_can_be_fetched() {
    let app = test_app();
    let (_, first) = send(&app, post_verify(b"share me", None)).await;
    let (_, second) = send(&app, post_verify(b"share me", None)).await;
    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["alreadyVerified"], false);
    assert_eq!(second["alreadyVerified"], true);

    let id = first["id"].as_str().unwrap();
    let req = Request::get(format!("/verify/{id}")).body(Body::empty()).unwrap();
    let (status, fetched) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], first["id"]);
    assert_eq!(fetched["authenticityScore"], first["authenticityScore"]);
    assert_eq!(fetched["signature"], first["signature"]);
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let app = test_app();
    let req = Request::get("/verify/0123456789abcdef01234567")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn policy_override_header_changes_the_id() {
    let app = test_app();
    let (_, v1) = send(&app, post_verify(b"rescored", None)).await;
    let req = Request::post("/verify")
        .header("content-type", "image/jpeg")
        .header(POLICY_VERSION_HEADER, "reference-v2")
        .body(Body::from(&b"rescored"[..]))
        .unwrap();
    let (status, v2) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(v1["id"], v2["id"]);
    assert_eq!(v2["policyVersion"], "reference-v2");
}

#[tokio::test]
async fn audit_proof_is_served_for_new_records() {
    let app = test_app();
    let (_, rec) = send(&app, post_verify(b"logged", None)).await;
    let index = rec["auditIndex"].as_u64().unwrap();

    let req = Request::get(format!("/audit/{index}")).body(Body::empty()).unwrap();
    let (status, proof) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(proof["recordId"], rec["id"]);

    let req = Request::get("/audit/99").body(Body::empty()).unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn identity_exposes_the_public_key() {
    let app = test_app();
    let req = Request::get("/identity").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["publicKey"].as_str().unwrap().len(), 64);
    assert_eq!(body["scorer"], "reference");
    assert_eq!(body["policyVersion"], "reference-v1");
}

#[tokio::test]
async fn unreadable_or_blank_claimed_digest_is_still_checked() {
    let app = test_app();
    for claimed in [
        HeaderValue::from_bytes(b"\xff\xfe-not-the-digest").unwrap(),
        HeaderValue::from_static("   "),
    ] {
        let req = Request::post("/verify")
            .header("content-type", "image/jpeg")
            .header(CLAIMED_DIGEST_HEADER, claimed)
            .body(Body::from(&b"claimed but garbled"[..]))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "DigestMismatch");
        assert!(body.get("id").is_none());
    }
}

#[tokio::test]
async fn oversized_upload_is_a_json_invalid_request() {
    let app = test_app_with_limit(1024);
    let (status, body) = send(&app, post_verify(&[7u8; 2048], None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "InvalidRequest");
    assert!(body["message"].as_str().unwrap().contains("1024"));
}

#[tokio::test]
async fn non_numeric_audit_index_is_a_json_invalid_request() {
    let app = test_app();
    let req = Request::get("/audit/abc").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "InvalidRequest");
}
