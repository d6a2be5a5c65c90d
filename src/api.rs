use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection},
        DefaultBodyLimit, Path, State,
    },
    http::{header, HeaderMap},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::VerifyError;
use crate::metadata::MetadataSummary;
use crate::mmr_store::AuditProof;
use crate::scoring::Label;
use crate::service::{VerificationOutcome, VerificationRequest, VerificationService};

/// 客户端算好的 SHA-256 摘要
pub const CLAIMED_DIGEST_HEADER: &str = "x-content-sha256";
/// 策略版本覆盖
pub const POLICY_VERSION_HEADER: &str = "x-policy-version";
/// 原始文件名 (仅供参考)
pub const FILENAME_HEADER: &str = "x-filename";

// ==========================================
// 1. 应用状态 (Shared State)
// ==========================================
// 服务本身无请求间可变状态；审计日志自带锁。
pub struct AppState {
    pub service: VerificationService,
    pub max_upload_bytes: usize,
}

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

/// 响应：确证回执
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub status: &'static str,
    pub id: String,
    pub digest: String,
    pub authenticity_score: f64,
    /// 永远等于 1 - authenticityScore
    pub ai_probability: f64,
    pub label: Label,
    pub evidence: BTreeMap<String, serde_json::Value>,
    pub policy_version: String,
    pub metadata: MetadataSummary,
    pub created_at: String,
    pub signature: String,
    pub already_verified: bool,
    pub audit_index: Option<u64>,
}

impl From<VerificationOutcome> for VerificationResponse {
    fn from(outcome: VerificationOutcome) -> Self {
        let signed = outcome.signed;
        let record = signed.record;
        Self {
            status: "ok",
            id: record.id.to_string(),
            digest: record.digest.to_hex(),
            authenticity_score: record.score.authenticity_score(),
            ai_probability: record.score.ai_probability(),
            label: record.score.label(),
            evidence: record.score.evidence().clone(),
            policy_version: record.policy_version,
            metadata: record.metadata_summary,
            created_at: record.created_at.to_rfc3339(),
            signature: signed.signature,
            already_verified: outcome.already_verified,
            audit_index: outcome.audit_index,
        }
    }
}

/// 响应：服务身份
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub public_key: String,
    pub algorithm: &'static str,
    pub scorer: String,
    pub policy_version: String,
}

// ==========================================
// 3. API 路由构建
// ==========================================
pub fn app(state: Arc<AppState>) -> Router {
    let limit = state.max_upload_bytes;
    Router::new()
        .route("/verify", post(submit_artifact))
        .route("/verify/{id}", get(get_record))
        .route("/audit/{index}", get(get_audit_proof))
        .route("/identity", get(get_identity))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()) // ⚠️ 开发模式：允许所有跨域
        .with_state(state)
}

/// 声称摘要头：只要出现就原样交给完整性闸门，不可读或空白的值也算声称
fn claimed_digest(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CLAIMED_DIGEST_HEADER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ==========================================
// 4. 处理函数 (Handlers)
// ==========================================

/// 接口：提交文件进行确证。请求体就是原始字节。
async fn submit_artifact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<VerificationResponse>, VerifyError> {
    let body = body.map_err(|rejection| {
        tracing::warn!(error = %rejection, "artifact body rejected");
        VerifyError::InvalidRequest(format!(
            "artifact body could not be read (limit {} bytes): {}",
            state.max_upload_bytes,
            rejection.body_text()
        ))
    })?;
    let request = VerificationRequest {
        bytes: body.to_vec(),
        media_type: header_str(&headers, header::CONTENT_TYPE.as_str()),
        filename: header_str(&headers, FILENAME_HEADER),
        claimed_digest: claimed_digest(&headers),
        policy_version: header_str(&headers, POLICY_VERSION_HEADER),
    };

    let outcome = state.service.verify(request).await?;
    Ok(Json(outcome.into()))
}

/// 接口：分享链接取回记录
async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<VerificationResponse>, VerifyError> {
    let outcome = state.service.lookup(&id).await?;
    Ok(Json(outcome.into()))
}

/// 接口：获取审计证明
async fn get_audit_proof(
    State(state): State<Arc<AppState>>,
    index: Result<Path<u64>, PathRejection>,
) -> Result<Json<AuditProof>, VerifyError> {
    let Path(index) = index.map_err(|rejection| {
        VerifyError::InvalidRequest(format!("audit index must be a non-negative integer: {}", rejection.body_text()))
    })?;
    tracing::debug!(index, "audit proof requested");
    Ok(Json(state.service.audit_proof(index).await?))
}

/// 接口：服务公钥与打分器信息
async fn get_identity(State(state): State<Arc<AppState>>) -> Json<IdentityResponse> {
    Json(IdentityResponse {
        public_key: state.service.signer().public_key_hex(),
        algorithm: "ed25519",
        scorer: state.service.scorer().name().to_string(),
        policy_version: state.service.policy_version().to_string(),
    })
}
