//! 确证服务 (Verification Service)
//!
//! 单次调用内走完的状态机，没有长会话：
//!
//! ```text
//! Received → DigestComputed → IntegrityChecked ─pass→ Scored → RecordBuilt → Returned
//!                                               └fail→ Rejected → Returned
//! ```
//!
//! 摘要、元数据、打分都是 CPU 密集的同步操作，放到 `spawn_blocking` 里跑。
//! 持久化是最后一步，只接收签好名的完整记录：请求中途被放弃时什么都不会落盘。

use crate::digest::{Digest, DigestEngine};
use crate::error::VerifyError;
use crate::integrity::check_integrity;
use crate::metadata::{self, MetadataSummary};
use crate::mmr_store::{AuditError, AuditLog, AuditProof};
use crate::record::{self, RecordId};
use crate::scoring::{normalize_media_type, ScoreResult, Scorer};
use crate::signer::{RecordSigner, SignedRecord};
use crate::store::RecordStore;
use std::fmt::Display;
use std::sync::Arc;

/// 未声明媒体类型、也嗅探不出来时的兜底
const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";
const MAX_POLICY_VERSION_LEN: usize = 64;

/// 一次确证请求。原始文件名只做日志参考，不进记录。
#[derive(Debug, Clone, Default)]
pub struct VerificationRequest {
    pub bytes: Vec<u8>,
    pub media_type: Option<String>,
    pub filename: Option<String>,
    /// 客户端算好的摘要 (小写 Hex)
    pub claimed_digest: Option<String>,
    pub policy_version: Option<String>,
}

/// 一次确证 (或查询) 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub signed: SignedRecord,
    /// true 表示这条记录不是本次请求创建的
    pub already_verified: bool,
    pub audit_index: Option<u64>,
}

/// 通过完整性闸门并打完分的中间结果
struct Scored {
    digest: Digest,
    metadata: MetadataSummary,
    score: ScoreResult,
}

pub struct VerificationService {
    digest_engine: Arc<dyn DigestEngine>,
    scorer: Arc<dyn Scorer>,
    store: Arc<dyn RecordStore>,
    signer: Arc<RecordSigner>,
    audit_log: Arc<AuditLog>,
    policy_version: String,
    max_decode_pixels: u64,
}

impl VerificationService {
    pub fn new(
        digest_engine: Arc<dyn DigestEngine>,
        scorer: Arc<dyn Scorer>,
        store: Arc<dyn RecordStore>,
        signer: Arc<RecordSigner>,
        audit_log: Arc<AuditLog>,
    ) -> Self {
        let policy_version = scorer.policy_version().to_string();
        Self {
            digest_engine,
            scorer,
            store,
            signer,
            audit_log,
            policy_version,
            max_decode_pixels: metadata::DEFAULT_MAX_DECODE_PIXELS,
        }
    }

    /// 覆盖打分器的默认策略版本号
    pub fn with_policy_version(mut self, policy_version: impl Into<String>) -> Self {
        self.policy_version = policy_version.into();
        self
    }

    /// 元数据提取时完整解码的像素上限
    pub fn with_max_decode_pixels(mut self, max_decode_pixels: u64) -> Self {
        self.max_decode_pixels = max_decode_pixels;
        self
    }

    pub fn policy_version(&self) -> &str {
        &self.policy_version
    }

    pub fn signer(&self) -> &RecordSigner {
        &self.signer
    }

    pub fn scorer(&self) -> &dyn Scorer {
        self.scorer.as_ref()
    }

    /// 确证入口
    pub async fn verify(
        &self,
        request: VerificationRequest,
    ) -> Result<VerificationOutcome, VerifyError> {
        let VerificationRequest {
            bytes,
            media_type,
            filename,
            claimed_digest,
            policy_version,
        } = request;

        tracing::debug!(
            stage = "received",
            bytes = bytes.len(),
            media_type = media_type.as_deref().unwrap_or("-"),
            filename = filename.as_deref().unwrap_or("-"),
            "request received"
        );

        if bytes.is_empty() {
            tracing::warn!("rejected request without artifact bytes");
            return Err(VerifyError::MissingArtifact);
        }
        let policy_version = self.resolve_policy_version(policy_version.as_deref())?;

        let engine = Arc::clone(&self.digest_engine);
        let scorer = Arc::clone(&self.scorer);
        let max_decode_pixels = self.max_decode_pixels;
        let scored = tokio::task::spawn_blocking(move || {
            run_pipeline(
                engine.as_ref(),
                scorer.as_ref(),
                &bytes,
                media_type.as_deref(),
                claimed_digest.as_deref(),
                max_decode_pixels,
            )
        })
        .await
        .map_err(|e| internal("scoring task failed", e))??;

        let record = record::build(scored.digest, scored.score, scored.metadata, &policy_version);
        tracing::debug!(stage = "record_built", id = %record.id, "record built");

        let signed = self
            .signer
            .sign(record)
            .map_err(|e| internal("signing failed", e))?;

        let store = Arc::clone(&self.store);
        let insertion = tokio::task::spawn_blocking(move || store.insert_if_absent(signed))
            .await
            .map_err(|e| internal("store task failed", e))?
            .map_err(|e| internal("store insert failed", e))?;

        let already_verified = !insertion.is_new();
        let signed = insertion.into_record();
        // 只追加一次：并发的重复请求可能先于赢家到达这里，
        // 先前的追加也可能在入库后失败过，补记让日志自愈
        let audit_index = match self.audit_log.ensure_logged(&signed).await {
            Ok(index) => Some(index),
            Err(e) if already_verified => {
                tracing::warn!(id = %signed.record.id, error = %e, "audit repair failed");
                None
            }
            Err(e) => return Err(internal("audit append failed", e)),
        };

        tracing::info!(
            id = %signed.record.id,
            digest = %signed.record.digest,
            label = ?signed.record.score.label(),
            score = signed.record.score.authenticity_score(),
            already_verified,
            "artifact verified"
        );

        Ok(VerificationOutcome {
            signed,
            already_verified,
            audit_index,
        })
    }

    /// 按 ID 取回已建好的记录。不做任何重算。
    pub async fn lookup(&self, id: &str) -> Result<VerificationOutcome, VerifyError> {
        let not_found = || VerifyError::NotFound(format!("no verification record with id {id}"));
        let id = RecordId::parse(id).ok_or_else(not_found)?;

        let store = Arc::clone(&self.store);
        let lookup_id = id.clone();
        let signed = tokio::task::spawn_blocking(move || store.get(&lookup_id))
            .await
            .map_err(|e| internal("store task failed", e))?
            .map_err(|e| internal("store lookup failed", e))?
            .ok_or_else(not_found)?;

        Ok(VerificationOutcome {
            audit_index: self.audit_log.index_of(&id).await,
            signed,
            already_verified: true,
        })
    }

    /// 审计日志中第 `index` 片叶子的包含性证明
    pub async fn audit_proof(&self, index: u64) -> Result<AuditProof, VerifyError> {
        match self.audit_log.proof(index).await {
            Ok(proof) => Ok(proof),
            Err(AuditError::UnknownLeaf(i)) => {
                Err(VerifyError::NotFound(format!("no audit entry at index {i}")))
            }
            Err(e) => Err(internal("audit proof failed", e)),
        }
    }

    fn resolve_policy_version(&self, requested: Option<&str>) -> Result<String, VerifyError> {
        let Some(v) = requested else {
            return Ok(self.policy_version.clone());
        };
        let valid = !v.is_empty()
            && v.len() <= MAX_POLICY_VERSION_LEN
            && v
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if !valid {
            return Err(VerifyError::InvalidRequest(format!(
                "policy version must be 1-{MAX_POLICY_VERSION_LEN} characters of [A-Za-z0-9._-]"
            )));
        }
        Ok(v.to_string())
    }
}

/// 同步流水线：摘要 → 完整性闸门 → 元数据 → 打分
fn run_pipeline(
    engine: &dyn DigestEngine,
    scorer: &dyn Scorer,
    bytes: &[u8],
    declared_media_type: Option<&str>,
    claimed_digest: Option<&str>,
    max_decode_pixels: u64,
) -> Result<Scored, VerifyError> {
    let digest = engine.digest(bytes);
    tracing::debug!(stage = "digest_computed", algorithm = engine.algorithm(), %digest, "digest computed");

    if let Err(e) = check_integrity(claimed_digest, &digest) {
        tracing::warn!(stage = "rejected", error = %e, "integrity check failed");
        return Err(e.into());
    }
    tracing::debug!(stage = "integrity_checked", claimed = claimed_digest.is_some(), "integrity passed");

    let metadata = metadata::extract_bounded(bytes, declared_media_type, max_decode_pixels);
    let media_type = declared_media_type
        .map(normalize_media_type)
        .filter(|m| !m.is_empty())
        .or_else(|| metadata.detected_media_type())
        .unwrap_or_else(|| FALLBACK_MEDIA_TYPE.to_string());

    let score = scorer.score(bytes, &media_type, &metadata);
    if !score.is_well_formed() {
        // 打分器违约时绝不能拿一个编出来的分数顶上
        return Err(internal(
            "scorer returned an out-of-contract result",
            format!("{} -> {}", scorer.name(), score.authenticity_score()),
        ));
    }
    tracing::debug!(stage = "scored", scorer = scorer.name(), label = ?score.label(), "artifact scored");

    Ok(Scored {
        digest,
        metadata,
        score,
    })
}

fn internal(context: &str, err: impl Display) -> VerifyError {
    tracing::error!(error = %err, "{context}");
    VerifyError::Internal(format!("{context}: {err}"))
}
