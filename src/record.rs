use crate::digest::Digest;
use crate::metadata::MetadataSummary;
use crate::scoring::ScoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 记录 ID 取 blake3 输出的前 12 字节，编码成 24 位小写十六进制
const ID_BYTES: usize = 12;

/// 记录 ID (Record Id)
///
/// **内容寻址**: `id = hex(blake3(digest || policy_version))[..24]`。
/// 同一内容、同一策略版本，永远得到同一个 ID；换了策略版本，同一内容可以合法地得到新 ID。
/// 摘要是定长 32 字节，所以拼接不会产生歧义。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn derive(digest: &Digest, policy_version: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(digest.as_bytes());
        hasher.update(policy_version.as_bytes());
        Self(hex::encode(&hasher.finalize().as_bytes()[..ID_BYTES]))
    }

    /// 从外部 (比如分享链接) 解析 ID。格式不对的一律视为不存在，不需要区分。
    pub fn parse(s: &str) -> Option<Self> {
        let ok = s.len() == ID_BYTES * 2
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        ok.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 确证记录 (Verification Record)
///
/// 一次成功确证的不可变结果。创建后永不修改；新策略版本产生的是一条新记录。
/// 记录里不保留原始字节，只有摘要。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub id: RecordId,
    /// 权威摘要 (服务端重算)
    pub digest: Digest,
    pub score: ScoreResult,
    pub metadata_summary: MetadataSummary,
    pub policy_version: String,
    /// 审计字段，不参与 ID 计算
    pub created_at: DateTime<Utc>,
}

impl VerificationRecord {
    /// 规范化序列化：签名和审计日志叶子都基于这串字节。
    /// 结构体字段顺序固定，证据用的是 BTreeMap，所以输出是稳定的。
    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// 组装记录。不做任何 I/O，持久化交给存储协作者。
pub fn build(
    digest: Digest,
    score: ScoreResult,
    metadata_summary: MetadataSummary,
    policy_version: &str,
) -> VerificationRecord {
    build_at(digest, score, metadata_summary, policy_version, Utc::now())
}

pub fn build_at(
    digest: Digest,
    score: ScoreResult,
    metadata_summary: MetadataSummary,
    policy_version: &str,
    created_at: DateTime<Utc>,
) -> VerificationRecord {
    VerificationRecord {
        id: RecordId::derive(&digest, policy_version),
        digest,
        score,
        metadata_summary,
        policy_version: policy_version.to_string(),
        created_at,
    }
}
