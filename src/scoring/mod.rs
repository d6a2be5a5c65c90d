//! 打分引擎 (Scoring Engine)
//!
//! 对外只暴露 [`Scorer`] 这个能力接口。今天挂的是 [`ReferenceScorer`] 占位实现，
//! 以后换成真正的模型打分器时，调用方、记录结构、阈值的含义都不需要改。

mod reference;

pub use reference::ReferenceScorer;

use crate::metadata::MetadataSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// 打分器无法处理该媒体类型时给出的中性分
pub const UNSUPPORTED_SCORE: f64 = 0.5;

/// 判定标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Authentic,
    Uncertain,
    Synthetic,
    /// 不支持的媒体类型：这是一个"判定"，不是错误
    Unsupported,
}

/// 阈值策略，由打分器持有，通过配置暴露。
///
/// - `score > authentic_cutoff` → Authentic
/// - `uncertain_cutoff <= score <= authentic_cutoff` → Uncertain
/// - `score < uncertain_cutoff` → Synthetic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub authentic_cutoff: f64,
    pub uncertain_cutoff: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            authentic_cutoff: 0.80,
            uncertain_cutoff: 0.65,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid thresholds: require 0 <= uncertain ({uncertain}) <= authentic ({authentic}) <= 1")]
pub struct ThresholdError {
    pub authentic: f64,
    pub uncertain: f64,
}

impl Thresholds {
    pub fn new(authentic_cutoff: f64, uncertain_cutoff: f64) -> Result<Self, ThresholdError> {
        let ok = (0.0..=1.0).contains(&uncertain_cutoff)
            && (0.0..=1.0).contains(&authentic_cutoff)
            && uncertain_cutoff <= authentic_cutoff;
        if !ok {
            return Err(ThresholdError {
                authentic: authentic_cutoff,
                uncertain: uncertain_cutoff,
            });
        }
        Ok(Self {
            authentic_cutoff,
            uncertain_cutoff,
        })
    }

    pub fn classify(&self, score: f64) -> Label {
        if score > self.authentic_cutoff {
            Label::Authentic
        } else if score >= self.uncertain_cutoff {
            Label::Uncertain
        } else {
            Label::Synthetic
        }
    }
}

/// 打分结果
///
/// 只保存 `authenticity_score`；`ai_probability` 永远由它推出，
/// 两者从不独立产生。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    authenticity_score: f64,
    label: Label,
    /// 审计 / 排查用的证据，内容对核心是不透明的。BTreeMap 保证序列化顺序稳定。
    evidence: BTreeMap<String, serde_json::Value>,
}

impl ScoreResult {
    /// 按阈值给分数贴标签
    pub fn classified(
        authenticity_score: f64,
        thresholds: &Thresholds,
        evidence: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            authenticity_score,
            label: thresholds.classify(authenticity_score),
            evidence,
        }
    }

    /// 不支持的媒体类型
    pub fn unsupported(media_type: &str, mut evidence: BTreeMap<String, serde_json::Value>) -> Self {
        evidence.insert("unsupportedMediaType".into(), media_type.into());
        Self {
            authenticity_score: UNSUPPORTED_SCORE,
            label: Label::Unsupported,
            evidence,
        }
    }

    pub fn authenticity_score(&self) -> f64 {
        self.authenticity_score
    }

    pub fn ai_probability(&self) -> f64 {
        1.0 - self.authenticity_score
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn evidence(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.evidence
    }

    /// 分数是否符合契约：有限且落在 [0, 1]
    pub fn is_well_formed(&self) -> bool {
        self.authenticity_score.is_finite() && (0.0..=1.0).contains(&self.authenticity_score)
    }
}

/// 打分器能力接口
///
/// **契约**:
/// - 全函数：对格式正确的输入永不失败；不支持的媒体降级为 [`Label::Unsupported`]。
/// - 元数据只是旁路证据，缺失时只能让 `evidence` 变弱，不能导致失败。
pub trait Scorer: Send + Sync {
    /// 打分器名字，写进证据和日志
    fn name(&self) -> &str;

    /// 默认策略版本号。记录 ID 由 (摘要, 策略版本) 决定，
    /// 换了打分策略就应该换版本号。
    fn policy_version(&self) -> &str;

    fn thresholds(&self) -> &Thresholds;

    fn score(&self, bytes: &[u8], media_type: &str, hints: &MetadataSummary) -> ScoreResult;
}

/// 打分器配置
#[derive(Debug, Clone, PartialEq)]
pub struct ScorerConfig {
    /// 打分器名字，目前只有 `reference`
    pub kind: String,
    pub seed: u64,
    pub thresholds: Thresholds,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            kind: ReferenceScorer::NAME.to_string(),
            seed: 0,
            thresholds: Thresholds::default(),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown scorer kind: {0}")]
pub struct UnknownScorer(pub String);

/// 按配置选择打分器
pub fn from_config(config: &ScorerConfig) -> Result<Arc<dyn Scorer>, UnknownScorer> {
    match config.kind.as_str() {
        ReferenceScorer::NAME => Ok(Arc::new(ReferenceScorer::new(
            config.seed,
            config.thresholds,
        ))),
        other => Err(UnknownScorer(other.to_string())),
    }
}

/// 规范化媒体类型：去掉参数，转小写。`image/JPEG; q=1` → `image/jpeg`
pub fn normalize_media_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}
