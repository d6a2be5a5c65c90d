use super::{ScoreResult, Scorer, Thresholds};
use crate::metadata::MetadataSummary;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

const SCORE_MIN: f64 = 0.60;
const SCORE_MAX: f64 = 0.95;

/// 参考打分器 (占位实现)
///
/// **[⚠️ 不是真正的鉴别模型]**: 分数来自带种子的伪随机数，缩放到 `[0.60, 0.95]`，
/// 不做任何内容分析。种子 = blake3(配置种子 || 内容字节)，所以同一份内容
/// 在同一配置下永远得到同一个分数 (可重放)。
#[derive(Debug, Clone)]
pub struct ReferenceScorer {
    seed: u64,
    thresholds: Thresholds,
}

impl ReferenceScorer {
    pub const NAME: &'static str = "reference";
    pub const POLICY_VERSION: &'static str = "reference-v1";

    pub fn new(seed: u64, thresholds: Thresholds) -> Self {
        Self { seed, thresholds }
    }

    /// 能处理的媒体：图片、视频、音频
    fn supports(media_type: &str) -> bool {
        ["image/", "video/", "audio/"]
            .iter()
            .any(|prefix| media_type.starts_with(prefix))
    }

    fn rng_for(&self, bytes: &[u8]) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(bytes);
        StdRng::from_seed(*hasher.finalize().as_bytes())
    }
}

impl Scorer for ReferenceScorer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn policy_version(&self) -> &str {
        Self::POLICY_VERSION
    }

    fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn score(&self, bytes: &[u8], media_type: &str, hints: &MetadataSummary) -> ScoreResult {
        let mut evidence = BTreeMap::new();
        evidence.insert("scorer".to_string(), Self::NAME.into());
        evidence.insert("mediaType".to_string(), media_type.into());
        evidence.insert("captureMetadata".to_string(), hints.exif_present.into());
        evidence.insert(
            "provenanceManifest".to_string(),
            hints.provenance_manifest_present.into(),
        );
        if let Some(fmt) = &hints.detected_format {
            evidence.insert("detectedFormat".to_string(), fmt.as_str().into());
        }

        if !Self::supports(media_type) {
            return ScoreResult::unsupported(media_type, evidence);
        }

        let score = self.rng_for(bytes).gen_range(SCORE_MIN..=SCORE_MAX);
        ScoreResult::classified(score, &self.thresholds, evidence)
    }
}
