//! 原镜 (Yuanjing) 媒体确证核心
//!
//! 上传的媒体文件先用内容哈希确立身份、过完整性闸门，再交给可插拔的打分器评估
//! AI 生成的可能性，最后落成一条内容寻址、带签名、可分享的确证记录。

pub mod api;
pub mod config;
pub mod digest;
pub mod error;
pub mod integrity;
pub mod metadata;
pub mod mmr_store;
pub mod record;
pub mod scoring;
pub mod service;
pub mod signer;
pub mod store;

pub use digest::{Digest, DigestEngine, Sha256Engine};
pub use error::VerifyError;
pub use record::{RecordId, VerificationRecord};
pub use scoring::{Label, ScoreResult, Scorer, Thresholds};
pub use service::{VerificationOutcome, VerificationRequest, VerificationService};
