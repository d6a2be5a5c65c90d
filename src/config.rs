use crate::metadata::DEFAULT_MAX_DECODE_PIXELS;
use crate::scoring::{ScorerConfig, Thresholds};
use anyhow::Context;
use std::env;
use std::str::FromStr;

/// 默认上传上限 25 MiB
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub key_path: String,
    pub scorer: ScorerConfig,
    /// 覆盖打分器默认的策略版本号
    pub policy_version: Option<String>,
    pub max_upload_bytes: usize,
    /// 超过这个像素数的图片不做完整解码
    pub max_decode_pixels: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源加载，方便测试时不碰进程环境变量
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let defaults = Thresholds::default();
        let thresholds = Thresholds::new(
            parse(&lookup, "AUTHENTIC_CUTOFF", defaults.authentic_cutoff)?,
            parse(&lookup, "UNCERTAIN_CUTOFF", defaults.uncertain_cutoff)?,
        )?;

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port: parse(&lookup, "PORT", 3000)?,
            db_path: var("DB_PATH", "data/db/verify_db"),
            key_path: var("KEY_PATH", "yuanjing.key"),
            scorer: ScorerConfig {
                kind: var("SCORER", "reference"),
                seed: parse(&lookup, "SCORER_SEED", 0)?,
                thresholds,
            },
            policy_version: lookup("POLICY_VERSION").filter(|v| !v.is_empty()),
            max_upload_bytes: parse(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            max_decode_pixels: parse(&lookup, "MAX_DECODE_PIXELS", DEFAULT_MAX_DECODE_PIXELS)?,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid value, got {raw:?}")),
        None => Ok(default),
    }
}
