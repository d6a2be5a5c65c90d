use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::{self, Read};

/// 摘要长度：SHA-256 固定输出 32 字节 (256 bit)
pub const DIGEST_LEN: usize = 32;

/// 流式读取时的缓冲区大小
const CHUNK_SIZE: usize = 64 * 1024;

/// 内容摘要 (Content Digest)
///
/// 对"恰好这一串字节"的密码学哈希。传输时用 64 个小写十六进制字符表示。
/// 相等比较是定长字节比较，不做任何字符串层面的启发式处理。
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// 解析十六进制摘要。
    ///
    /// 大小写不敏感，但长度必须恰好是 64 个字符；否则返回 `None`。
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != DIGEST_LEN * 2 {
            return None;
        }
        let mut out = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut out).ok()?;
        Some(Self(out))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid digest: {s}")))
    }
}

/// 摘要引擎 (Digest Engine)
///
/// 以依赖注入的方式传给完整性闸门和确证服务，而不是到处直接调用全局的哈希函数。
/// 测试时可以换成返回固定摘要的桩实现。
pub trait DigestEngine: Send + Sync {
    /// 算法名，写进日志和证据里
    fn algorithm(&self) -> &'static str;

    /// 一次性计算内存中字节的摘要
    fn digest(&self, bytes: &[u8]) -> Digest;

    /// 流式计算：大文件不需要整块读进内存。
    /// 读取失败属于"暂时性故障"，直接把 io::Error 往上抛。
    fn digest_reader(&self, reader: &mut dyn Read) -> io::Result<Digest>;
}

/// 默认引擎：SHA-256
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Engine;

impl DigestEngine for Sha256Engine {
    fn algorithm(&self) -> &'static str {
        "sha256"
    }

    fn digest(&self, bytes: &[u8]) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Digest(hasher.finalize().into())
    }

    fn digest_reader(&self, reader: &mut dyn Read) -> io::Result<Digest> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        Ok(Digest(hasher.finalize().into()))
    }
}
