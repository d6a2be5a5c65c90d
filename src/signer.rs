use crate::record::VerificationRecord;
use anyhow::Context;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng; // 用于生成私钥的安全随机数生成器
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 带签名的确证记录：存储层持久化的就是它
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedRecord {
    pub record: VerificationRecord,
    /// 对 `record.canonical_bytes()` 的 Ed25519 签名，Hex 编码 (64 字节)
    pub signature: String,
}

/// 签名器模块
///
/// 负责对确证记录进行签名。分享出去的记录可以拿服务公钥离线验签，
/// 不需要再回来问服务。
pub struct RecordSigner {
    keypair: SigningKey,
}

impl RecordSigner {
    /// 临时生成一个新的签名器 (测试 / 一次性场景)
    pub fn generate() -> Self {
        let keypair = SigningKey::generate(&mut OsRng);
        Self { keypair }
    }

    /// 从磁盘加载私钥；文件不存在时生成一把并落盘。
    ///
    /// 文件内容是 32 字节私钥种子的 Hex 字符串。
    /// **[⚠️ 生产风险]**: 私钥明文落盘，生产环境应改为 HSM / KMS。
    pub fn load_or_generate(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("读取密钥文件失败: {}", path.display()))?;
            let mut seed = [0u8; 32];
            hex::decode_to_slice(text.trim(), &mut seed)
                .with_context(|| format!("密钥文件格式错误: {}", path.display()))?;
            return Ok(Self {
                keypair: SigningKey::from_bytes(&seed),
            });
        }

        let signer = Self::generate();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, hex::encode(signer.keypair.to_bytes()))
            .with_context(|| format!("写入密钥文件失败: {}", path.display()))?;
        tracing::info!(path = %path.display(), "generated new signing key");
        Ok(signer)
    }

    /// 获取公钥 (用于分发给审计方进行验签)
    pub fn public_key(&self) -> VerifyingKey {
        self.keypair.verifying_key()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().to_bytes())
    }

    /// 对记录签名，返回带签名的记录
    pub fn sign(&self, record: VerificationRecord) -> anyhow::Result<SignedRecord> {
        let payload = record.canonical_bytes()?;
        // Ed25519 内部先做 SHA-512，再做椭圆曲线标量乘法
        let signature = self.keypair.sign(&payload);
        Ok(SignedRecord {
            record,
            signature: hex::encode(signature.to_bytes()),
        })
    }

    /// 静态验证函数 (给外部验证者使用)
    pub fn verify(verification_key: &VerifyingKey, signed: &SignedRecord) -> anyhow::Result<bool> {
        let mut sig = [0u8; 64];
        if hex::decode_to_slice(&signed.signature, &mut sig).is_err() {
            return Ok(false);
        }
        let payload = signed.record.canonical_bytes()?;
        Ok(verification_key
            .verify(&payload, &Signature::from_bytes(&sig))
            .is_ok())
    }
}
