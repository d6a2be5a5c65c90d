use crate::digest::Digest;
use thiserror::Error;

/// 完整性闸门的失败结果
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    /// 客户端声称的摘要与服务端重算的权威摘要不一致。
    /// `claimed` 保留客户端原始字符串 (可能根本不是合法的十六进制)。
    #[error("DigestMismatch: claimed {claimed}, content hashes to {authoritative}")]
    DigestMismatch {
        claimed: String,
        authoritative: Digest,
    },
}

/// 完整性闸门 (Integrity Gate)
///
/// - 没有声称摘要：直接放行，权威摘要就是记录里的摘要。
/// - 有声称摘要：解码成 32 字节后逐字节比较 (大小写不敏感，长度严格)。
/// - 不一致：`DigestMismatch`。对请求来说这是终局，后面的打分和建档一概不做。
pub fn check_integrity(
    claimed: Option<&str>,
    authoritative: &Digest,
) -> Result<(), IntegrityError> {
    let Some(claimed) = claimed else {
        return Ok(());
    };

    // 长度或字符不合法的声称摘要不可能等于任何权威摘要
    match Digest::from_hex(claimed) {
        Some(d) if d == *authoritative => Ok(()),
        _ => Err(IntegrityError::DigestMismatch {
            claimed: claimed.to_string(),
            authoritative: *authoritative,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{DigestEngine, Sha256Engine};

    #[test]
    fn absent_claim_passes() {
        let auth = Sha256Engine.digest(b"photo");
        assert!(check_integrity(None, &auth).is_ok());
    }

    #[test]
    fn equal_claim_passes_in_any_case() {
        let auth = Sha256Engine.digest(b"photo");
        assert!(check_integrity(Some(auth.to_hex().as_str()), &auth).is_ok());
        assert!(check_integrity(Some(auth.to_hex().to_uppercase().as_str()), &auth).is_ok());
    }

    #[test]
    fn zero_digest_is_a_mismatch_carrying_both_sides() {
        let auth = Sha256Engine.digest(b"photo");
        let zeros = "0".repeat(64);
        let err = check_integrity(Some(zeros.as_str()), &auth).unwrap_err();
        assert_eq!(
            err,
            IntegrityError::DigestMismatch {
                claimed: zeros,
                authoritative: auth,
            }
        );
        assert!(err.to_string().starts_with("DigestMismatch"));
    }

    #[test]
    fn digest_of_other_content_is_rejected() {
        let auth = Sha256Engine.digest(b"photo");
        let other = Sha256Engine.digest(b"photo!");
        assert!(check_integrity(Some(other.to_hex().as_str()), &auth).is_err());
    }

    #[test]
    fn malformed_claim_is_a_mismatch() {
        let auth = Sha256Engine.digest(b"photo");
        // 截断一位
        let hex = auth.to_hex();
        let truncated = &hex[..63];
        assert!(check_integrity(Some(truncated), &auth).is_err());
        assert!(check_integrity(Some("not-a-digest"), &auth).is_err());
        assert!(check_integrity(Some(""), &auth).is_err());
    }
}
