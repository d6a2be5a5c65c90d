//! 对调用方暴露的错误分类

use crate::integrity::IntegrityError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// 内部故障对外只给这一句，不泄露实现细节
const GENERIC_INTERNAL_MESSAGE: &str = "internal error while verifying artifact";

#[derive(Debug, Error)]
pub enum VerifyError {
    /// 没有上传任何字节
    #[error("MissingArtifact: no artifact bytes supplied")]
    MissingArtifact,

    /// 上传的请求本身格式不对 (比如非法的策略版本号)
    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    /// 声称摘要与权威摘要不一致：内容在传输中可能被篡改
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("NotFound: {0}")]
    NotFound(String),

    /// 哈希 / 打分 / 建档 / 存储中的意外故障。细节只进日志。
    #[error("InternalFault: {0}")]
    Internal(String),
}

impl VerifyError {
    /// 错误种类名，响应体里的 `error` 字段
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingArtifact => "MissingArtifact",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::Integrity(IntegrityError::DigestMismatch { .. }) => "DigestMismatch",
            Self::NotFound(_) => "NotFound",
            Self::Internal(_) => "InternalFault",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingArtifact | Self::InvalidRequest(_) | Self::Integrity(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 给调用方看的消息
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => GENERIC_INTERNAL_MESSAGE.to_string(),
            Self::Integrity(e) => format!("{e} (artifact may have been tampered with in transit)"),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub error: &'static str,
    pub message: String,
}

impl From<&VerifyError> for ErrorBody {
    fn from(e: &VerifyError) -> Self {
        Self {
            status: "error",
            error: e.kind(),
            message: e.public_message(),
        }
    }
}

impl IntoResponse for VerifyError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorBody::from(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;

    fn mismatch() -> VerifyError {
        VerifyError::Integrity(IntegrityError::DigestMismatch {
            claimed: "0".repeat(64),
            authoritative: Digest::from_bytes([7; 32]),
        })
    }

    #[test]
    fn status_codes() {
        assert_eq!(VerifyError::MissingArtifact.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            VerifyError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(mismatch().status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(VerifyError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            VerifyError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn kinds_are_explicit() {
        assert_eq!(VerifyError::MissingArtifact.kind(), "MissingArtifact");
        assert_eq!(mismatch().kind(), "DigestMismatch");
        assert_eq!(VerifyError::Internal("x".into()).kind(), "InternalFault");
    }

    #[test]
    fn mismatch_message_names_the_failure() {
        let msg = mismatch().public_message();
        assert!(msg.contains("DigestMismatch"));
        assert!(msg.contains("tampered"));
    }

    #[test]
    fn internal_details_do_not_leak() {
        let e = VerifyError::Internal("sled: io error at /var/lib/secret".into());
        let body = ErrorBody::from(&e);
        assert_eq!(body.message, GENERIC_INTERNAL_MESSAGE);
        assert_eq!(e.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
