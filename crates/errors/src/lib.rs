//! passgate-errors - 认证管线统一错误
//!
//! 基于 RFC 7807 Problem Details 规范

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 认证管线错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Expired token: {0}")]
    ExpiredToken(String),

    #[error("Incomplete claims: missing {0}")]
    IncompleteClaims(String),

    #[error("Session authority unreachable: {0}")]
    AuthorityUnreachable(String),

    #[error("Session authority rejected the query: {0}")]
    AuthorityRejected(String),

    #[error("Session not recognized: {session_id}")]
    SessionNotRecognized { session_id: String },

    #[error("Too many active sessions: {active}/{max_sessions}")]
    QuotaExceeded { active: usize, max_sessions: u32 },
}

impl AuthError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedCredential(msg.into())
    }

    pub fn invalid_signature(msg: impl Into<String>) -> Self {
        Self::InvalidSignature(msg.into())
    }

    pub fn expired(msg: impl Into<String>) -> Self {
        Self::ExpiredToken(msg.into())
    }

    pub fn incomplete_claims(claim: impl Into<String>) -> Self {
        Self::IncompleteClaims(claim.into())
    }

    pub fn authority_unreachable(msg: impl Into<String>) -> Self {
        Self::AuthorityUnreachable(msg.into())
    }

    pub fn authority_rejected(msg: impl Into<String>) -> Self {
        Self::AuthorityRejected(msg.into())
    }

    pub fn session_not_recognized(session_id: impl Into<String>) -> Self {
        Self::SessionNotRecognized {
            session_id: session_id.into(),
        }
    }

    pub fn quota_exceeded(active: usize, max_sessions: u32) -> Self {
        Self::QuotaExceeded {
            active,
            max_sessions,
        }
    }

    /// 解码阶段失败（一律 401）
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedCredential(_)
                | Self::InvalidSignature(_)
                | Self::ExpiredToken(_)
                | Self::IncompleteClaims(_)
        )
    }

    /// 会话权威服务故障（基础设施降级，而非凭证问题）
    pub fn is_authority_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthorityUnreachable(_) | Self::AuthorityRejected(_)
        )
    }

    /// 正常业务拒绝，不应按错误级别记录
    pub fn is_expected_denial(&self) -> bool {
        matches!(
            self,
            Self::SessionNotRecognized { .. } | Self::QuotaExceeded { .. }
        )
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedCredential(_) => 401,
            Self::InvalidSignature(_) => 401,
            Self::ExpiredToken(_) => 401,
            Self::IncompleteClaims(_) => 401,
            Self::SessionNotRecognized { .. } => 401,
            Self::QuotaExceeded { .. } => 429,
            Self::AuthorityUnreachable(_) => 503,
            Self::AuthorityRejected(_) => 503,
        }
    }

    /// 稳定的机器可读错误码，供客户端区分"在别处登录"与"凭证无效"
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedCredential(_) => "malformed_credential",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::ExpiredToken(_) => "expired_token",
            Self::IncompleteClaims(_) => "incomplete_claims",
            Self::AuthorityUnreachable(_) => "authority_unreachable",
            Self::AuthorityRejected(_) => "authority_rejected",
            Self::SessionNotRecognized { .. } => "session_not_recognized",
            Self::QuotaExceeded { .. } => "quota_exceeded",
        }
    }

    /// 转换为 Problem Details
    ///
    /// 解码失败的细节不回显给客户端，只保留在日志中
    pub fn to_problem_details(&self) -> ProblemDetails {
        let detail = if self.is_decode_failure() {
            "The session token could not be verified".to_string()
        } else if self.is_authority_failure() {
            "Session validation is temporarily unavailable".to_string()
        } else {
            self.to_string()
        };

        ProblemDetails {
            r#type: format!("https://passgate.dev/problems/{}", self.code().replace('_', "-")),
            title: self.problem_title().to_string(),
            status: self.status_code(),
            detail,
            instance: None,
        }
    }

    fn problem_title(&self) -> &'static str {
        match self {
            Self::MalformedCredential(_)
            | Self::InvalidSignature(_)
            | Self::ExpiredToken(_)
            | Self::IncompleteClaims(_) => "Unauthorized",
            Self::SessionNotRecognized { .. } => "Session Not Recognized",
            Self::QuotaExceeded { .. } => "Too Many Sessions",
            Self::AuthorityUnreachable(_) | Self::AuthorityRejected(_) => "Service Unavailable",
        }
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Result 类型别名
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::malformed("x").status_code(), 401);
        assert_eq!(AuthError::invalid_signature("x").status_code(), 401);
        assert_eq!(AuthError::incomplete_claims("jti").status_code(), 401);
        assert_eq!(AuthError::session_not_recognized("J1").status_code(), 401);
        assert_eq!(AuthError::quota_exceeded(2, 2).status_code(), 429);
        assert_eq!(AuthError::authority_unreachable("timeout").status_code(), 503);
        assert_eq!(AuthError::authority_rejected("500").status_code(), 503);
    }

    #[test]
    fn test_error_groups_are_disjoint() {
        let all = [
            AuthError::malformed("x"),
            AuthError::invalid_signature("x"),
            AuthError::expired("x"),
            AuthError::incomplete_claims("x"),
            AuthError::authority_unreachable("x"),
            AuthError::authority_rejected("x"),
            AuthError::session_not_recognized("x"),
            AuthError::quota_exceeded(1, 1),
        ];

        for err in &all {
            let groups = [
                err.is_decode_failure(),
                err.is_authority_failure(),
                err.is_expected_denial(),
            ];
            assert_eq!(groups.iter().filter(|g| **g).count(), 1, "{err:?}");
        }
    }

    #[test]
    fn test_problem_details_hides_decode_detail() {
        let problem = AuthError::invalid_signature("HMAC mismatch for key abc").to_problem_details();
        assert_eq!(problem.status, 401);
        assert!(!problem.detail.contains("HMAC"));
        assert!(problem.r#type.ends_with("/invalid-signature"));

        let json = serde_json::to_value(&problem).unwrap();
        assert!(json.get("instance").is_none());
    }

    #[test]
    fn test_quota_problem_is_distinct() {
        let problem = AuthError::quota_exceeded(3, 3).to_problem_details();
        assert_eq!(problem.status, 429);
        assert_eq!(problem.title, "Too Many Sessions");
        assert!(problem.detail.contains("3/3"));
    }
}
