//! passgate-auth-core - 认证核心库
//!
//! 会话 Token 解码与会话列表模型

pub mod session;

pub use session::{SessionListResponse, SessionRecord};

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use passgate_errors::{AuthError, AuthResult};
use serde::Deserialize;
use serde_json::{Map, Value};

/// 解码后的会话 Token
///
/// 每个请求都从签名 Token 重新解码，不做缓存
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// 身份标识（如员工编号）
    pub identity: String,
    /// 会话分区（如应用类型）
    pub partition: String,
    /// 会话 ID (jti)，撤销的最小单位
    pub session_id: String,
    pub issued_at: Option<DateTime<Utc>>,
    /// 未携带 exp 的 Token 不过期
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionToken {
    /// 缓存与权威服务使用的键：`identity:partition`
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.identity, self.partition)
    }
}

/// Token 中各字段对应的 claim 名称
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimMapping {
    pub identity: String,
    pub partition: String,
    pub session_id: String,
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            identity: "identity".to_string(),
            partition: "partition".to_string(),
            session_id: "jti".to_string(),
        }
    }
}

/// 签名校验前不可信的原始 claims
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    exp: Option<f64>,
    #[serde(default)]
    iat: Option<f64>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Token 解码器
///
/// 使用预共享的对称密钥（HS256/HS384/HS512）校验签名
#[derive(Clone)]
pub struct TokenDecoder {
    decoding_key: DecodingKey,
    validation: Validation,
    claims: ClaimMapping,
}

impl TokenDecoder {
    pub fn new(secret: &[u8], claims: ClaimMapping, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // exp 可选，存在时才校验
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = leeway_secs;

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            claims,
        }
    }

    /// 校验签名并提取会话 claims
    pub fn decode(&self, token: &str) -> AuthResult<SessionToken> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::malformed("empty token"));
        }

        let raw = decode::<RawClaims>(token, &self.decoding_key, &self.validation)
            .map_err(map_jwt_error)?
            .claims;

        let identity = required_claim(&raw.rest, &self.claims.identity)?;
        let partition = required_claim(&raw.rest, &self.claims.partition)?;
        let session_id = required_claim(&raw.rest, &self.claims.session_id)?;

        let expires_at = match raw.exp {
            Some(exp) => Some(numeric_date(exp).ok_or_else(|| AuthError::malformed("exp out of range"))?),
            None => None,
        };
        let issued_at = raw.iat.and_then(numeric_date);

        Ok(SessionToken {
            identity,
            partition,
            session_id,
            issued_at,
            expires_at,
        })
    }
}

/// 必需 claim：非空字符串（数字形式的编号也接受）
fn required_claim(claims: &Map<String, Value>, name: &str) -> AuthResult<String> {
    let value = match claims.get(name) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    if value.is_empty() {
        return Err(AuthError::incomplete_claims(name));
    }
    Ok(value)
}

/// NumericDate 允许小数秒，截断到整秒
fn numeric_date(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    DateTime::from_timestamp(value.trunc() as i64, 0)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName => AuthError::invalid_signature(err.to_string()),
        ErrorKind::ExpiredSignature => AuthError::expired(err.to_string()),
        ErrorKind::MissingRequiredClaim(claim) => AuthError::incomplete_claims(claim.clone()),
        _ => AuthError::malformed(err.to_string()),
    }
}
