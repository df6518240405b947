//! 认证管线中间件
//!
//! 固定顺序：公开路由短路 → 客户端识别与凭证归一化 → 会话校验。
//! 只有会话校验阶段会以错误终止请求。

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::Response,
};
use passgate_auth_core::{ClaimMapping, SessionToken, TokenDecoder};
use passgate_config::GatewayConfig;
use passgate_errors::AuthError;
use secrecy::ExposeSecret;
use tracing::{debug, error, info, warn};

use crate::authority::{AuthorityDispatcher, SessionAuthority};
use crate::classifier::{ClassifierRules, ClientClassifier};
use crate::error::GatewayError;
use crate::metrics;
use crate::normalizer::{ClientContext, CredentialNormalizer};
use crate::session_cache::SessionCache;
use crate::validator::{PublicRoutes, SessionValidator};

/// 认证管线
pub struct AuthPipeline {
    normalizer: CredentialNormalizer,
    validator: SessionValidator,
    retry_after_secs: u64,
}

impl AuthPipeline {
    pub fn new(normalizer: CredentialNormalizer, validator: SessionValidator, retry_after_secs: u64) -> Self {
        Self {
            normalizer,
            validator,
            retry_after_secs,
        }
    }

    /// 按配置组装管线，会话缓存在此创建一次并由校验器持有
    pub fn from_config(
        config: &GatewayConfig,
        authority: Arc<dyn SessionAuthority>,
    ) -> Result<Self, GatewayError> {
        let classifier = ClientClassifier::new(&ClassifierRules::from(&config.client))?;
        let normalizer = CredentialNormalizer::new(
            classifier,
            config.jwt.cookie_name.clone(),
            config.client.query_token_param.clone(),
        );

        let claims = ClaimMapping {
            identity: config.jwt.claims.identity.clone(),
            partition: config.jwt.claims.partition.clone(),
            session_id: config.jwt.claims.session_id.clone(),
        };
        let decoder = TokenDecoder::new(
            config.jwt.secret.expose_secret().as_bytes(),
            claims,
            config.jwt.leeway_secs,
        );

        let validator = SessionValidator::new(
            decoder,
            SessionCache::from_config(&config.session_cache),
            AuthorityDispatcher::from_config(authority, &config.authority),
            PublicRoutes::new(&config.routes.public_paths),
            config.jwt.cookie_name.clone(),
        )
        .with_failure_policy(config.authority.failure_policy);

        Ok(Self::new(normalizer, validator, config.authority.retry_after_secs))
    }

    pub fn normalizer(&self) -> &CredentialNormalizer {
        &self.normalizer
    }

    pub fn validator(&self) -> &SessionValidator {
        &self.validator
    }

    /// 拒绝响应：`application/problem+json`，权威服务故障时附带 `Retry-After`
    fn deny(&self, err: &AuthError) -> Response {
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
        let body = serde_json::to_vec(&err.to_problem_details()).unwrap_or_default();

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if err.is_authority_failure() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        }
        response
    }
}

/// 会话管线中间件
///
/// 放行的请求携带 [`ClientContext`]，识别到会话时还携带 [`SessionToken`]
pub async fn session_pipeline(
    State(pipeline): State<Arc<AuthPipeline>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    // 凭证统一在所有路由上执行，公开路由只跳过会话校验
    let (mut parts, body) = request.into_parts();
    let normalized = pipeline.normalizer.normalize(&parts);
    let context = normalized.context;
    let kind = context.kind;
    let public = pipeline.validator.is_public(&path);

    match pipeline.validator.validate(&path, context.token()).await {
        Ok(verdict) => {
            let label = if public { "public" } else { verdict.as_str() };
            metrics::record_verdict(kind.as_str(), label);
            debug!(path = %path, client_kind = kind.as_str(), verdict = label, "Request allowed");

            parts.headers = normalized.headers;
            parts.uri = normalized.uri;
            if let Some(session) = verdict.into_session() {
                parts.extensions.insert(session);
            }
            parts.extensions.insert(context);

            let mut response = next.run(Request::from_parts(parts, body)).await;
            pipeline.normalizer.translate_response(kind, response.headers_mut());
            response
        }
        Err(err) => {
            metrics::record_verdict(kind.as_str(), err.code());
            if err.is_authority_failure() {
                error!(path = %path, error = %err, "Session validation unavailable");
            } else if err.is_decode_failure() {
                warn!(path = %path, client_kind = kind.as_str(), error = %err, "Session token rejected");
            } else {
                info!(path = %path, client_kind = kind.as_str(), error = %err, "Session denied");
            }
            pipeline.deny(&err)
        }
    }
}

/// 已认证会话提取器
///
/// 应该在 session_pipeline 之后使用
pub struct AuthSession(pub SessionToken);

impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionToken>()
            .cloned()
            .map(AuthSession)
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "No session in request extensions (session_pipeline may not have run)",
            ))
    }
}

/// 客户端上下文提取器
pub struct Client(pub ClientContext);

impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ClientContext>()
            .cloned()
            .map(Client)
            .ok_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                "No client context in request extensions (session_pipeline may not have run)",
            ))
    }
}
