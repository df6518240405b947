//! 会话校验状态机
//!
//! ```text
//! NoToken ──────────────────────────────────────────────▶ 放行
//! TokenDecoded ─▶ CacheHit ─────────────────────────────▶ 放行
//!              └▶ CacheMiss ─▶ AuthorityQueried ─▶ SessionActive  ▶ 放行
//!                                               ├▶ QuotaExceeded  ▶ 429
//!                                               └▶ SessionUnknown ▶ 401
//! ```
//!
//! 缓存未命中时查询权威服务，并在作出判定前用其结果刷新缓存。

use std::collections::HashSet;

use passgate_auth_core::{SessionListResponse, SessionToken, TokenDecoder};
use passgate_config::AuthorityFailurePolicy;
use passgate_errors::{AuthError, AuthResult};
use tracing::{debug, error};

use crate::authority::{AuthorityDispatcher, SessionQuery};
use crate::session_cache::SessionCache;

/// 放行类判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// 公开路由或未携带凭证
    NoToken,
    /// 缓存中存在该会话
    CacheHit(SessionToken),
    /// 权威服务确认会话有效
    SessionActive(SessionToken),
    /// 权威服务不可用，按 `allow` 策略放行
    AuthorityBypassed(SessionToken),
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoToken => "no_token",
            Self::CacheHit(_) => "cache_hit",
            Self::SessionActive(_) => "session_active",
            Self::AuthorityBypassed(_) => "authority_bypassed",
        }
    }

    pub fn session(&self) -> Option<&SessionToken> {
        match self {
            Self::NoToken => None,
            Self::CacheHit(s) | Self::SessionActive(s) | Self::AuthorityBypassed(s) => Some(s),
        }
    }

    pub fn into_session(self) -> Option<SessionToken> {
        match self {
            Self::NoToken => None,
            Self::CacheHit(s) | Self::SessionActive(s) | Self::AuthorityBypassed(s) => Some(s),
        }
    }
}

/// 公开路由表
///
/// 条目为精确路径，或以 `/**` 结尾的前缀（`/public/**` 匹配 `/public` 与 `/public/a/b`）
#[derive(Debug, Clone, Default)]
pub struct PublicRoutes {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl PublicRoutes {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut routes = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            match pattern.strip_suffix("/**") {
                Some(prefix) => routes.prefixes.push(prefix.to_string()),
                None => {
                    routes.exact.insert(pattern.to_string());
                }
            }
        }
        routes
    }

    pub fn is_public(&self, path: &str) -> bool {
        if self.exact.contains(path) {
            return true;
        }
        self.prefixes.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// 会话校验器
pub struct SessionValidator {
    decoder: TokenDecoder,
    cache: SessionCache,
    authority: AuthorityDispatcher,
    public_routes: PublicRoutes,
    cookie_name: String,
    failure_policy: AuthorityFailurePolicy,
}

impl SessionValidator {
    pub fn new(
        decoder: TokenDecoder,
        cache: SessionCache,
        authority: AuthorityDispatcher,
        public_routes: PublicRoutes,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            decoder,
            cache,
            authority,
            public_routes,
            cookie_name: cookie_name.into(),
            failure_policy: AuthorityFailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, policy: AuthorityFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_routes.is_public(path)
    }

    /// 校验一次请求
    ///
    /// `token` 为归一化后的规范凭证
    pub async fn validate(&self, path: &str, token: Option<&str>) -> AuthResult<Verdict> {
        if self.public_routes.is_public(path) {
            return Ok(Verdict::NoToken);
        }
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(Verdict::NoToken);
        };

        let session = self.decoder.decode(token)?;
        let key = session.cache_key();

        if let Some(active) = self.cache.get(&key).await {
            if active.contains(&session.session_id) {
                debug!(key = %key, session_id = %session.session_id, "Session found in cache");
                return Ok(Verdict::CacheHit(session));
            }
        }

        let query = SessionQuery {
            identity: session.identity.clone(),
            partition: session.partition.clone(),
            credential: format!("{}={}", self.cookie_name, token),
        };

        let listing = match self.authority.dispatch(query).await {
            Ok(listing) => listing,
            Err(e) => return self.on_authority_failure(session, e),
        };

        self.cache.put(key, listing.session_ids()).await;

        decide(session, &listing)
    }

    fn on_authority_failure(&self, session: SessionToken, err: AuthError) -> AuthResult<Verdict> {
        match self.failure_policy {
            AuthorityFailurePolicy::Deny => Err(err),
            AuthorityFailurePolicy::Allow => {
                error!(
                    error = %err,
                    identity = %session.identity,
                    partition = %session.partition,
                    "Session authority unavailable, allowing request by policy"
                );
                Ok(Verdict::AuthorityBypassed(session))
            }
        }
    }
}

/// 基于权威服务结果的判定
pub fn decide(session: SessionToken, listing: &SessionListResponse) -> AuthResult<Verdict> {
    if listing.contains(&session.session_id) {
        return Ok(Verdict::SessionActive(session));
    }

    if listing.is_quota_full() {
        return Err(AuthError::quota_exceeded(
            listing.active_count(),
            listing.effective_max_sessions(),
        ));
    }

    Err(AuthError::session_not_recognized(session.session_id))
}
