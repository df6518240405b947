//! 会话权威服务
//!
//! 权威服务持有每个 `identity:partition` 的活跃会话列表与配额。
//! 网关只读查询，不做任何写入。
//!
//! 调用经由 [`AuthorityDispatcher`]：
//! - 有界并发（信号量）
//! - 整体超时（含等待许可的时间）
//! - 调用方放弃（超时或客户端断开）时中止进行中的查询

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use passgate_auth_core::SessionListResponse;
use passgate_config::AuthorityConfig;
use passgate_errors::{AuthError, AuthResult};
use reqwest::header::COOKIE;
use tokio::sync::Semaphore;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};
use url::Url;

use crate::error::GatewayError;
use crate::metrics;

/// 会话列表查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQuery {
    pub identity: String,
    pub partition: String,
    /// 原样转发的凭证（`<cookie>=<token>`）
    pub credential: String,
}

/// 会话权威服务端口
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    async fn list_sessions(&self, query: &SessionQuery) -> AuthResult<SessionListResponse>;
}

/// 基于 HTTP 的会话权威服务客户端
///
/// `GET {base_url}{list_path}?identity=..&partition=..`，凭证放在 Cookie 头中
pub struct HttpSessionAuthority {
    client: reqwest::Client,
    endpoint: Url,
    identity_param: String,
    partition_param: String,
}

impl HttpSessionAuthority {
    pub fn new(config: &AuthorityConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .build()?;

        Self::with_client(client, config)
    }

    pub fn with_client(client: reqwest::Client, config: &AuthorityConfig) -> Result<Self, GatewayError> {
        // 保留 base_url 自带的路径前缀
        let endpoint = Url::parse(&format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.list_path.trim_start_matches('/')
        ))?;

        Ok(Self {
            client,
            endpoint,
            identity_param: config.identity_param.clone(),
            partition_param: config.partition_param.clone(),
        })
    }

    fn request_url(&self, query: &SessionQuery) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(&self.identity_param, &query.identity)
            .append_pair(&self.partition_param, &query.partition);
        url
    }
}

#[async_trait]
impl SessionAuthority for HttpSessionAuthority {
    async fn list_sessions(&self, query: &SessionQuery) -> AuthResult<SessionListResponse> {
        let response = self
            .client
            .get(self.request_url(query))
            .header(COOKIE, &query.credential)
            .send()
            .await
            .map_err(|e| AuthError::authority_unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::authority_rejected(format!("status {}", status.as_u16())));
        }

        response
            .json::<SessionListResponse>()
            .await
            .map_err(|e| AuthError::authority_rejected(format!("invalid response body: {}", e)))
    }
}

/// 权威服务调用调度器
#[derive(Clone)]
pub struct AuthorityDispatcher {
    authority: Arc<dyn SessionAuthority>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl AuthorityDispatcher {
    pub fn new(authority: Arc<dyn SessionAuthority>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            authority,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    pub fn from_config(authority: Arc<dyn SessionAuthority>, config: &AuthorityConfig) -> Self {
        Self::new(authority, config.max_concurrent, config.timeout())
    }

    /// 当前可用的并发许可数
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// 在工作池中执行一次查询
    ///
    /// 超时或调用方被丢弃时，进行中的查询随之中止，结果不会被写入缓存。
    pub async fn dispatch(&self, query: SessionQuery) -> AuthResult<SessionListResponse> {
        let started = Instant::now();
        let authority = self.authority.clone();
        let permits = self.permits.clone();

        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| AuthError::authority_unreachable("authority worker pool closed"))?;
            authority.list_sessions(&query).await
        }));

        let result = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(AuthError::authority_unreachable(format!("authority task failed: {}", e))),
            Err(_) => Err(AuthError::authority_unreachable(format!(
                "no response within {}ms",
                self.timeout.as_millis()
            ))),
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(resp) => {
                metrics::record_authority_call("ok", elapsed_ms);
                debug!(
                    active = resp.active_count(),
                    max_sessions = resp.max_sessions,
                    elapsed_ms,
                    "Session authority answered"
                );
            }
            Err(e) => {
                metrics::record_authority_call(e.code(), elapsed_ms);
                warn!(error = %e, elapsed_ms, "Session authority call failed");
            }
        }

        result
    }
}
