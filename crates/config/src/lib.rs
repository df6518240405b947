//! passgate-config - 网关配置加载库

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 上游服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_body_limit_bytes() -> usize {
    10 * 1024 * 1024
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Token 中各字段对应的 claim 名称
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimNames {
    #[serde(default = "default_identity_claim")]
    pub identity: String,
    #[serde(default = "default_partition_claim")]
    pub partition: String,
    #[serde(default = "default_session_id_claim")]
    pub session_id: String,
}

fn default_identity_claim() -> String {
    "identity".to_string()
}

fn default_partition_claim() -> String {
    "partition".to_string()
}

fn default_session_id_claim() -> String {
    "jti".to_string()
}

impl Default for ClaimNames {
    fn default() -> Self {
        Self {
            identity: default_identity_claim(),
            partition: default_partition_claim(),
            session_id: default_session_id_claim(),
        }
    }
}

/// JWT 配置
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default)]
    pub claims: ClaimNames,
    #[serde(default)]
    pub leeway_secs: u64,
}

fn default_cookie_name() -> String {
    "accessToken".to_string()
}

/// 会话缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

fn default_cache_ttl_secs() -> u64 {
    120
}

fn default_cache_capacity() -> u64 {
    500_000
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_capacity: default_cache_capacity(),
        }
    }
}

impl SessionCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// 会话权威服务不可用时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityFailurePolicy {
    /// 拒绝请求（503 + Retry-After）
    #[default]
    Deny,
    /// 放行请求，仅记录错误
    Allow,
}

/// 会话权威服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    pub base_url: String,
    #[serde(default = "default_list_path")]
    pub list_path: String,
    #[serde(default = "default_identity_param")]
    pub identity_param: String,
    #[serde(default = "default_partition_param")]
    pub partition_param: String,
    #[serde(default = "default_authority_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub failure_policy: AuthorityFailurePolicy,
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

fn default_list_path() -> String {
    "/api/auth/internal/jti".to_string()
}

fn default_identity_param() -> String {
    "identity".to_string()
}

fn default_partition_param() -> String {
    "partition".to_string()
}

fn default_authority_timeout_ms() -> u64 {
    3_000
}

fn default_max_concurrent() -> usize {
    64
}

fn default_retry_after_secs() -> u64 {
    5
}

impl AuthorityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 客户端类型识别规则
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_marker_header")]
    pub marker_header: String,
    #[serde(default = "default_marker_value")]
    pub marker_value: String,
    #[serde(default = "default_mobile_agent_keywords")]
    pub mobile_agent_keywords: Vec<String>,
    #[serde(default = "default_mobile_origin_prefixes")]
    pub mobile_origin_prefixes: Vec<String>,
    #[serde(default = "default_query_token_param")]
    pub query_token_param: String,
}

fn default_marker_header() -> String {
    "x-client-type".to_string()
}

fn default_marker_value() -> String {
    "mobile".to_string()
}

fn default_mobile_agent_keywords() -> Vec<String> {
    ["expo", "react native", "okhttp", "dart", "flutter"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_mobile_origin_prefixes() -> Vec<String> {
    vec!["exp://".to_string(), "exps://".to_string()]
}

fn default_query_token_param() -> String {
    "token".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            marker_header: default_marker_header(),
            marker_value: default_marker_value(),
            mobile_agent_keywords: default_mobile_agent_keywords(),
            mobile_origin_prefixes: default_mobile_origin_prefixes(),
            query_token_param: default_query_token_param(),
        }
    }
}

/// 路由配置
#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
    /// 公开路由：精确路径，或以 `/**` 结尾的前缀
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    ["/health", "/metrics", "/public/**"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            public_paths: default_public_paths(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// 网关配置
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub session_cache: SessionCacheConfig,
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_app_env() -> String {
    "development".to_string()
}

/// JWT 密钥最小长度（字节）
const MIN_SECRET_LEN: usize = 32;

impl GatewayConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 优先级：环境变量 `PASSGATE_*` > `{APP_ENV}.toml` > `default.toml`
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("PASSGATE_").split("__"));

        Self::from_figment(figment)
    }

    /// 从任意 figment 提取并校验
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "jwt.secret must be at least {} bytes long",
                MIN_SECRET_LEN
            )));
        }

        if self.jwt.cookie_name.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt.cookie_name must not be empty".into()));
        }

        if self.session_cache.ttl_secs == 0 || self.session_cache.max_capacity == 0 {
            return Err(ConfigError::Invalid(
                "session_cache.ttl_secs and session_cache.max_capacity must be positive".into(),
            ));
        }

        if self.authority.timeout_ms == 0 || self.authority.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "authority.timeout_ms and authority.max_concurrent must be positive".into(),
            ));
        }

        url::Url::parse(&self.authority.base_url)
            .map_err(|e| ConfigError::Invalid(format!("authority.base_url: {}", e)))?;
        url::Url::parse(&self.upstream.url)
            .map_err(|e| ConfigError::Invalid(format!("upstream.url: {}", e)))?;

        Ok(())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}
