//! 客户端类型分类器
//!
//! 根据显式标记头、User-Agent 关键字和 Origin 前缀判断请求来自 Web 还是移动端。
//! 规则是数据（来自配置），分类本身是纯函数。

use axum::http::{HeaderMap, HeaderName, header};
use passgate_config::ClientConfig;
use regex::{RegexSet, RegexSetBuilder};

use crate::error::GatewayError;

/// 客户端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    Web,
    Mobile,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Mobile => "mobile",
        }
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self, Self::Mobile)
    }
}

/// 分类规则
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    /// 显式标记头（如 `X-Client-Type`）
    pub marker_header: String,
    /// 标记头取该值时判定为移动端
    pub marker_value: String,
    /// User-Agent 中出现即判定为移动端的关键字（大小写不敏感）
    pub agent_keywords: Vec<String>,
    /// Origin 以这些前缀开头时判定为移动端
    pub origin_prefixes: Vec<String>,
}

impl From<&ClientConfig> for ClassifierRules {
    fn from(config: &ClientConfig) -> Self {
        Self {
            marker_header: config.marker_header.clone(),
            marker_value: config.marker_value.clone(),
            agent_keywords: config.mobile_agent_keywords.clone(),
            origin_prefixes: config.mobile_origin_prefixes.clone(),
        }
    }
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// 客户端分类器
#[derive(Debug, Clone)]
pub struct ClientClassifier {
    marker_header: HeaderName,
    marker_value: String,
    agent_patterns: RegexSet,
    origin_prefixes: Vec<String>,
}

impl ClientClassifier {
    pub fn new(rules: &ClassifierRules) -> Result<Self, GatewayError> {
        let marker_header = HeaderName::from_bytes(rules.marker_header.to_ascii_lowercase().as_bytes())
            .map_err(|e| GatewayError::InvalidRule(format!("marker header: {}", e)))?;

        // 关键字按字面量匹配
        let agent_patterns = RegexSetBuilder::new(
            rules
                .agent_keywords
                .iter()
                .filter(|k| !k.trim().is_empty())
                .map(|k| regex::escape(k.trim())),
        )
        .case_insensitive(true)
        .build()
        .map_err(|e| GatewayError::InvalidRule(format!("agent keywords: {}", e)))?;

        Ok(Self {
            marker_header,
            marker_value: rules.marker_value.clone(),
            agent_patterns,
            origin_prefixes: rules.origin_prefixes.clone(),
        })
    }

    /// 对请求进行分类
    ///
    /// # 分类规则
    /// 1. 标记头等于配置值 → Mobile
    /// 2. User-Agent 包含任一移动端关键字 → Mobile
    /// 3. Origin 以移动端前缀开头 → Mobile
    /// 4. 其他 → Web
    pub fn classify(&self, headers: &HeaderMap) -> ClientKind {
        let marker = headers
            .get(&self.marker_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim);
        if marker.is_some_and(|m| m.eq_ignore_ascii_case(&self.marker_value)) {
            return ClientKind::Mobile;
        }

        let agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok());
        if agent.is_some_and(|ua| self.agent_patterns.is_match(ua)) {
            return ClientKind::Mobile;
        }

        let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
        if origin.is_some_and(|o| self.origin_prefixes.iter().any(|p| o.starts_with(p.as_str()))) {
            return ClientKind::Mobile;
        }

        ClientKind::Web
    }
}
