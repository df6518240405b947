//! 凭证归一化
//!
//! 把 Web（Cookie）与移动端（Bearer）两种凭证传输方式统一为 `Authorization: Bearer`，
//! 同时保留上游 Cookie 网格所需的 Cookie。
//!
//! - Web：Cookie → Bearer，Cookie 保持不变
//! - Mobile：Bearer → 补充同名 Cookie；流式握手请求额外补充查询参数
//! - 已有 Bearer 的请求不再重写（幂等）
//!
//! 所有改写都作用于请求头的副本，不做任何网络 I/O。

use axum::http::{
    HeaderMap, HeaderValue, Uri, header,
    request::Parts,
    uri::PathAndQuery,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::classifier::{ClientClassifier, ClientKind};
use crate::metrics;

/// Socket.io 等流式传输路径
static STREAMING_PATH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|/)socket\.?io(/|$)").expect("static regex"));

const BEARER_SCHEME: &str = "Bearer";

/// 凭证来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    BearerHeader,
    Cookie,
    QueryParam,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BearerHeader => "bearer",
            Self::Cookie => "cookie",
            Self::QueryParam => "query",
        }
    }
}

/// 请求中携带的会话凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub source: CredentialSource,
    pub token: String,
}

/// 单个请求的客户端上下文，不做持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub kind: ClientKind,
    /// Socket.io / WebSocket 升级请求
    pub streaming: bool,
    /// 原始凭证（来源 + 值）
    pub credential: Option<Credential>,
}

impl ClientContext {
    /// 归一化后的规范凭证（即下游 Bearer 头中的 token）
    pub fn token(&self) -> Option<&str> {
        self.credential.as_ref().map(|c| c.token.as_str())
    }
}

/// 改写类型，用于日志与指标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    BearerHeader,
    Cookie,
    QueryParam,
}

impl Rewrite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BearerHeader => "bearer_header",
            Self::Cookie => "cookie",
            Self::QueryParam => "query_param",
        }
    }
}

/// 归一化结果：原请求头/URI 的改写副本
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub context: ClientContext,
    pub headers: HeaderMap,
    pub uri: Uri,
    pub rewrites: Vec<Rewrite>,
}

/// 凭证归一化器
#[derive(Debug, Clone)]
pub struct CredentialNormalizer {
    classifier: ClientClassifier,
    cookie_name: String,
    query_param: String,
}

impl CredentialNormalizer {
    pub fn new(classifier: ClientClassifier, cookie_name: impl Into<String>, query_param: impl Into<String>) -> Self {
        Self {
            classifier,
            cookie_name: cookie_name.into(),
            query_param: query_param.into(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn classify(&self, headers: &HeaderMap) -> ClientKind {
        self.classifier.classify(headers)
    }

    /// 归一化请求凭证
    ///
    /// 凭证优先级：Bearer 头 > Cookie > 查询参数（仅流式请求）
    pub fn normalize(&self, parts: &Parts) -> NormalizedRequest {
        let kind = self.classifier.classify(&parts.headers);
        let streaming = is_streaming_request(&parts.uri, &parts.headers);

        let bearer = bearer_token(&parts.headers);
        let cookie = cookie_value(&parts.headers, &self.cookie_name);
        let query = streaming
            .then(|| query_value(&parts.uri, &self.query_param))
            .flatten();

        let credential = bearer
            .map(|token| Credential { source: CredentialSource::BearerHeader, token })
            .or_else(|| cookie.clone().map(|token| Credential { source: CredentialSource::Cookie, token }))
            .or_else(|| query.map(|token| Credential { source: CredentialSource::QueryParam, token }));

        let mut headers = parts.headers.clone();
        let mut uri = parts.uri.clone();
        let mut rewrites = Vec::new();

        if let Some(credential) = &credential {
            let token = credential.token.as_str();

            if credential.source != CredentialSource::BearerHeader {
                if let Ok(value) = HeaderValue::from_str(&format!("{} {}", BEARER_SCHEME, token)) {
                    headers.insert(header::AUTHORIZATION, value);
                    rewrites.push(Rewrite::BearerHeader);
                }
            }

            if kind.is_mobile() {
                if cookie.as_deref() != Some(token) && set_cookie(&mut headers, &self.cookie_name, token) {
                    rewrites.push(Rewrite::Cookie);
                }

                if streaming && !has_query_param(&uri, &self.query_param) {
                    if let Some(rewritten) = append_query_param(&uri, &self.query_param, token) {
                        uri = rewritten;
                        rewrites.push(Rewrite::QueryParam);
                    }
                }
            }
        }

        for rewrite in &rewrites {
            metrics::record_rewrite(kind.as_str(), rewrite.as_str());
        }

        debug!(
            client_kind = kind.as_str(),
            streaming,
            source = credential.as_ref().map(|c| c.source.as_str()).unwrap_or("none"),
            rewrites = rewrites.len(),
            "Credential normalized"
        );

        NormalizedRequest {
            context: ClientContext {
                kind,
                streaming,
                credential,
            },
            headers,
            uri,
            rewrites,
        }
    }

    /// 移动端响应翻译：`Set-Cookie: <cookie>=<token>` → `Authorization: Bearer <token>`
    ///
    /// 返回是否发生了翻译。Web 响应保持不变。
    pub fn translate_response(&self, kind: ClientKind, headers: &mut HeaderMap) -> bool {
        if !kind.is_mobile() {
            return false;
        }

        let mut token = None;
        let mut kept = Vec::new();
        for value in headers.get_all(header::SET_COOKIE) {
            let carried = value
                .to_str()
                .ok()
                .and_then(|v| set_cookie_value(v, &self.cookie_name));
            match carried {
                Some(t) if token.is_none() => token = Some(t),
                _ => kept.push(value.clone()),
            }
        }

        let Some(token) = token else {
            return false;
        };
        let Ok(bearer) = HeaderValue::from_str(&format!("{} {}", BEARER_SCHEME, token)) else {
            return false;
        };

        headers.remove(header::SET_COOKIE);
        for value in kept {
            headers.append(header::SET_COOKIE, value);
        }
        headers.insert(header::AUTHORIZATION, bearer);
        headers.append(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("Authorization"),
        );
        headers.insert("x-auth-source", HeaderValue::from_static("translated-from-cookie"));

        debug!("Translated Set-Cookie into Authorization header for mobile client");
        true
    }
}

/// Socket.io 路径或 WebSocket 升级请求
fn is_streaming_request(uri: &Uri, headers: &HeaderMap) -> bool {
    if STREAMING_PATH_REGEX.is_match(uri.path()) {
        return true;
    }

    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));

    upgrade && connection
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case(BEARER_SCHEME) && !token.is_empty()).then(|| token.to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, v)| k.trim() == name && !v.trim().is_empty())
        .map(|(_, v)| v.trim().to_string())
}

/// 合并所有 Cookie 头，替换同名 Cookie
fn set_cookie(headers: &mut HeaderMap, name: &str, token: &str) -> bool {
    let mut pairs: Vec<String> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| pair.split_once('=').map(|(k, _)| k.trim()) != Some(name))
        .map(String::from)
        .collect();
    pairs.push(format!("{}={}", name, token));

    match HeaderValue::from_str(&pairs.join("; ")) {
        Ok(value) => {
            headers.remove(header::COOKIE);
            headers.insert(header::COOKIE, value);
            true
        }
        Err(_) => false,
    }
}

fn set_cookie_value(set_cookie: &str, name: &str) -> Option<String> {
    let first = set_cookie.split(';').next()?.trim();
    let (k, v) = first.split_once('=')?;
    let v = v.trim();
    (k.trim() == name && !v.is_empty()).then(|| v.to_string())
}

fn query_value(uri: &Uri, name: &str) -> Option<String> {
    url::form_urlencoded::parse(uri.query()?.as_bytes())
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

fn has_query_param(uri: &Uri, name: &str) -> bool {
    uri.query()
        .is_some_and(|q| url::form_urlencoded::parse(q.as_bytes()).any(|(k, _)| k == name))
}

fn append_query_param(uri: &Uri, name: &str, value: &str) -> Option<Uri> {
    let encoded: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(name, value)
        .finish();
    let path_and_query = match uri.query() {
        Some(q) if !q.is_empty() => format!("{}?{}&{}", uri.path(), q, encoded),
        _ => format!("{}?{}", uri.path(), encoded),
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse::<PathAndQuery>().ok()?);
    Uri::from_parts(parts).ok()
}
