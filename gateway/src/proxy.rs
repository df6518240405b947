//! 上游转发
//!
//! 单一上游的最小反向代理：去除逐跳头后原样转发请求并回传响应。

use std::time::Instant;

use axum::{
    body::{Body, to_bytes},
    extract::Request,
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use passgate_config::UpstreamConfig;
use tracing::{debug, error, warn};
use url::Url;

use crate::error::GatewayError;
use crate::metrics;

/// 不得跨跳转发的头
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
    header::CONTENT_LENGTH,
];

pub struct UpstreamProxy {
    client: reqwest::Client,
    base: Url,
    body_limit: usize,
}

impl UpstreamProxy {
    pub fn new(config: &UpstreamConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base: Url::parse(&config.url)?,
            body_limit: config.body_limit_bytes,
        })
    }

    fn target_url(&self, request: &Request) -> Result<Url, url::ParseError> {
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Url::parse(&format!(
            "{}{}",
            self.base.as_str().trim_end_matches('/'),
            path_and_query
        ))
    }

    /// 转发请求
    ///
    /// - 上游不可达 → 502
    /// - 请求体超限 → 413
    pub async fn forward(&self, request: Request) -> Response {
        let started = Instant::now();
        let method = request.method().clone();

        let url = match self.target_url(&request) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, uri = %request.uri(), "Cannot build upstream url");
                return StatusCode::BAD_REQUEST.into_response();
            }
        };

        let (parts, body) = request.into_parts();
        let body = match to_bytes(body, self.body_limit).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, limit = self.body_limit, "Request body rejected");
                return StatusCode::PAYLOAD_TOO_LARGE.into_response();
            }
        };

        let upstream = self
            .client
            .request(method.clone(), url.clone())
            .headers(strip_hop_by_hop(parts.headers))
            .body(body)
            .send()
            .await;

        let upstream = match upstream {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, url = %url, "Upstream request failed");
                metrics::record_upstream_request(method.as_str(), 502, elapsed_ms(started));
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers().clone());
        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, url = %url, "Failed to read upstream response");
                metrics::record_upstream_request(method.as_str(), 502, elapsed_ms(started));
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        metrics::record_upstream_request(method.as_str(), status.as_u16(), elapsed_ms(started));
        debug!(method = %method, url = %url, status = status.as_u16(), "Upstream responded");

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
