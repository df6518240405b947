//! 网关指标
//!
//! 通过 `metrics` 门面记录，由 Prometheus recorder 导出

use metrics::{counter, histogram};

/// 记录会话缓存查询
pub fn record_cache_lookup(hit: bool) {
    let labels = [("hit", hit.to_string())];
    counter!("passgate_session_cache_lookups_total", &labels).increment(1);
}

/// 记录校验结果
pub fn record_verdict(client_kind: &str, outcome: &str) {
    let labels = [
        ("client_kind", client_kind.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("passgate_verdicts_total", &labels).increment(1);
}

/// 记录一次会话权威服务调用
pub fn record_authority_call(status: &str, duration_ms: f64) {
    let labels = [("status", status.to_string())];
    counter!("passgate_authority_calls_total", &labels).increment(1);
    histogram!("passgate_authority_call_duration_ms", &labels).record(duration_ms);
}

/// 记录凭证改写
pub fn record_rewrite(client_kind: &str, rewrite: &str) {
    let labels = [
        ("client_kind", client_kind.to_string()),
        ("rewrite", rewrite.to_string()),
    ];
    counter!("passgate_credential_rewrites_total", &labels).increment(1);
}

/// 记录上游转发
pub fn record_upstream_request(method: &str, status: u16, duration_ms: f64) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("passgate_upstream_requests_total", &labels).increment(1);
    histogram!("passgate_upstream_request_duration_ms", &labels).record(duration_ms);
}
