//! passgate 网关
//!
//! 在转发上游之前统一 Web/移动端凭证，并按会话权威服务校验会话是否仍然有效。

pub mod authority;
pub mod classifier;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod normalizer;
pub mod proxy;
pub mod routing;
pub mod session_cache;
pub mod validator;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use authority::{AuthorityDispatcher, HttpSessionAuthority, SessionAuthority, SessionQuery};
pub use classifier::{ClassifierRules, ClientClassifier, ClientKind};
pub use error::GatewayError;
pub use middleware::{AuthPipeline, AuthSession, Client, session_pipeline};
pub use normalizer::{ClientContext, Credential, CredentialNormalizer, CredentialSource};
pub use routing::AppState;
pub use session_cache::SessionCache;
pub use validator::{PublicRoutes, SessionValidator, Verdict};

/// 组装网关：所有路由（含上游转发）都经过认证管线
pub fn build_router(pipeline: Arc<AuthPipeline>, state: AppState) -> Router {
    routing::gateway_routes(state)
        .layer(axum::middleware::from_fn_with_state(pipeline, session_pipeline))
        .layer(TraceLayer::new_for_http())
}
