//! 网关端到端测试：认证管线 + 上游转发

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::Request,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use passgate_auth_core::{SessionListResponse, SessionRecord};
use passgate_config::GatewayConfig;
use passgate_errors::{AuthError, AuthResult};
use passgate_gateway::{
    AppState, AuthPipeline, SessionAuthority, SessionQuery, build_router, proxy::UpstreamProxy,
};
use serde_json::json;
use tokio::sync::Mutex;
use tower::ServiceExt;

const SECRET: &str = "integration-secret-0123456789abcdef";

/// 可编程的权威服务：按顺序返回预置结果，记录调用
struct ScriptedAuthority {
    response: Mutex<AuthResult<SessionListResponse>>,
    calls: AtomicUsize,
    queries: Mutex<Vec<SessionQuery>>,
}

impl ScriptedAuthority {
    fn new(response: AuthResult<SessionListResponse>) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(response),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        })
    }

    async fn set_response(&self, response: AuthResult<SessionListResponse>) {
        *self.response.lock().await = response;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionAuthority for ScriptedAuthority {
    async fn list_sessions(&self, query: &SessionQuery) -> AuthResult<SessionListResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().await.push(query.clone());
        self.response.lock().await.clone()
    }
}

fn listing(ids: &[&str], max_sessions: u32) -> SessionListResponse {
    SessionListResponse {
        identity: "E100".to_string(),
        partition: "staff".to_string(),
        max_sessions,
        sessions: ids
            .iter()
            .map(|id| SessionRecord {
                session_id: id.to_string(),
                issued_at: None,
                expires_at: None,
            })
            .collect(),
    }
}

fn token(jti: &str) -> String {
    let claims = json!({
        "employeeNumber": "E100",
        "appType": "staff",
        "jti": jti,
        "exp": Utc::now().timestamp() + 3600,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// 回显上游：返回收到的 Authorization / Cookie / URI，登录接口下发会话 Cookie
async fn spawn_upstream() -> String {
    async fn echo(request: Request) -> impl IntoResponse {
        let value_of = |name: header::HeaderName| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string()
        };
        json!({
            "uri": request.uri().to_string(),
            "authorization": value_of(header::AUTHORIZATION),
            "cookie": value_of(header::COOKIE),
        })
        .to_string()
    }

    async fn login() -> Response {
        let mut response = "ok".into_response();
        response.headers_mut().append(
            header::SET_COOKIE,
            HeaderValue::from_static("accessToken=fresh.jwt.value; Path=/; HttpOnly"),
        );
        response
    }

    let app = Router::new()
        .route("/public/login", post(login))
        .route("/api/{*rest}", get(echo))
        .route("/socket.io/", get(echo));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(upstream: &str) -> GatewayConfig {
    let config: GatewayConfig = serde_json::from_value(json!({
        "upstream": { "url": upstream },
        "jwt": {
            "secret": SECRET,
            "claims": { "identity": "employeeNumber", "partition": "appType" }
        },
        "authority": { "base_url": "http://127.0.0.1:1", "retry_after_secs": 9 },
        "routes": { "public_paths": ["/health", "/public/**"] }
    }))
    .unwrap();
    config.validate().unwrap();
    config
}

async fn gateway(authority: Arc<ScriptedAuthority>) -> (Router, Arc<AuthPipeline>) {
    let config = config(&spawn_upstream().await);
    let pipeline = Arc::new(AuthPipeline::from_config(&config, authority).unwrap());
    let state = AppState {
        proxy: Arc::new(UpstreamProxy::new(&config.upstream).unwrap()),
        metrics: None,
    };
    (build_router(pipeline.clone(), state), pipeline)
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_web_cookie_session_is_forwarded_with_bearer() {
    let authority = ScriptedAuthority::new(Ok(listing(&["J1"], 3)));
    let (app, pipeline) = gateway(authority.clone()).await;
    let t = token("J1");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/orders/42")
                .header(header::COOKIE, format!("accessToken={}", t))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let seen = json_body(response).await;
    assert_eq!(seen["authorization"], format!("Bearer {}", t));
    assert_eq!(seen["cookie"], format!("accessToken={}", t));

    assert_eq!(authority.calls(), 1);
    let query = authority.queries.lock().await[0].clone();
    assert_eq!(query.identity, "E100");
    assert_eq!(query.partition, "staff");
    assert_eq!(query.credential, format!("accessToken={}", t));

    let cached = pipeline.validator().cache().get("E100:staff").await.unwrap();
    assert_eq!(*cached, HashSet::from(["J1".to_string()]));
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let authority = ScriptedAuthority::new(Ok(listing(&["J1"], 3)));
    let (app, _) = gateway(authority.clone()).await;
    let t = token("J1");

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/orders")
                    .header(header::AUTHORIZATION, format!("Bearer {}", t))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(authority.calls(), 1);
}

#[tokio::test]
async fn test_revoked_session_is_rejected_after_miss() {
    let authority = ScriptedAuthority::new(Ok(listing(&["J1"], 3)));
    let (app, _) = gateway(authority.clone()).await;

    // J1 有效并进入缓存
    let ok = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/orders")
                .header(header::AUTHORIZATION, format!("Bearer {}", token("J1")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    // 另一设备的 J2 已被挤下线：缓存不含 J2，权威服务也不再列出
    authority.set_response(Ok(listing(&["J1"], 1))).await;
    let denied = app
        .oneshot(
            Request::builder()
                .uri("/api/orders")
                .header(header::AUTHORIZATION, format!("Bearer {}", token("J2")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(authority.calls(), 2);
    let problem = json_body(denied).await;
    assert_eq!(problem["status"], 429);
}

#[tokio::test]
async fn test_mobile_bearer_gets_cookie_and_streaming_query() {
    let authority = ScriptedAuthority::new(Ok(listing(&["J1"], 3)));
    let (app, _) = gateway(authority).await;
    let t = token("J1");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/socket.io/?EIO=4&transport=polling")
                .header(header::AUTHORIZATION, format!("Bearer {}", t))
                .header("x-client-type", "mobile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let seen = json_body(response).await;
    assert_eq!(seen["authorization"], format!("Bearer {}", t));
    assert_eq!(seen["cookie"], format!("accessToken={}", t));
    assert_eq!(
        seen["uri"],
        format!("/socket.io/?EIO=4&transport=polling&token={}", t)
    );
}

#[tokio::test]
async fn test_mobile_login_response_is_translated() {
    let authority = ScriptedAuthority::new(Ok(listing(&[], 1)));
    let (app, _) = gateway(authority.clone()).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/public/login")
                .header(header::USER_AGENT, "Expo/2.31 CFNetwork/1494 Darwin/23.4.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::AUTHORIZATION).unwrap(),
        "Bearer fresh.jwt.value"
    );
    assert_eq!(
        response.headers().get("x-auth-source").unwrap(),
        "translated-from-cookie"
    );
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    // Web 客户端保留 Set-Cookie
    let web = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/public/login")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(web.headers().get(header::SET_COOKIE).is_some());
    assert!(web.headers().get(header::AUTHORIZATION).is_none());
    assert_eq!(authority.calls(), 0);
}

#[tokio::test]
async fn test_forged_token_is_401_with_no_authority_call() {
    let authority = ScriptedAuthority::new(Ok(listing(&["J1"], 3)));
    let (app, _) = gateway(authority.clone()).await;

    let forged = encode(
        &Header::default(),
        &json!({"employeeNumber": "E100", "appType": "staff", "jti": "J1", "exp": Utc::now().timestamp() + 60}),
        &EncodingKey::from_secret(b"someone-else-secret-0123456789abcd"),
    )
    .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/orders")
                .header(header::AUTHORIZATION, format!("Bearer {}", forged))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(authority.calls(), 0);
}

#[tokio::test]
async fn test_authority_outage_returns_retryable_503() {
    let authority = ScriptedAuthority::new(Err(AuthError::authority_unreachable("timeout")));
    let (app, _) = gateway(authority).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/orders")
                .header(header::AUTHORIZATION, format!("Bearer {}", token("J1")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "9");
}

#[tokio::test]
async fn test_health_is_public() {
    let authority = ScriptedAuthority::new(Ok(listing(&[], 1)));
    let (app, _) = gateway(authority.clone()).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::AUTHORIZATION, "Bearer garbage")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health = json_body(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(authority.calls(), 0);
}
