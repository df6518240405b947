//! passgate 网关入口

use std::net::SocketAddr;
use std::sync::Arc;

use passgate_config::GatewayConfig;
use passgate_gateway::{AppState, AuthPipeline, HttpSessionAuthority, build_router, proxy::UpstreamProxy};
use passgate_telemetry::{init_metrics, init_tracing, init_tracing_json};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env 可选
    dotenvy::dotenv().ok();

    // 加载配置
    let config_dir = std::env::var("PASSGATE_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = GatewayConfig::load(&config_dir)?;

    // 初始化 tracing
    if config.telemetry.json {
        init_tracing_json(&config.telemetry.log_level);
    } else {
        init_tracing(&config.telemetry.log_level);
    }

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
            None
        }
    };

    info!(
        app_env = %config.app_env,
        authority = %config.authority.base_url,
        upstream = %config.upstream.url,
        failure_policy = ?config.authority.failure_policy,
        "Configuration loaded"
    );

    let authority = Arc::new(HttpSessionAuthority::new(&config.authority)?);
    let pipeline = Arc::new(AuthPipeline::from_config(&config, authority)?);
    let state = AppState {
        proxy: Arc::new(UpstreamProxy::new(&config.upstream)?),
        metrics,
    };

    let app = build_router(pipeline, state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, "Starting gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

/// 等待关闭信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
