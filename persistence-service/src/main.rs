//! 文档存储持久化网关服务
//!
//! 提供：
//! - 连接注册与句柄管理（配置持久化，重启后需重新注册）
//! - 文档 CRUD 调度
//! - 流式批量插入与分批查询

mod config_store;
mod handlers;
mod registry;
mod routes;
mod service;
mod state;
mod store;
mod streaming;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::AppConfig;
use common::middleware::request_id::request_id_middleware;
use state::AppState;
use tokio::net::TcpListener;
use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "persistence-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "持久化网关 API",
        version = "0.1.0",
        description = "文档存储持久化网关微服务"
    ),
    paths(
        handlers::list_connections,
        handlers::create_connection,
        handlers::get_connection,
        handlers::delete_connection,
        handlers::ping,
        handlers::create_database,
        handlers::delete_database,
        handlers::create_collection,
        handlers::delete_collection,
        handlers::count,
        handlers::insert_one,
        handlers::insert_many,
        handlers::find,
        handlers::find_one,
        handlers::update,
        handlers::update_one,
        handlers::replace_one,
        handlers::delete,
        handlers::delete_one,
        handlers::health_check,
    ),
    components(schemas(
        common::models::Connection,
        common::models::ConnectionItem,
        common::models::StoreType,
        common::models::DatabaseRequest,
        common::models::CollectionRequest,
        common::models::FilterRequest,
        common::models::QueryRequest,
        common::models::MutateRequest,
        common::models::InsertOneRequest,
        common::models::InsertManyRequest,
        common::models::BoolResult,
        common::models::PingResult,
        common::models::CountResult,
        common::models::InsertOneResult,
        common::models::InsertManyResult,
        common::models::FindBatch,
        common::models::FindOneResult,
        handlers::HealthResponse,
    )),
    tags(
        (name = "connections", description = "连接管理端点"),
        (name = "namespaces", description = "数据库与集合端点"),
        (name = "documents", description = "文档操作端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (if present) before anything else
    load_dotenv();

    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 加载配置
    let config = AppConfig::load_with_service(SERVICE_NAME);

    // 恢复已保存的连接（不自动重连）
    let state = AppState::new(config.clone())
        .await
        .with_context(|| format!("failed to load {}", config.config_path.display()))?;

    let app = create_router(state);

    let addr = config.addr();
    info!(service = SERVICE_NAME, address = %addr, config = %config.config_path.display(), "启动服务");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务运行失败")?;

    info!(service = SERVICE_NAME, "服务已停止");
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .merge(routes::router(state.config.request_timeout()))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Any origin when none are configured, otherwise only the listed ones.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origin = if config.allow_all_origins() {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("收到停止信号");
}

/// Seeds the environment from `.env` in the working directory.
///
/// Variables already set in the environment win. A missing file is fine.
fn load_dotenv() {
    let Ok(content) = std::fs::read_to_string(".env") else {
        return;
    };
    for (key, value) in content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
    {
        let (key, value) = (key.trim(), value.trim().trim_matches('"'));
        if std::env::var_os(key).is_none() {
            std::env::set_var(key, value);
        }
    }
}
