//! 持久化服务路由模块

use std::time::Duration;

use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::state::AppState;

/// 创建持久化网关路由
///
/// Unary calls are bounded by `request_timeout`. The two streaming calls are
/// not: their duration depends on how much the caller sends or reads.
pub fn router(request_timeout: Duration) -> Router<AppState> {
    let unary = Router::new()
        .route(
            "/api/connections",
            get(handlers::list_connections).post(handlers::create_connection),
        )
        .route(
            "/api/connections/{id}",
            get(handlers::get_connection).delete(handlers::delete_connection),
        )
        .route("/api/connections/{id}/ping", get(handlers::ping))
        .route("/api/connections/{id}/databases", post(handlers::create_database))
        .route(
            "/api/connections/{id}/databases/{database}",
            delete(handlers::delete_database),
        )
        .route("/api/connections/{id}/collections", post(handlers::create_collection))
        .route(
            "/api/connections/{id}/databases/{database}/collections/{collection}",
            delete(handlers::delete_collection),
        )
        .route("/api/connections/{id}/count", post(handlers::count))
        .route("/api/connections/{id}/insert-one", post(handlers::insert_one))
        .route("/api/connections/{id}/find-one", post(handlers::find_one))
        .route("/api/connections/{id}/update", post(handlers::update))
        .route("/api/connections/{id}/update-one", post(handlers::update_one))
        .route("/api/connections/{id}/replace-one", post(handlers::replace_one))
        .route("/api/connections/{id}/delete", post(handlers::delete))
        .route("/api/connections/{id}/delete-one", post(handlers::delete_one))
        .route("/api/health", get(handlers::health_check))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ));

    let streaming = Router::new()
        .route("/api/insert-many", post(handlers::insert_many))
        .route("/api/connections/{id}/find", post(handlers::find));

    unary.merge(streaming)
}
