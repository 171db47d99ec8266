//! Handler模块

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use utoipa::ToSchema;

use common::errors::{AppResult, RpcError};
use common::models::{
    BoolResult, CollectionRequest, Connection, ConnectionItem, CountResult, DatabaseRequest,
    FilterRequest, FindBatch, FindOneResult, InsertManyRequest, InsertManyResult,
    InsertOneRequest, InsertOneResult, MutateRequest, PingResult, QueryRequest,
};
use common::response::ApiResponse;
use common::utils::JsonCodec;

use crate::service::PersistenceService;
use crate::state::AppState;
use crate::streaming::decode_ndjson;

const SERVICE_NAME: &str = "persistence-service";
const NDJSON: &str = "application/x-ndjson";

type ApiResult<T> = Result<Json<ApiResponse<T>>, RpcError>;

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::ok_with_service(data, SERVICE_NAME))
}

/// 列出所有已注册的连接
#[utoipa::path(
    get,
    path = "/api/connections",
    tag = "connections",
    responses(
        (status = 200, description = "连接列表", body = ApiResponse<Vec<ConnectionItem>>)
    )
)]
pub async fn list_connections(State(state): State<AppState>) -> ApiResult<Vec<ConnectionItem>> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.list_connections().await))
}

/// 注册连接（已存在的 id 会被替换）
#[utoipa::path(
    post,
    path = "/api/connections",
    tag = "connections",
    request_body = Connection,
    responses(
        (status = 200, description = "连接已建立", body = ApiResponse<BoolResult>),
        (status = 400, description = "参数无效"),
        (status = 503, description = "后端不可达，配置仍已保存")
    )
)]
pub async fn create_connection(
    State(state): State<AppState>,
    Json(connection): Json<Connection>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.create_connection(connection).await?))
}

/// 根据 ID 获取连接
#[utoipa::path(
    get,
    path = "/api/connections/{id}",
    tag = "connections",
    params(("id" = String, Path, description = "连接 ID")),
    responses(
        (status = 200, description = "连接详情", body = ApiResponse<ConnectionItem>),
        (status = 404, description = "连接未找到")
    )
)]
pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ConnectionItem> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.get_connection(&id).await?))
}

/// 删除连接并释放其句柄；未知 id 同样成功
#[utoipa::path(
    delete,
    path = "/api/connections/{id}",
    tag = "connections",
    params(("id" = String, Path, description = "连接 ID")),
    responses(
        (status = 200, description = "连接已删除", body = ApiResponse<BoolResult>)
    )
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.delete_connection(&id).await?))
}

/// 检测后端连通性
#[utoipa::path(
    get,
    path = "/api/connections/{id}/ping",
    tag = "connections",
    params(("id" = String, Path, description = "连接 ID")),
    responses(
        (status = 200, description = "后端可达", body = ApiResponse<PingResult>),
        (status = 404, description = "连接未找到"),
        (status = 503, description = "后端不可达")
    )
)]
pub async fn ping(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<PingResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.ping(&id).await?))
}

#[utoipa::path(
    post,
    path = "/api/connections/{id}/databases",
    tag = "namespaces",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = DatabaseRequest,
    responses(
        (status = 200, description = "数据库已创建", body = ApiResponse<BoolResult>),
        (status = 501, description = "后端不支持显式创建")
    )
)]
pub async fn create_database(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DatabaseRequest>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.create_database(&id, req).await?))
}

#[utoipa::path(
    delete,
    path = "/api/connections/{id}/databases/{database}",
    tag = "namespaces",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名")
    ),
    responses(
        (status = 200, description = "数据库已删除", body = ApiResponse<BoolResult>)
    )
)]
pub async fn delete_database(
    State(state): State<AppState>,
    Path((id, database)): Path<(String, String)>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.delete_database(&id, &database).await?))
}

#[utoipa::path(
    post,
    path = "/api/connections/{id}/collections",
    tag = "namespaces",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = CollectionRequest,
    responses(
        (status = 200, description = "集合已创建", body = ApiResponse<BoolResult>),
        (status = 501, description = "后端不支持显式创建")
    )
)]
pub async fn create_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CollectionRequest>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.create_collection(&id, req).await?))
}

#[utoipa::path(
    delete,
    path = "/api/connections/{id}/databases/{database}/collections/{collection}",
    tag = "namespaces",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名"),
        ("collection" = String, Path, description = "集合名")
    ),
    responses(
        (status = 200, description = "集合已删除", body = ApiResponse<BoolResult>)
    )
)]
pub async fn delete_collection(
    State(state): State<AppState>,
    Path((id, database, collection)): Path<(String, String, String)>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.delete_collection(&id, &database, &collection).await?))
}

#[utoipa::path(
    post,
    path = "/api/connections/{id}/count",
    tag = "documents",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = FilterRequest,
    responses(
        (status = 200, description = "匹配文档数", body = ApiResponse<CountResult>)
    )
)]
pub async fn count(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FilterRequest>,
) -> ApiResult<CountResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.count(&id, req).await?))
}

#[utoipa::path(
    post,
    path = "/api/connections/{id}/insert-one",
    tag = "documents",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = InsertOneRequest,
    responses(
        (status = 200, description = "文档已插入", body = ApiResponse<InsertOneResult>)
    )
)]
pub async fn insert_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<InsertOneRequest>,
) -> ApiResult<InsertOneResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.insert_one(&id, req).await?))
}

/// 流式批量插入
///
/// 请求体为 NDJSON，每行一条 `InsertManyRequest`，各自携带连接 ID。
#[utoipa::path(
    post,
    path = "/api/insert-many",
    tag = "documents",
    request_body(content = InsertManyRequest, content_type = "application/x-ndjson"),
    responses(
        (status = 200, description = "全部插入完成", body = ApiResponse<InsertManyResult>),
        (status = 400, description = "消息无法解析，之前的消息已插入")
    )
)]
pub async fn insert_many(State(state): State<AppState>, body: Body) -> ApiResult<InsertManyResult> {
    let service = PersistenceService::new(state.registry);
    let messages = decode_ndjson::<InsertManyRequest, _, _, _>(body.into_data_stream());
    Ok(ok(service.insert_many(messages).await?))
}

/// 查询
///
/// 响应体为 NDJSON，每行一个 `FindBatch`，每批最多 100 条结果。
#[utoipa::path(
    post,
    path = "/api/connections/{id}/find",
    tag = "documents",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = QueryRequest,
    responses(
        (status = 200, description = "结果批次", body = FindBatch, content_type = "application/x-ndjson"),
        (status = 404, description = "连接或集合未找到")
    )
)]
pub async fn find(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<QueryRequest>,
) -> Result<Response, RpcError> {
    let service = PersistenceService::new(state.registry);
    let batches = service.find(&id, req).await?;

    let lines = batches.map(|batch| -> AppResult<String> {
        let mut line = JsonCodec::encode(&batch?)?;
        line.push('\n');
        Ok(line)
    });
    Ok(([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/connections/{id}/find-one",
    tag = "documents",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = QueryRequest,
    responses(
        (status = 200, description = "第一条匹配文档", body = ApiResponse<FindOneResult>),
        (status = 404, description = "没有匹配的文档")
    )
)]
pub async fn find_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<FindOneResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.find_one(&id, req).await?))
}

#[utoipa::path(
    post,
    path = "/api/connections/{id}/update",
    tag = "documents",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = MutateRequest,
    responses((status = 200, description = "已更新", body = ApiResponse<BoolResult>))
)]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MutateRequest>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.update(&id, req).await?))
}

#[utoipa::path(
    post,
    path = "/api/connections/{id}/update-one",
    tag = "documents",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = MutateRequest,
    responses((status = 200, description = "已更新", body = ApiResponse<BoolResult>))
)]
pub async fn update_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MutateRequest>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.update_one(&id, req).await?))
}

#[utoipa::path(
    post,
    path = "/api/connections/{id}/replace-one",
    tag = "documents",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = MutateRequest,
    responses((status = 200, description = "已替换", body = ApiResponse<BoolResult>))
)]
pub async fn replace_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MutateRequest>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.replace_one(&id, req).await?))
}

#[utoipa::path(
    post,
    path = "/api/connections/{id}/delete",
    tag = "documents",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = FilterRequest,
    responses((status = 200, description = "已删除", body = ApiResponse<BoolResult>))
)]
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FilterRequest>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.delete(&id, req).await?))
}

#[utoipa::path(
    post,
    path = "/api/connections/{id}/delete-one",
    tag = "documents",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = FilterRequest,
    responses((status = 200, description = "已删除", body = ApiResponse<BoolResult>))
)]
pub async fn delete_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FilterRequest>,
) -> ApiResult<BoolResult> {
    let service = PersistenceService::new(state.registry);
    Ok(ok(service.delete_one(&id, req).await?))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        connections: state.registry.connection_count().await,
    })
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// 已注册的连接数（含未连通的）
    pub connections: usize,
}
