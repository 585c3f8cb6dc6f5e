use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use gridpool_core::PoolError;
use gridpool_domain::entities::{WorkerInfo, WorkerRegistration};
use gridpool_domain::registry::WorkerRegistry;

use crate::error::ApiResult;
use crate::response::{created, success};
use crate::routes::AppState;

#[derive(Debug, Serialize)]
pub struct WorkerListResponse {
    pub workers: Vec<WorkerInfo>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub name: String,
    pub online: bool,
}

/// 登记Worker
pub async fn register_worker(
    State(state): State<AppState>,
    Json(registration): Json<WorkerRegistration>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let worker = state.engine.register_worker(registration).await?;
    Ok(created(worker))
}

/// Worker列表（已应用过期规则的快照）
pub async fn list_workers(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let mut workers = state.registry.snapshot().await?;
    workers.sort_by(|a, b| a.name.cmp(&b.name));
    let count = workers.len();
    Ok(success(WorkerListResponse { workers, count }))
}

/// 单个Worker信息
pub async fn get_worker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let worker = state
        .registry
        .get(&name)
        .await?
        .ok_or_else(|| PoolError::worker_not_found(&name))?;
    Ok(success(worker))
}

/// 注销Worker，排空仍指向它的作业
pub async fn deregister_worker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let removed = state.engine.deregister_worker(&name).await?;
    if !removed {
        return Err(PoolError::worker_not_found(&name).into());
    }
    Ok(success(serde_json::json!({ "name": name, "removed": true })))
}

/// 按需探测单个Worker的代理
pub async fn ping_worker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let online = state.prober.probe_worker(&name).await?;
    Ok(success(PingResponse { name, online }))
}
