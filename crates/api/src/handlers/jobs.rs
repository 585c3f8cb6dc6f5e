use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use gridpool_dispatcher::SubmitRequest;
use gridpool_domain::entities::{Job, JobPayload, SelectionConstraints, ServiceSpec};

use crate::error::{ApiError, ApiResult};
use crate::response::{created, success};
use crate::routes::AppState;

/// 作业提交请求体。command / code / service 三选一
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub service: Option<ServiceSpec>,
    /// 显式指定目标Worker；缺省时自动选择
    #[serde(default)]
    pub worker: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub min_gpus: u32,
    #[serde(default)]
    pub max_memory_percent: Option<f64>,
}

impl SubmitJobRequest {
    fn into_submit_request(self) -> Result<SubmitRequest, ApiError> {
        let payload = match (self.command, self.code, self.service) {
            (Some(command), None, None) => JobPayload::Command { command },
            (None, Some(code), None) => JobPayload::Code { code },
            (None, None, Some(service)) => JobPayload::Service(service),
            _ => {
                return Err(ApiError::BadRequest(
                    "command、code、service 必须且只能提供一个".to_string(),
                ))
            }
        };

        Ok(SubmitRequest {
            payload,
            constraints: SelectionConstraints {
                min_gpus: self.min_gpus,
                max_memory_percent: self.max_memory_percent,
            },
            explicit_worker: self.worker,
            timeout_seconds: self.timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchExecRequest {
    /// Worker名字列表，或 ["all"] 表示全部
    pub workers: Vec<String>,
    pub command: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub count: usize,
}

/// 提交作业，立即返回 Pending 记录
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let request = request.into_submit_request()?;
    let job = state.engine.submit(request).await?;
    Ok(created(job))
}

pub async fn list_jobs(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let jobs = state.engine.list().await;
    let count = jobs.len();
    Ok(success(JobListResponse { jobs, count }))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let job = state.engine.get(&id).await?;
    Ok(success(job))
}

/// 取消作业；终态作业原样返回，不报错
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let job = state.engine.cancel(&id).await?;
    Ok(success(job))
}

pub async fn job_stats(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.engine.stats().await))
}

/// 在多个Worker上执行同一命令
pub async fn batch_exec(
    State(state): State<AppState>,
    Json(request): Json<BatchExecRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let jobs = state
        .engine
        .submit_batch(request.command, request.workers, request.timeout)
        .await?;
    let count = jobs.len();
    Ok(created(JobListResponse { jobs, count }))
}
