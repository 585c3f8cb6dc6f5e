use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gridpool_core::PoolError;
use serde_json::json;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("池错误: {0}")]
    Pool(#[from] PoolError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_type) = match &self {
            ApiError::Pool(PoolError::WorkerNotFound { name }) => (
                StatusCode::NOT_FOUND,
                format!("Worker {name} 不存在"),
                "WORKER_NOT_FOUND",
            ),
            ApiError::Pool(PoolError::JobNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("作业 {id} 不存在"),
                "JOB_NOT_FOUND",
            ),
            ApiError::Pool(PoolError::NoCandidateWorker) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "没有满足约束的可用Worker".to_string(),
                "NO_CANDIDATE_WORKER",
            ),
            ApiError::Pool(PoolError::InvalidJobParams(msg)) => (
                StatusCode::BAD_REQUEST,
                format!("作业参数无效: {msg}"),
                "INVALID_JOB_PARAMS",
            ),
            ApiError::Pool(PoolError::Blocked { reasons }) => (
                StatusCode::BAD_REQUEST,
                format!("代码被安全分析拦截: {}", reasons.join("; ")),
                "BLOCKED_BY_ANALYZER",
            ),
            ApiError::Pool(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                "INTERNAL_ERROR",
            ),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "BAD_REQUEST")
            }
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
            "error_type": error_type,
            "timestamp": chrono::Utc::now(),
        }));

        (status, body).into_response()
    }
}
