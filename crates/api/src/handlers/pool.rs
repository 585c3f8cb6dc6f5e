use axum::extract::State;

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;

/// 池状态汇总：逐Worker快照加推荐Worker
pub async fn pool_status(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let status = state.engine.pool_status().await?;
    Ok(success(status))
}

/// 池整体健康评估
pub async fn pool_health(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let health = state.engine.pool_health().await?;
    Ok(success(health))
}

/// 每个Worker累计的探测失败计数
pub async fn probe_errors(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.prober.error_counts().await))
}
