use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use gridpool_dispatcher::{HealthProber, JobLifecycleEngine};
use gridpool_domain::registry::WorkerRegistry;

use crate::handlers::{
    jobs::{batch_exec, cancel_job, get_job, job_stats, list_jobs, submit_job},
    pool::{pool_health, pool_status, probe_errors},
    workers::{deregister_worker, get_worker, list_workers, ping_worker, register_worker},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<JobLifecycleEngine>,
    pub registry: Arc<dyn WorkerRegistry>,
    pub prober: Arc<HealthProber>,
}

/// 创建API路由
pub fn create_routes(state: AppState, cors_enabled: bool) -> Router {
    let mut router = Router::new()
        // Worker管理API
        .route("/api/workers", get(list_workers).post(register_worker))
        .route("/api/workers/{name}", get(get_worker).delete(deregister_worker))
        .route("/api/workers/{name}/ping", get(ping_worker))
        // 作业API
        .route("/api/jobs", get(list_jobs).post(submit_job))
        .route("/api/jobs/stats", get(job_stats))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .route("/api/exec/batch", post(batch_exec))
        // 池状态API
        .route("/api/pool/status", get(pool_status))
        .route("/api/pool/health", get(pool_health))
        .route("/api/pool/probe-errors", get(probe_errors))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }
    router
}
