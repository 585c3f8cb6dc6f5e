//! 外部协作方端口
//!
//! 遵循依赖倒置：核心只依赖这两个抽象，网络实现放在 infrastructure。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::{ServiceHandle, ServiceSpec};
use gridpool_core::PoolResult;

/// Worker代理上报的即时状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    #[serde(default)]
    pub gpu_count: u32,
}

/// 一次远程执行的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Worker代理客户端：GET /ping、GET /status、POST /exec、POST /cancel
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// 存活探测
    async fn ping(&self, address: &str) -> PoolResult<()>;

    /// 拉取遥测
    async fn fetch_status(&self, address: &str) -> PoolResult<AgentStatus>;

    /// 执行命令并等待结果，超时由调用方给定
    async fn execute(
        &self,
        address: &str,
        command: &str,
        timeout: Duration,
    ) -> PoolResult<ExecOutcome>;

    /// 尽力而为的取消信号；对端不保证应答
    async fn cancel(&self, address: &str, job_id: &str) -> PoolResult<()>;
}

/// 服务编排协作方：提交声明式服务规格，换取放置句柄
#[async_trait]
pub trait ServiceOrchestrator: Send + Sync {
    async fn submit_service(&self, job_id: &str, spec: &ServiceSpec) -> PoolResult<ServiceHandle>;

    async fn remove_service(&self, handle: &ServiceHandle) -> PoolResult<()>;
}
