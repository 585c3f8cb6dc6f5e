//! 测试用的Mock协作方与数据构造器
//!
//! 不依赖真实网络或编排层的内存实现，行为按地址脚本化，
//! 供本crate及上层的组件测试使用。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gridpool_core::{PoolError, PoolResult};
use gridpool_domain::entities::{
    ServiceHandle, ServiceSpec, WorkerInfo, WorkerRegistration, WorkerStatus,
};
use gridpool_domain::ports::{AgentClient, AgentStatus, ExecOutcome, ServiceOrchestrator};

/// 按地址脚本化行为的Mock代理客户端
#[derive(Clone, Default)]
pub struct MockAgentClient {
    statuses: Arc<Mutex<HashMap<String, AgentStatus>>>,
    exec_outcomes: Arc<Mutex<HashMap<String, ExecOutcome>>>,
    /// 这些地址上的所有调用都返回网络错误
    failing: Arc<Mutex<HashSet<String>>>,
    /// 这些地址上的 execute 永不返回（模拟失控作业）
    hanging: Arc<Mutex<HashSet<String>>>,
    exec_calls: Arc<Mutex<Vec<(String, String)>>>,
    cancel_calls: Arc<Mutex<Vec<(String, String)>>>,
    status_calls: Arc<Mutex<Vec<String>>>,
}

impl MockAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, address: &str, cpu_percent: f64, memory_percent: f64, gpu_count: u32) {
        self.statuses.lock().unwrap().insert(
            address.to_string(),
            AgentStatus {
                cpu_percent,
                memory_percent,
                gpu_count,
            },
        );
    }

    pub fn set_exec_outcome(&self, address: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.exec_outcomes.lock().unwrap().insert(
            address.to_string(),
            ExecOutcome {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn fail_address(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn hang_address(&self, address: &str) {
        self.hanging.lock().unwrap().insert(address.to_string());
    }

    pub fn exec_calls(&self) -> Vec<(String, String)> {
        self.exec_calls.lock().unwrap().clone()
    }

    pub fn cancel_calls(&self) -> Vec<(String, String)> {
        self.cancel_calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().unwrap().clone()
    }

    fn is_failing(&self, address: &str) -> bool {
        self.failing.lock().unwrap().contains(address)
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn ping(&self, address: &str) -> PoolResult<()> {
        if self.is_failing(address) {
            return Err(PoolError::Network(format!("无法连接 {address}")));
        }
        Ok(())
    }

    async fn fetch_status(&self, address: &str) -> PoolResult<AgentStatus> {
        self.status_calls.lock().unwrap().push(address.to_string());
        if self.is_failing(address) {
            return Err(PoolError::Network(format!("无法连接 {address}")));
        }
        self.statuses
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| PoolError::Network(format!("{address} 无状态应答")))
    }

    async fn execute(
        &self,
        address: &str,
        command: &str,
        _timeout: Duration,
    ) -> PoolResult<ExecOutcome> {
        self.exec_calls
            .lock()
            .unwrap()
            .push((address.to_string(), command.to_string()));
        if self.hanging.lock().unwrap().contains(address) {
            std::future::pending::<()>().await;
        }
        if self.is_failing(address) {
            return Err(PoolError::Network(format!("无法连接 {address}")));
        }
        self.exec_outcomes
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| PoolError::Network(format!("{address} 无执行应答")))
    }

    async fn cancel(&self, address: &str, job_id: &str) -> PoolResult<()> {
        self.cancel_calls
            .lock()
            .unwrap()
            .push((address.to_string(), job_id.to_string()));
        Ok(())
    }
}

/// 记录提交请求的Mock编排层
#[derive(Clone, Default)]
pub struct MockOrchestrator {
    fail_submit: Arc<Mutex<bool>>,
    submitted: Arc<Mutex<Vec<(String, ServiceSpec)>>>,
    removed: Arc<Mutex<Vec<String>>>,
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_submit(&self) {
        *self.fail_submit.lock().unwrap() = true;
    }

    pub fn submitted(&self) -> Vec<(String, ServiceSpec)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceOrchestrator for MockOrchestrator {
    async fn submit_service(&self, job_id: &str, spec: &ServiceSpec) -> PoolResult<ServiceHandle> {
        if *self.fail_submit.lock().unwrap() {
            return Err(PoolError::Orchestrator("编排层不可用".to_string()));
        }
        self.submitted
            .lock()
            .unwrap()
            .push((job_id.to_string(), spec.clone()));
        Ok(ServiceHandle {
            service_id: format!("svc-{job_id}"),
            service_name: format!("gridpool-{job_id}"),
        })
    }

    async fn remove_service(&self, handle: &ServiceHandle) -> PoolResult<()> {
        self.removed
            .lock()
            .unwrap()
            .push(handle.service_id.clone());
        Ok(())
    }
}

/// 测试Worker记录构造器
pub struct WorkerInfoBuilder {
    worker: WorkerInfo,
}

impl WorkerInfoBuilder {
    pub fn new(name: &str) -> Self {
        let mut worker = WorkerInfo::new(WorkerRegistration {
            name: name.to_string(),
            address: format!("{name}.internal:7576"),
            cpu_count: 8,
            memory_gb: 16,
            gpu_count: 0,
        });
        worker.status = WorkerStatus::Online;
        worker.last_seen = Utc::now();
        Self { worker }
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.worker.address = address.to_string();
        self
    }

    pub fn with_load(mut self, cpu_percent: f64, memory_percent: f64) -> Self {
        self.worker.cpu_percent = cpu_percent;
        self.worker.memory_percent = memory_percent;
        self
    }

    pub fn with_gpus(mut self, gpu_count: u32) -> Self {
        self.worker.gpu_count = gpu_count;
        self
    }

    pub fn offline(mut self) -> Self {
        self.worker.status = WorkerStatus::Offline;
        self
    }

    pub fn build(self) -> WorkerInfo {
        self.worker
    }
}

impl Default for WorkerInfoBuilder {
    fn default() -> Self {
        Self::new("test-worker")
    }
}
