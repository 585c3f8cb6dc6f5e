//! 作业生命周期引擎
//!
//! 引擎独占作业表：所有状态迁移都经过内部唯一的变更路径，
//! 并发读取方（查询、统计）只拿到整条记录的克隆。
//! 每个已派发作业由独立的监督任务跟踪，慢作业不会阻塞新提交。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use gridpool_core::{EngineConfig, PoolError, PoolResult};
use gridpool_domain::entities::{
    Job, JobPayload, JobState, JobStats, PoolHealth, PoolStatus, SafetyVerdict,
    SelectionConstraints, ServiceHandle, ServiceSpec, WorkerInfo, WorkerRegistration,
};
use gridpool_domain::ports::{AgentClient, ExecOutcome, ServiceOrchestrator};
use gridpool_domain::registry::WorkerRegistry;
use metrics::counter;
use rand::Rng;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::analyzer::CodeSafetyAnalyzer;
use crate::selector::select_worker;

const JOB_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// 作业提交请求
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub payload: JobPayload,
    pub constraints: SelectionConstraints,
    /// 显式指定目标Worker时完全绕过选择器，可达性不做预校验
    pub explicit_worker: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// 引擎句柄可以低成本克隆：全部共享状态都在 `Arc` 之后，
/// 克隆体操作的是同一张作业表
#[derive(Clone)]
pub struct JobLifecycleEngine {
    registry: Arc<dyn WorkerRegistry>,
    agent: Arc<dyn AgentClient>,
    orchestrator: Arc<dyn ServiceOrchestrator>,
    analyzer: Arc<CodeSafetyAnalyzer>,
    config: EngineConfig,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    cancel_signals: Arc<RwLock<HashMap<String, broadcast::Sender<()>>>>,
}

impl JobLifecycleEngine {
    pub fn new(
        registry: Arc<dyn WorkerRegistry>,
        agent: Arc<dyn AgentClient>,
        orchestrator: Arc<dyn ServiceOrchestrator>,
        analyzer: CodeSafetyAnalyzer,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            agent,
            orchestrator,
            analyzer: Arc::new(analyzer),
            config,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            cancel_signals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // ==================== 提交与派发 ====================

    /// 提交作业。立即返回 Pending 记录，实际派发在独立任务中推进，
    /// 本方法只在登记新作业的短暂瞬间持有写锁
    pub async fn submit(&self, request: SubmitRequest) -> PoolResult<Job> {
        let timeout_seconds = request
            .timeout_seconds
            .unwrap_or(self.config.default_timeout_seconds);
        if timeout_seconds == 0 || timeout_seconds > self.config.max_timeout_seconds {
            return Err(PoolError::invalid_params(format!(
                "超时必须在 1..={} 秒之间",
                self.config.max_timeout_seconds
            )));
        }
        if let Some(command) = request.payload.exec_command() {
            if command.trim().is_empty() {
                return Err(PoolError::invalid_params("命令不能为空"));
            }
        }

        let job = {
            let mut jobs = self.jobs.write().await;
            let id = loop {
                let candidate = generate_job_id();
                if !jobs.contains_key(&candidate) {
                    break candidate;
                }
            };
            let job = Job::new(id.clone(), request.payload.clone(), timeout_seconds);
            jobs.insert(id.clone(), job.clone());
            job
        };

        let (cancel_tx, _) = broadcast::channel(1);
        self.cancel_signals
            .write()
            .await
            .insert(job.id.clone(), cancel_tx);

        info!("接受作业 {}", job.id);
        let engine = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            engine.drive(job_id, request).await;
        });

        Ok(job)
    }

    /// 单个作业的推进：分析 → 解析目标 → 派发 → 监督到终态
    async fn drive(&self, job_id: String, request: SubmitRequest) {
        // 安全分析只针对可分析载荷；拦截结论直接进入失败终态，目标Worker永远不会被解析
        if request.payload.is_analyzable() && self.analyzer.is_enabled() {
            if !self.transition(&job_id, JobState::Analyzing).await {
                return;
            }
            if let JobPayload::Code { code } = &request.payload {
                let verdict = self.analyzer.analyze(code);
                self.record_verdict(&job_id, verdict.clone()).await;
                if verdict.is_blocked() {
                    warn!("作业 {} 被安全分析拦截: {:?}", job_id, verdict.reasons);
                    self.fail_job(
                        &job_id,
                        format!("安全分析拦截: {}", verdict.reasons.join("; ")),
                    )
                    .await;
                    return;
                }
                if !verdict.reasons.is_empty() {
                    warn!("作业 {} 存在风险告警: {:?}", job_id, verdict.reasons);
                }
            }
        }

        if let JobPayload::Service(spec) = &request.payload {
            self.drive_service(&job_id, spec.clone()).await;
            return;
        }

        if !self.transition(&job_id, JobState::Resolving).await {
            return;
        }

        // 显式目标原样使用，不做可达性预校验；派发失败按普通失败路径处理
        let target = match &request.explicit_worker {
            Some(name) => name.clone(),
            None => {
                let snapshot = match self.registry.snapshot().await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        self.fail_job(&job_id, format!("读取注册表失败: {e}")).await;
                        return;
                    }
                };
                match select_worker(&snapshot, &request.constraints) {
                    Some(worker) => worker.name.clone(),
                    None => {
                        self.fail_job(&job_id, "没有可用的Worker".to_string()).await;
                        return;
                    }
                }
            }
        };
        self.record_target(&job_id, &target).await;

        let address = match self.registry.get(&target).await {
            Ok(Some(worker)) if !worker.address.is_empty() => worker.address,
            _ => {
                self.fail_job(&job_id, format!("派发失败: Worker {target} 不存在或没有可达地址"))
                    .await;
                return;
            }
        };

        let command = match request.payload.exec_command() {
            Some(command) => command.to_string(),
            None => return,
        };

        let timeout_seconds = {
            let jobs = self.jobs.read().await;
            match jobs.get(&job_id) {
                Some(job) => job.timeout_seconds,
                None => return,
            }
        };

        let mut cancel_rx = match self.cancel_signals.read().await.get(&job_id) {
            Some(tx) => tx.subscribe(),
            None => return,
        };

        if !self.transition(&job_id, JobState::Running).await {
            return;
        }

        let exec_timeout = Duration::from_secs(timeout_seconds);
        tokio::select! {
            outcome = self.agent.execute(&address, &command, exec_timeout) => {
                match outcome {
                    Ok(outcome) => self.complete_job(&job_id, outcome).await,
                    Err(e) => self.fail_job(&job_id, format!("派发失败: {e}")).await,
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(timeout_seconds)) => {
                self.timeout_job(&job_id, &target, &address).await;
            }
            _ = cancel_rx.recv() => {
                // 本地状态已由 cancel() 权威更新，这里只需停止监督
                debug!("作业 {} 的监督任务因取消退出", job_id);
            }
        }
    }

    /// 声明式服务路径：不解析单个Worker，放置决策完全交给编排层
    async fn drive_service(&self, job_id: &str, spec: ServiceSpec) {
        if !self.transition(job_id, JobState::Resolving).await {
            return;
        }

        let timeout_seconds = {
            let jobs = self.jobs.read().await;
            match jobs.get(job_id) {
                Some(job) => job.timeout_seconds,
                None => return,
            }
        };

        let mut cancel_rx = match self.cancel_signals.read().await.get(job_id) {
            Some(tx) => tx.subscribe(),
            None => return,
        };

        if !self.transition(job_id, JobState::Running).await {
            return;
        }

        tokio::select! {
            result = self.orchestrator.submit_service(job_id, &spec) => {
                match result {
                    Ok(handle) => self.complete_service_job(job_id, handle).await,
                    Err(e) => self.fail_job(job_id, format!("编排提交失败: {e}")).await,
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(timeout_seconds)) => {
                self.mark_timed_out(job_id).await;
            }
            _ = cancel_rx.recv() => {
                debug!("服务作业 {} 的监督任务因取消退出", job_id);
            }
        }
    }

    // ==================== 查询与控制 ====================

    pub async fn get(&self, job_id: &str) -> PoolResult<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| PoolError::job_not_found(job_id))
    }

    pub async fn list(&self) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<Job> = jobs.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// 取消作业。本地状态立即权威更新；远端信号尽力而为，
    /// 不等待对端确认（对端可能根本不应答）。
    /// 已处于终态的作业按无操作处理，原样返回现有记录
    pub async fn cancel(&self, job_id: &str) -> PoolResult<Job> {
        let (job, was_dispatched) = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| PoolError::job_not_found(job_id))?;

            if job.is_finished() {
                info!("作业 {} 已处于终态 {}，取消为无操作", job_id, job.state.as_str());
                return Ok(job.clone());
            }

            let was_dispatched = job.state == JobState::Running;
            job.update_state(JobState::Cancelled);
            counter!("gridpool_jobs_total", "state" => "cancelled").increment(1);
            (job.clone(), was_dispatched)
        };

        if let Some(tx) = self.cancel_signals.read().await.get(job_id) {
            let _ = tx.send(());
        }

        if was_dispatched {
            if let Some(target) = job.target_worker.clone() {
                self.spawn_remote_cancel(target, job_id.to_string());
            }
        }

        info!("作业 {} 已取消", job_id);
        Ok(job)
    }

    /// 注销Worker：移除注册表记录，并把仍指向它的未完结作业排空到取消终态
    pub async fn deregister_worker(&self, name: &str) -> PoolResult<bool> {
        let removed = self.registry.remove(name).await?;

        let drained = {
            let mut jobs = self.jobs.write().await;
            let mut drained = Vec::new();
            for job in jobs.values_mut() {
                if job.target_worker.as_deref() == Some(name) && !job.is_finished() {
                    job.update_state(JobState::Cancelled);
                    job.failure_reason = Some(format!("Worker {name} 已注销"));
                    counter!("gridpool_jobs_total", "state" => "cancelled").increment(1);
                    drained.push(job.id.clone());
                }
            }
            drained
        };

        for job_id in &drained {
            if let Some(tx) = self.cancel_signals.read().await.get(job_id) {
                let _ = tx.send(());
            }
        }

        if !drained.is_empty() {
            info!("注销Worker {} 时排空了 {} 个作业", name, drained.len());
        }
        Ok(removed)
    }

    /// 在多个Worker上执行同一命令，每个目标各建一个显式作业
    pub async fn submit_batch(
        &self,
        command: String,
        workers: Vec<String>,
        timeout_seconds: Option<u64>,
    ) -> PoolResult<Vec<Job>> {
        let targets = if workers.len() == 1 && workers[0] == "all" {
            let snapshot = self.registry.snapshot().await?;
            snapshot.into_iter().map(|w| w.name).collect()
        } else {
            workers
        };

        if targets.is_empty() {
            return Err(PoolError::invalid_params("未指定目标Worker"));
        }

        let mut jobs = Vec::with_capacity(targets.len());
        for target in targets {
            let job = self
                .submit(SubmitRequest {
                    payload: JobPayload::Command {
                        command: command.clone(),
                    },
                    constraints: SelectionConstraints::default(),
                    explicit_worker: Some(target),
                    timeout_seconds,
                })
                .await?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    pub async fn register_worker(&self, registration: WorkerRegistration) -> PoolResult<WorkerInfo> {
        if registration.name.trim().is_empty() || registration.address.trim().is_empty() {
            return Err(PoolError::invalid_params("Worker名字与地址不能为空"));
        }
        self.registry.register(registration).await
    }

    /// 池状态汇总：快照计数加推荐Worker（推荐与快照同源，结果一致）
    pub async fn pool_status(&self) -> PoolResult<PoolStatus> {
        let snapshot = self.registry.snapshot().await?;
        let online = snapshot.iter().filter(|w| w.is_online()).count();
        let recommended_worker =
            select_worker(&snapshot, &SelectionConstraints::default()).map(|w| w.name.clone());

        Ok(PoolStatus {
            total_workers: snapshot.len(),
            online_workers: online,
            offline_workers: snapshot.len() - online,
            workers: snapshot.into_iter().map(|w| (w.name.clone(), w)).collect(),
            recommended_worker,
        })
    }

    pub async fn pool_health(&self) -> PoolResult<PoolHealth> {
        let snapshot = self.registry.snapshot().await?;
        let total = snapshot.len();
        let online_names = snapshot
            .into_iter()
            .filter(|w| w.is_online())
            .map(|w| w.name)
            .collect();
        Ok(PoolHealth::evaluate(online_names, total))
    }

    pub async fn stats(&self) -> JobStats {
        let jobs = self.jobs.read().await;
        let mut by_state: HashMap<String, usize> = HashMap::new();
        let mut by_worker: HashMap<String, usize> = HashMap::new();
        let mut running = 0;
        let mut durations_ms = Vec::new();

        for job in jobs.values() {
            *by_state.entry(job.state.as_str().to_string()).or_insert(0) += 1;
            if let Some(worker) = &job.target_worker {
                *by_worker.entry(worker.clone()).or_insert(0) += 1;
            }
            if job.state == JobState::Running {
                running += 1;
            }
            if let Some(ms) = job.execution_duration_ms() {
                durations_ms.push(ms);
            }
        }

        let avg_execution_seconds = if durations_ms.is_empty() {
            0.0
        } else {
            durations_ms.iter().sum::<i64>() as f64 / durations_ms.len() as f64 / 1000.0
        };

        JobStats {
            total_jobs: jobs.len(),
            running_jobs: running,
            by_state,
            by_worker,
            avg_execution_seconds,
        }
    }

    /// 清理超过保留期限的终态作业，返回清理数量
    pub async fn cleanup_finished(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::hours(self.config.retain_finished_hours);
        let removed: Vec<String> = {
            let mut jobs = self.jobs.write().await;
            let expired: Vec<String> = jobs
                .values()
                .filter(|j| j.is_finished() && j.ended_at.map_or(false, |t| t < cutoff))
                .map(|j| j.id.clone())
                .collect();
            for id in &expired {
                jobs.remove(id);
            }
            expired
        };

        let mut signals = self.cancel_signals.write().await;
        for id in &removed {
            signals.remove(id);
        }

        if !removed.is_empty() {
            info!("清理了 {} 个过期的终态作业", removed.len());
        }
        removed.len()
    }

    // ==================== 内部状态变更 ====================

    /// 状态迁移的唯一入口；作业已进入终态或不存在时返回 false
    async fn transition(&self, job_id: &str, state: JobState) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(job_id) {
            Some(job) => {
                let moved = job.update_state(state);
                if moved {
                    debug!("作业 {} 状态: {}", job_id, state.as_str());
                }
                moved
            }
            None => false,
        }
    }

    async fn record_target(&self, job_id: &str, target: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.target_worker = Some(target.to_string());
        }
    }

    async fn record_verdict(&self, job_id: &str, verdict: SafetyVerdict) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.verdict = Some(verdict);
        }
    }

    async fn complete_job(&self, job_id: &str, outcome: ExecOutcome) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            let state = if outcome.exit_code == 0 {
                JobState::Succeeded
            } else {
                JobState::Failed
            };
            if job.update_state(state) {
                job.exit_code = Some(outcome.exit_code);
                job.stdout = Some(outcome.stdout);
                job.stderr = Some(outcome.stderr);
                if state == JobState::Failed {
                    job.failure_reason = Some(format!("退出码非零: {}", outcome.exit_code));
                    counter!("gridpool_jobs_total", "state" => "failed").increment(1);
                } else {
                    counter!("gridpool_jobs_total", "state" => "succeeded").increment(1);
                }
                info!("作业 {} 完成，退出码 {}", job_id, outcome.exit_code);
            }
        }
    }

    async fn complete_service_job(&self, job_id: &str, handle: ServiceHandle) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            if job.update_state(JobState::Succeeded) {
                job.service_handle = Some(handle);
                counter!("gridpool_jobs_total", "state" => "succeeded").increment(1);
                info!("服务作业 {} 已被编排层接受", job_id);
            }
        }
    }

    async fn fail_job(&self, job_id: &str, reason: String) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            if job.update_state(JobState::Failed) {
                job.failure_reason = Some(reason.clone());
                counter!("gridpool_jobs_total", "state" => "failed").increment(1);
                warn!("作业 {} 失败: {}", job_id, reason);
            }
        }
    }

    async fn mark_timed_out(&self, job_id: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            if job.update_state(JobState::TimedOut) {
                job.failure_reason = Some(format!("执行超过 {} 秒", job.timeout_seconds));
                counter!("gridpool_jobs_total", "state" => "timed_out").increment(1);
                warn!("作业 {} 超时", job_id);
            }
        }
    }

    /// 超时：先权威更新本地状态，再向目标Worker发出尽力而为的取消
    async fn timeout_job(&self, job_id: &str, target: &str, address: &str) {
        self.mark_timed_out(job_id).await;
        self.spawn_remote_cancel_to(address.to_string(), job_id.to_string());
        debug!("已向Worker {} 发出作业 {} 的取消请求", target, job_id);
    }

    fn spawn_remote_cancel(&self, target: String, job_id: String) {
        let registry = Arc::clone(&self.registry);
        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move {
            if let Ok(Some(worker)) = registry.get(&target).await {
                if !worker.address.is_empty() {
                    let _ = agent.cancel(&worker.address, &job_id).await;
                }
            }
        });
    }

    fn spawn_remote_cancel_to(&self, address: String, job_id: String) {
        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move {
            // 发出即认为尽了义务，远端不保证应答
            let _ = agent.cancel(&address, &job_id).await;
        });
    }
}

fn generate_job_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| {
            let idx = rng.random_range(0..JOB_ID_CHARS.len());
            JOB_ID_CHARS[idx] as char
        })
        .collect();
    format!("job-{suffix}")
}
