//! 健康探测
//!
//! 周期性向每个已登记Worker的代理拉取存活与遥测信息，保持注册表近似新鲜。
//! 探测失败从不回写注册表：离线判定统一由快照的过期规则给出，
//! 避免"慢而活着的Worker"与探测超时之间的竞态。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use gridpool_core::{PoolError, PoolResult, ProberConfig};
use gridpool_domain::entities::WorkerTelemetry;
use gridpool_domain::ports::AgentClient;
use gridpool_domain::registry::WorkerRegistry;
use metrics::counter;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

pub struct HealthProber {
    registry: Arc<dyn WorkerRegistry>,
    agent: Arc<dyn AgentClient>,
    config: ProberConfig,
    /// 每个Worker累计的探测失败次数，仅用于可观测性
    probe_errors: Arc<RwLock<HashMap<String, u64>>>,
}

impl HealthProber {
    pub fn new(
        registry: Arc<dyn WorkerRegistry>,
        agent: Arc<dyn AgentClient>,
        config: ProberConfig,
    ) -> Self {
        Self {
            registry,
            agent,
            config,
            probe_errors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 探测主循环，收到关闭信号后退出
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "启动健康探测循环，间隔 {}s，单次超时 {}s",
            self.config.probe_interval_seconds, self.config.probe_timeout_seconds
        );

        let mut tick = interval(Duration::from_secs(self.config.probe_interval_seconds));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.probe_all().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，退出健康探测循环");
                    break;
                }
            }
        }
    }

    /// 对所有已登记Worker做一轮并发探测。
    /// 单个Worker的失败只计数，绝不阻塞或影响其它Worker的探测。
    pub async fn probe_all(&self) {
        let workers = match self.registry.snapshot().await {
            Ok(workers) => workers,
            Err(e) => {
                error!("读取注册表快照失败: {e}");
                return;
            }
        };

        if workers.is_empty() {
            return;
        }

        let sweeps = workers
            .iter()
            .map(|w| self.probe_one(w.name.clone(), w.address.clone()));
        join_all(sweeps).await;
    }

    async fn probe_one(&self, name: String, address: String) {
        if address.is_empty() {
            self.record_probe_error(&name, "地址为空").await;
            return;
        }

        let timeout = Duration::from_secs(self.config.probe_timeout_seconds);
        match tokio::time::timeout(timeout, self.agent.fetch_status(&address)).await {
            Ok(Ok(status)) => {
                let telemetry = WorkerTelemetry {
                    cpu_percent: status.cpu_percent,
                    memory_percent: status.memory_percent,
                    gpu_count: status.gpu_count,
                    collected_at: Utc::now(),
                };
                if let Err(e) = self.registry.upsert_telemetry(&name, telemetry).await {
                    error!("写入Worker {name} 遥测失败: {e}");
                    return;
                }
                debug!(
                    "Worker {} 遥测更新: cpu={:.1}% mem={:.1}%",
                    name, status.cpu_percent, status.memory_percent
                );
            }
            Ok(Err(e)) => {
                self.record_probe_error(&name, &e.to_string()).await;
            }
            Err(_) => {
                self.record_probe_error(&name, "探测超时").await;
            }
        }
    }

    /// 探测失败被就地吸收：只留下计数，不向上抛出，也不改写注册表
    async fn record_probe_error(&self, name: &str, reason: &str) {
        warn!("探测Worker {name} 失败: {reason}");
        counter!("gridpool_probe_errors_total", "worker" => name.to_string()).increment(1);
        let mut errors = self.probe_errors.write().await;
        *errors.entry(name.to_string()).or_insert(0) += 1;
    }

    /// 按需探测单个Worker的存活状态
    pub async fn probe_worker(&self, name: &str) -> PoolResult<bool> {
        let worker = self
            .registry
            .get(name)
            .await?
            .ok_or_else(|| PoolError::worker_not_found(name))?;

        if worker.address.is_empty() {
            return Ok(false);
        }

        let timeout = Duration::from_secs(self.config.probe_timeout_seconds);
        match tokio::time::timeout(timeout, self.agent.ping(&worker.address)).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) | Err(_) => Ok(false),
        }
    }

    pub async fn error_counts(&self) -> HashMap<String, u64> {
        self.probe_errors.read().await.clone()
    }
}
