//! 内存Worker注册表
//!
//! 单写语义：所有写入都在整条记录粒度上完成，读取方不会看到
//! 写了一半的记录。快照在读取时应用过期规则，过期Worker一律
//! 报告为离线，存储值是什么无关紧要。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use gridpool_core::PoolResult;
use gridpool_domain::entities::{WorkerInfo, WorkerRegistration, WorkerStatus, WorkerTelemetry};
use gridpool_domain::registry::WorkerRegistry;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct MemoryWorkerRegistry {
    workers: RwLock<HashMap<String, WorkerInfo>>,
    staleness_seconds: i64,
}

impl MemoryWorkerRegistry {
    pub fn new(staleness_seconds: i64) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            staleness_seconds,
        }
    }

    /// 过期即离线，覆盖任何缓存的在线读数
    fn apply_staleness(&self, mut worker: WorkerInfo) -> WorkerInfo {
        if worker.is_stale(self.staleness_seconds, Utc::now()) {
            worker.status = WorkerStatus::Offline;
        }
        worker
    }
}

#[async_trait]
impl WorkerRegistry for MemoryWorkerRegistry {
    async fn register(&self, registration: WorkerRegistration) -> PoolResult<WorkerInfo> {
        let worker = WorkerInfo::new(registration);
        let mut workers = self.workers.write().await;
        info!("登记Worker: {} ({})", worker.name, worker.address);
        workers.insert(worker.name.clone(), worker.clone());
        Ok(worker)
    }

    async fn upsert_telemetry(&self, name: &str, telemetry: WorkerTelemetry) -> PoolResult<()> {
        let mut workers = self.workers.write().await;
        match workers.get_mut(name) {
            Some(worker) => {
                worker.apply_telemetry(telemetry);
            }
            None => {
                // 未登记的名字也接受：插入一条没有地址的最小记录
                debug!("为未登记的Worker {name} 创建遥测记录");
                let mut worker = WorkerInfo::new(WorkerRegistration {
                    name: name.to_string(),
                    address: String::new(),
                    cpu_count: 0,
                    memory_gb: 0,
                    gpu_count: 0,
                });
                worker.apply_telemetry(telemetry);
                workers.insert(name.to_string(), worker);
            }
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> PoolResult<Option<WorkerInfo>> {
        let workers = self.workers.read().await;
        Ok(workers.get(name).cloned().map(|w| self.apply_staleness(w)))
    }

    async fn snapshot(&self) -> PoolResult<Vec<WorkerInfo>> {
        let workers = self.workers.read().await;
        Ok(workers
            .values()
            .cloned()
            .map(|w| self.apply_staleness(w))
            .collect())
    }

    async fn remove(&self, name: &str) -> PoolResult<bool> {
        let mut workers = self.workers.write().await;
        let existed = workers.remove(name).is_some();
        if existed {
            info!("移除Worker: {name}");
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn registration(name: &str) -> WorkerRegistration {
        WorkerRegistration {
            name: name.to_string(),
            address: format!("{name}:7576"),
            cpu_count: 4,
            memory_gb: 8,
            gpu_count: 1,
        }
    }

    fn telemetry(collected_at: chrono::DateTime<Utc>) -> WorkerTelemetry {
        WorkerTelemetry {
            cpu_percent: 20.0,
            memory_percent: 30.0,
            gpu_count: 1,
            collected_at,
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = MemoryWorkerRegistry::new(30);
        registry.register(registration("w1")).await.unwrap();
        let worker = registry.get("w1").await.unwrap().unwrap();
        assert_eq!(worker.name, "w1");
        assert_eq!(worker.address, "w1:7576");
        // 登记后尚未收到遥测，处于离线
        assert!(!worker.is_online());
    }

    #[tokio::test]
    async fn test_upsert_marks_online() {
        let registry = MemoryWorkerRegistry::new(30);
        registry.register(registration("w1")).await.unwrap();
        registry
            .upsert_telemetry("w1", telemetry(Utc::now()))
            .await
            .unwrap();
        let worker = registry.get("w1").await.unwrap().unwrap();
        assert!(worker.is_online());
        assert!((worker.cpu_percent - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_upsert_unknown_name_inserts() {
        let registry = MemoryWorkerRegistry::new(30);
        registry
            .upsert_telemetry("ghost", telemetry(Utc::now()))
            .await
            .unwrap();
        let worker = registry.get("ghost").await.unwrap().unwrap();
        assert!(worker.is_online());
        assert!(worker.address.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_applies_staleness() {
        let registry = MemoryWorkerRegistry::new(30);
        registry.register(registration("fresh")).await.unwrap();
        registry.register(registration("stale")).await.unwrap();

        registry
            .upsert_telemetry("fresh", telemetry(Utc::now()))
            .await
            .unwrap();
        // 存储的状态是在线，但遥测早已过期
        registry
            .upsert_telemetry("stale", telemetry(Utc::now() - Duration::seconds(60)))
            .await
            .unwrap();

        let snapshot = registry.snapshot().await.unwrap();
        let by_name: std::collections::HashMap<_, _> =
            snapshot.into_iter().map(|w| (w.name.clone(), w)).collect();
        assert!(by_name["fresh"].is_online());
        // 过期覆盖缓存的在线读数
        assert!(!by_name["stale"].is_online());
    }

    #[tokio::test]
    async fn test_staleness_boundary() {
        let registry = MemoryWorkerRegistry::new(30);
        registry.register(registration("w1")).await.unwrap();
        registry
            .upsert_telemetry("w1", telemetry(Utc::now() - Duration::seconds(29)))
            .await
            .unwrap();
        assert!(registry.get("w1").await.unwrap().unwrap().is_online());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = MemoryWorkerRegistry::new(30);
        registry.register(registration("w1")).await.unwrap();
        assert!(registry.remove("w1").await.unwrap());
        assert!(!registry.remove("w1").await.unwrap());
        assert!(registry.get("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_overwrites_same_name() {
        let registry = MemoryWorkerRegistry::new(30);
        registry.register(registration("w1")).await.unwrap();
        let mut updated = registration("w1");
        updated.address = "new-host:7576".to_string();
        registry.register(updated).await.unwrap();
        let worker = registry.get("w1").await.unwrap().unwrap();
        assert_eq!(worker.address, "new-host:7576");
    }
}
