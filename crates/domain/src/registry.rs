//! Worker注册表抽象
//!
//! 注册表是唯一的Worker共享可变状态，所有写入经由本接口，
//! 读取方通过 `snapshot` 获得已应用过期规则的不可变副本。

use async_trait::async_trait;

use crate::entities::{WorkerInfo, WorkerRegistration, WorkerTelemetry};
use gridpool_core::PoolResult;

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// 登记一个新Worker；同名登记覆盖旧记录
    async fn register(&self, registration: WorkerRegistration) -> PoolResult<WorkerInfo>;

    /// 写入遥测并刷新 last_seen；名字未知时插入新记录，永不失败
    async fn upsert_telemetry(&self, name: &str, telemetry: WorkerTelemetry) -> PoolResult<()>;

    /// 按名字查询，已应用过期规则
    async fn get(&self, name: &str) -> PoolResult<Option<WorkerInfo>>;

    /// 全量时点快照。过期的Worker在快照中一律报告为离线，
    /// 调用方无需自行检查时间
    async fn snapshot(&self) -> PoolResult<Vec<WorkerInfo>>;

    /// 删除记录；幂等，返回删除前是否存在
    async fn remove(&self, name: &str) -> PoolResult<bool>;
}
