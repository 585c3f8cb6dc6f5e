use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker节点信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub name: String,
    /// 可达地址（host:port），由网络层保证已认证可达
    pub address: String,
    pub cpu_count: u32,
    pub memory_gb: u32,
    pub gpu_count: u32,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub status: WorkerStatus,
    pub last_seen: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerStatus {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "OFFLINE")]
    Offline,
}

/// Worker注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub cpu_count: u32,
    #[serde(default)]
    pub memory_gb: u32,
    #[serde(default)]
    pub gpu_count: u32,
}

/// 一次探测上报的遥测数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTelemetry {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub gpu_count: u32,
    pub collected_at: DateTime<Utc>,
}

impl WorkerInfo {
    /// 根据注册请求创建新的Worker记录
    pub fn new(registration: WorkerRegistration) -> Self {
        let now = Utc::now();
        Self {
            name: registration.name,
            address: registration.address,
            cpu_count: registration.cpu_count,
            memory_gb: registration.memory_gb,
            gpu_count: registration.gpu_count,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            status: WorkerStatus::Offline,
            last_seen: now,
            registered_at: now,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self.status, WorkerStatus::Online)
    }

    /// 负载得分：CPU与内存占用之和，越低越空闲
    pub fn load_score(&self) -> f64 {
        self.cpu_percent + self.memory_percent
    }

    /// 遥测是否已过期
    pub fn is_stale(&self, staleness_seconds: i64, now: DateTime<Utc>) -> bool {
        (now - self.last_seen).num_seconds() > staleness_seconds
    }

    /// 应用一次遥测上报，记录为在线
    pub fn apply_telemetry(&mut self, telemetry: WorkerTelemetry) {
        self.cpu_percent = telemetry.cpu_percent;
        self.memory_percent = telemetry.memory_percent;
        self.gpu_count = telemetry.gpu_count;
        self.last_seen = telemetry.collected_at;
        self.status = WorkerStatus::Online;
    }
}

/// 作业状态机
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ANALYZING")]
    Analyzing,
    #[serde(rename = "RESOLVING")]
    Resolving,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMED_OUT")]
    TimedOut,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Analyzing => "ANALYZING",
            JobState::Resolving => "RESOLVING",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::TimedOut => "TIMED_OUT",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

/// 作业载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// 直接在目标Worker代理上执行的命令
    Command { command: String },
    /// 交互式提交的代码脚本，派发前经过安全分析
    Code { code: String },
    /// 声明式多副本服务，交由编排层放置
    Service(ServiceSpec),
}

impl JobPayload {
    /// 是否需要经过安全分析
    pub fn is_analyzable(&self) -> bool {
        matches!(self, JobPayload::Code { .. })
    }

    /// 派发到Worker代理时实际执行的命令串
    pub fn exec_command(&self) -> Option<&str> {
        match self {
            JobPayload::Command { command } => Some(command),
            JobPayload::Code { code } => Some(code),
            JobPayload::Service(_) => None,
        }
    }
}

/// 声明式服务作业规格
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub image: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default)]
    pub env: Vec<String>,
}

fn default_replicas() -> u32 {
    1
}

/// 编排层返回的服务句柄
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub service_id: String,
    pub service_name: String,
}

/// 安全分析风险等级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    #[serde(rename = "SAFE")]
    Safe,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "BLOCK")]
    Block,
}

/// 安全分析结论，每次提交重新计算，不做持久化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub risk: RiskLevel,
    /// 按源码顺序排列的发现项描述
    pub reasons: Vec<String>,
    /// 针对已知危险模式的改写建议
    pub suggestions: Vec<String>,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            risk: RiskLevel::Safe,
            reasons: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.risk == RiskLevel::Block
    }
}

/// Worker选择约束
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConstraints {
    pub min_gpus: u32,
    pub max_memory_percent: Option<f64>,
}

/// 作业记录，全部状态变更经由引擎的单一变更路径
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub target_worker: Option<String>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub timeout_seconds: u64,
    pub failure_reason: Option<String>,
    pub verdict: Option<SafetyVerdict>,
    pub service_handle: Option<ServiceHandle>,
}

impl Job {
    pub fn new(id: String, payload: JobPayload, timeout_seconds: u64) -> Self {
        Self {
            id,
            payload,
            target_worker: None,
            state: JobState::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            exit_code: None,
            stdout: None,
            stderr: None,
            timeout_seconds,
            failure_reason: None,
            verdict: None,
            service_handle: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        matches!(self.state, JobState::Succeeded)
    }

    /// 状态迁移的唯一入口。终态不可离开；时间戳只记录第一次进入
    pub fn update_state(&mut self, state: JobState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = state;
        match state {
            JobState::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            s if s.is_terminal() => {
                if self.ended_at.is_none() {
                    self.ended_at = Some(Utc::now());
                }
            }
            _ => {}
        }
        true
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(started), Some(ended)) => Some((ended - started).num_milliseconds()),
            _ => None,
        }
    }
}

/// 池状态汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total_workers: usize,
    pub online_workers: usize,
    pub offline_workers: usize,
    pub workers: HashMap<String, WorkerInfo>,
    pub recommended_worker: Option<String>,
}

/// 池健康等级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealthStatus {
    NoWorkers,
    AllOffline,
    Poor,
    Fair,
    Good,
    Excellent,
}

/// 池整体健康评估
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolHealth {
    pub health_status: PoolHealthStatus,
    pub health_score: u32,
    pub online_workers: usize,
    pub total_workers: usize,
    pub availability_percentage: f64,
    pub online_worker_names: Vec<String>,
}

impl PoolHealth {
    /// 按在线率分档评估健康度
    pub fn evaluate(online_worker_names: Vec<String>, total_workers: usize) -> Self {
        let online = online_worker_names.len();
        let (health_status, health_score) = if total_workers == 0 {
            (PoolHealthStatus::NoWorkers, 0)
        } else if online == 0 {
            (PoolHealthStatus::AllOffline, 0)
        } else if online == total_workers {
            (PoolHealthStatus::Excellent, 100)
        } else if online as f64 / total_workers as f64 >= 0.8 {
            (PoolHealthStatus::Good, 80)
        } else if online as f64 / total_workers as f64 >= 0.5 {
            (PoolHealthStatus::Fair, 60)
        } else {
            (PoolHealthStatus::Poor, 40)
        };

        let availability_percentage = if total_workers > 0 {
            online as f64 / total_workers as f64 * 100.0
        } else {
            0.0
        };

        Self {
            health_status,
            health_score,
            online_workers: online,
            total_workers,
            availability_percentage,
            online_worker_names,
        }
    }
}

/// 作业统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub total_jobs: usize,
    pub running_jobs: usize,
    pub by_state: HashMap<String, usize>,
    pub by_worker: HashMap<String, usize>,
    pub avg_execution_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn worker(name: &str) -> WorkerInfo {
        WorkerInfo::new(WorkerRegistration {
            name: name.to_string(),
            address: format!("{name}.internal:7576"),
            cpu_count: 8,
            memory_gb: 16,
            gpu_count: 0,
        })
    }

    #[test]
    fn test_new_worker_starts_offline() {
        let w = worker("w1");
        assert_eq!(w.status, WorkerStatus::Offline);
        assert!(!w.is_online());
    }

    #[test]
    fn test_apply_telemetry_marks_online() {
        let mut w = worker("w1");
        w.apply_telemetry(WorkerTelemetry {
            cpu_percent: 12.5,
            memory_percent: 40.0,
            gpu_count: 2,
            collected_at: Utc::now(),
        });
        assert!(w.is_online());
        assert_eq!(w.gpu_count, 2);
        assert!((w.load_score() - 52.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_staleness_check() {
        let mut w = worker("w1");
        let now = Utc::now();
        w.last_seen = now - Duration::seconds(31);
        assert!(w.is_stale(30, now));
        w.last_seen = now - Duration::seconds(29);
        assert!(!w.is_stale(30, now));
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut job = Job::new(
            "job-1".to_string(),
            JobPayload::Command {
                command: "hostname".to_string(),
            },
            30,
        );
        assert!(job.update_state(JobState::Resolving));
        assert!(job.update_state(JobState::Running));
        assert!(job.update_state(JobState::Succeeded));
        let ended = job.ended_at;
        // 任何离开终态的迁移都被拒绝，时间戳保持不变
        assert!(!job.update_state(JobState::Cancelled));
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.ended_at, ended);
    }

    #[test]
    fn test_running_records_started_at_once() {
        let mut job = Job::new(
            "job-2".to_string(),
            JobPayload::Command {
                command: "true".to_string(),
            },
            30,
        );
        job.update_state(JobState::Running);
        let first = job.started_at;
        assert!(first.is_some());
        job.update_state(JobState::Running);
        assert_eq!(job.started_at, first);
    }

    #[test]
    fn test_pool_health_thresholds() {
        let health = PoolHealth::evaluate(vec![], 0);
        assert_eq!(health.health_status, PoolHealthStatus::NoWorkers);
        assert_eq!(health.health_score, 0);

        let health = PoolHealth::evaluate(vec![], 3);
        assert_eq!(health.health_status, PoolHealthStatus::AllOffline);

        let names = |n: usize| (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>();

        let health = PoolHealth::evaluate(names(5), 5);
        assert_eq!(health.health_status, PoolHealthStatus::Excellent);
        assert_eq!(health.health_score, 100);

        let health = PoolHealth::evaluate(names(4), 5);
        assert_eq!(health.health_status, PoolHealthStatus::Good);
        assert_eq!(health.health_score, 80);

        let health = PoolHealth::evaluate(names(1), 2);
        assert_eq!(health.health_status, PoolHealthStatus::Fair);
        assert_eq!(health.health_score, 60);
        assert!((health.availability_percentage - 50.0).abs() < f64::EPSILON);

        let health = PoolHealth::evaluate(names(1), 4);
        assert_eq!(health.health_status, PoolHealthStatus::Poor);
        assert_eq!(health.health_score, 40);
    }

    #[test]
    fn test_payload_analyzability() {
        assert!(JobPayload::Code {
            code: "print(1)".to_string()
        }
        .is_analyzable());
        assert!(!JobPayload::Command {
            command: "ls".to_string()
        }
        .is_analyzable());
    }
}
