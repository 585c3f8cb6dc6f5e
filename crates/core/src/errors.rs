use thiserror::Error;

/// Worker池错误类型定义
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker未找到: {name}")]
    WorkerNotFound { name: String },

    #[error("作业未找到: {id}")]
    JobNotFound { id: String },

    #[error("没有满足约束的可用Worker")]
    NoCandidateWorker,

    #[error("代码被安全分析拦截: {reasons:?}")]
    Blocked { reasons: Vec<String> },

    #[error("作业派发失败: {0}")]
    DispatchFailure(String),

    #[error("作业执行失败: {0}")]
    ExecutionFailure(String),

    #[error("作业执行超时")]
    ExecutionTimeout,

    #[error("作业已取消")]
    Cancelled,

    #[error("网络错误: {0}")]
    Network(String),

    #[error("编排服务错误: {0}")]
    Orchestrator(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("无效的作业参数: {0}")]
    InvalidJobParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl PoolError {
    pub fn worker_not_found<S: Into<String>>(name: S) -> Self {
        Self::WorkerNotFound { name: name.into() }
    }

    pub fn job_not_found<S: Into<String>>(id: S) -> Self {
        Self::JobNotFound { id: id.into() }
    }

    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidJobParams(msg.into())
    }

    /// 是否属于调用方可修正的请求类错误
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::WorkerNotFound { .. }
                | Self::JobNotFound { .. }
                | Self::InvalidJobParams(_)
                | Self::Blocked { .. }
        )
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_contains_identifier() {
        let err = PoolError::worker_not_found("gpu-01");
        assert!(err.to_string().contains("gpu-01"));

        let err = PoolError::job_not_found("job-abc123");
        assert!(err.to_string().contains("job-abc123"));
    }

    #[test]
    fn test_is_client_error() {
        assert!(PoolError::job_not_found("x").is_client_error());
        assert!(PoolError::invalid_params("bad").is_client_error());
        assert!(!PoolError::NoCandidateWorker.is_client_error());
        assert!(!PoolError::Network("conn refused".to_string()).is_client_error());
    }
}
