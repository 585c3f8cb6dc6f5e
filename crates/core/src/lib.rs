pub mod config;
pub mod errors;

pub use config::{
    AnalyzerConfig, ApiConfig, AppConfig, EngineConfig, OrchestratorConfig, PoolConfig,
    ProberConfig,
};
pub use errors::PoolError;

/// 统一的Result类型
pub type PoolResult<T> = std::result::Result<T, PoolError>;
