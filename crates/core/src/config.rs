use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::errors::PoolError;

/// 配置项校验接口
pub trait ConfigValidator {
    fn validate(&self) -> crate::PoolResult<()>;
}

fn validate_positive(value: u64, field: &str) -> crate::PoolResult<()> {
    if value == 0 {
        return Err(PoolError::Configuration(format!("{field} 必须大于0")));
    }
    Ok(())
}

/// Worker池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 遥测过期期限（秒），超过该时间未上报的Worker一律视为离线
    pub staleness_seconds: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            staleness_seconds: 30,
        }
    }
}

impl ConfigValidator for PoolConfig {
    fn validate(&self) -> crate::PoolResult<()> {
        if self.staleness_seconds <= 0 {
            return Err(PoolError::Configuration(
                "pool.staleness_seconds 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 健康探测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProberConfig {
    pub enabled: bool,
    /// 探测间隔（秒）
    pub probe_interval_seconds: u64,
    /// 单次探测超时（秒）
    pub probe_timeout_seconds: u64,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_seconds: 5,
            probe_timeout_seconds: 3,
        }
    }
}

impl ConfigValidator for ProberConfig {
    fn validate(&self) -> crate::PoolResult<()> {
        validate_positive(self.probe_interval_seconds, "prober.probe_interval_seconds")?;
        validate_positive(self.probe_timeout_seconds, "prober.probe_timeout_seconds")?;
        if self.probe_timeout_seconds > self.probe_interval_seconds {
            return Err(PoolError::Configuration(
                "prober.probe_timeout_seconds 不应超过探测间隔".to_string(),
            ));
        }
        Ok(())
    }
}

/// 作业引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 未显式指定时的作业超时（秒）
    pub default_timeout_seconds: u64,
    /// 允许的最大作业超时（秒）
    pub max_timeout_seconds: u64,
    /// 终态作业保留时长（小时），超过后可被清理
    pub retain_finished_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30,
            max_timeout_seconds: 3600,
            retain_finished_hours: 24,
        }
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> crate::PoolResult<()> {
        validate_positive(self.default_timeout_seconds, "engine.default_timeout_seconds")?;
        validate_positive(self.max_timeout_seconds, "engine.max_timeout_seconds")?;
        if self.default_timeout_seconds > self.max_timeout_seconds {
            return Err(PoolError::Configuration(
                "engine.default_timeout_seconds 不能超过 max_timeout_seconds".to_string(),
            ));
        }
        if self.retain_finished_hours <= 0 {
            return Err(PoolError::Configuration(
                "engine.retain_finished_hours 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 代码安全分析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub enabled: bool,
    /// 命中即拦截的正则模式
    pub block_patterns: Vec<String>,
    /// 命中仅告警的正则模式
    pub warn_patterns: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_patterns: vec![
                // 无限递归式进程创建
                r"os\.fork\(\)".to_string(),
                // 超大内存分配: [x] * 10000000 之类
                r"\[[^\]]*\]\s*\*\s*\d{7,}".to_string(),
                r"range\(\s*\d{8,}\s*\)".to_string(),
            ],
            warn_patterns: vec![
                r"subprocess\.".to_string(),
                r"requests\.get\(".to_string(),
                r"urllib\.request".to_string(),
                r"\.read\(\)".to_string(),
                r"numpy\.zeros\(\s*\d{5,}".to_string(),
                r"range\(\s*\d{6,7}\s*\)".to_string(),
            ],
        }
    }
}

impl ConfigValidator for AnalyzerConfig {
    fn validate(&self) -> crate::PoolResult<()> {
        for pattern in self.block_patterns.iter().chain(self.warn_patterns.iter()) {
            regex_syntax_check(pattern)?;
        }
        Ok(())
    }
}

// 配置阶段只做轻量语法检查，真正的编译在分析器初始化时完成
fn regex_syntax_check(pattern: &str) -> crate::PoolResult<()> {
    if pattern.trim().is_empty() {
        return Err(PoolError::Configuration(
            "analyzer 模式列表不允许空字符串".to_string(),
        ));
    }
    Ok(())
}

/// 服务编排配置（声明式多副本作业路径）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub enabled: bool,
    /// docker 可执行文件路径
    pub docker_bin: String,
    /// 服务名前缀
    pub service_prefix: String,
    /// docker service create 的调用超时（秒）
    pub submit_timeout_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            docker_bin: "docker".to_string(),
            service_prefix: "gridpool".to_string(),
            submit_timeout_seconds: 60,
        }
    }
}

impl ConfigValidator for OrchestratorConfig {
    fn validate(&self) -> crate::PoolResult<()> {
        if self.docker_bin.trim().is_empty() {
            return Err(PoolError::Configuration(
                "orchestrator.docker_bin 不能为空".to_string(),
            ));
        }
        if self.service_prefix.trim().is_empty() {
            return Err(PoolError::Configuration(
                "orchestrator.service_prefix 不能为空".to_string(),
            ));
        }
        validate_positive(
            self.submit_timeout_seconds,
            "orchestrator.submit_timeout_seconds",
        )?;
        Ok(())
    }
}

/// API服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub cors_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8000".to_string(),
            cors_enabled: true,
        }
    }
}

impl ConfigValidator for ApiConfig {
    fn validate(&self) -> crate::PoolResult<()> {
        if self.bind_address.trim().is_empty() {
            return Err(PoolError::Configuration(
                "api.bind_address 不能为空".to_string(),
            ));
        }
        Ok(())
    }
}

/// 应用总配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pool: PoolConfig,
    pub prober: ProberConfig,
    pub engine: EngineConfig,
    pub analyzer: AnalyzerConfig,
    pub orchestrator: OrchestratorConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    /// 加载配置：显式路径 > 默认路径 > 内置默认值，环境变量 GRIDPOOL_* 最终覆盖
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {path}"));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/gridpool.toml", "gridpool.toml", "/etc/gridpool/config.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let config = builder
            .add_source(Environment::with_prefix("GRIDPOOL").separator("__"))
            .build()
            .context("构建配置失败")?;

        let app_config: AppConfig = config.try_deserialize().context("解析配置失败")?;
        app_config.validate().map_err(anyhow::Error::from)?;
        Ok(app_config)
    }

    pub fn validate(&self) -> crate::PoolResult<()> {
        self.pool.validate()?;
        self.prober.validate()?;
        self.engine.validate()?;
        self.analyzer.validate()?;
        self.orchestrator.validate()?;
        self.api.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.staleness_seconds, 30);
        assert_eq!(config.prober.probe_interval_seconds, 5);
        assert!(!config.analyzer.block_patterns.is_empty());
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let mut config = AppConfig::default();
        config.prober.probe_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_timeout_over_max() {
        let mut config = AppConfig::default();
        config.engine.default_timeout_seconds = 7200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pool]
staleness_seconds = 60

[prober]
probe_interval_seconds = 10
probe_timeout_seconds = 4

[api]
bind_address = "127.0.0.1:9000"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.pool.staleness_seconds, 60);
        assert_eq!(config.prober.probe_interval_seconds, 10);
        assert_eq!(config.api.bind_address, "127.0.0.1:9000");
        // 未出现的段落沿用默认值
        assert_eq!(config.engine.default_timeout_seconds, 30);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = AppConfig::load(Some("/nonexistent/gridpool.toml"));
        assert!(result.is_err());
    }
}
