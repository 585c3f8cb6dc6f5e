//! Docker Swarm服务编排客户端
//!
//! 声明式多副本作业的派发路径：把服务规格翻译成
//! `docker service create` 调用，放置决策完全交给Swarm。
//! 核心只关心成功/失败与返回的服务句柄。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use gridpool_core::{OrchestratorConfig, PoolError, PoolResult};
use gridpool_domain::entities::{ServiceHandle, ServiceSpec};
use gridpool_domain::ports::ServiceOrchestrator;
use tokio::process::Command;
use tracing::{info, warn};

pub struct SwarmOrchestrator {
    config: OrchestratorConfig,
}

impl SwarmOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    fn service_name(&self, job_id: &str) -> String {
        format!("{}-{job_id}", self.config.service_prefix)
    }

    /// 按原始命令行形式组装 service create 参数
    fn build_create_args(&self, job_id: &str, spec: &ServiceSpec) -> Vec<String> {
        let mut args = vec![
            "service".to_string(),
            "create".to_string(),
            "--name".to_string(),
            self.service_name(job_id),
            "--replicas".to_string(),
            spec.replicas.to_string(),
            // 一次性作业：结束后不重启
            "--restart-condition".to_string(),
            "none".to_string(),
        ];

        if let Some(cpus) = spec.cpus {
            args.push("--limit-cpu".to_string());
            args.push(cpus.to_string());
            args.push("--reserve-cpu".to_string());
            args.push(cpus.to_string());
        }
        if let Some(memory) = &spec.memory {
            args.push("--limit-memory".to_string());
            args.push(memory.clone());
            args.push("--reserve-memory".to_string());
            args.push(memory.clone());
        }
        if spec.gpus > 0 {
            args.push("--generic-resource".to_string());
            args.push(format!("gpu={}", spec.gpus));
        }
        for env in &spec.env {
            args.push("--env".to_string());
            args.push(env.clone());
        }

        args.push(spec.image.clone());

        if let Some(command) = &spec.command {
            args.push("sh".to_string());
            args.push("-c".to_string());
            args.push(command.clone());
        }

        args
    }

    async fn run_docker(&self, args: &[String]) -> PoolResult<std::process::Output> {
        let timeout = Duration::from_secs(self.config.submit_timeout_seconds);
        let child = Command::new(&self.config.docker_bin)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(PoolError::Orchestrator(format!("启动docker失败: {e}"))),
            Err(_) => Err(PoolError::Orchestrator(format!(
                "docker调用超过 {} 秒",
                self.config.submit_timeout_seconds
            ))),
        }
    }
}

#[async_trait]
impl ServiceOrchestrator for SwarmOrchestrator {
    async fn submit_service(&self, job_id: &str, spec: &ServiceSpec) -> PoolResult<ServiceHandle> {
        let args = self.build_create_args(job_id, spec);
        info!("提交服务作业 {} (镜像: {})", job_id, spec.image);

        let output = self.run_docker(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PoolError::Orchestrator(format!(
                "service create 失败: {}",
                stderr.trim()
            )));
        }

        let service_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if service_id.is_empty() {
            return Err(PoolError::Orchestrator(
                "service create 没有返回服务ID".to_string(),
            ));
        }

        Ok(ServiceHandle {
            service_id,
            service_name: self.service_name(job_id),
        })
    }

    async fn remove_service(&self, handle: &ServiceHandle) -> PoolResult<()> {
        let args = vec![
            "service".to_string(),
            "rm".to_string(),
            handle.service_name.clone(),
        ];
        let output = self.run_docker(&args).await?;
        if !output.status.success() {
            // 服务可能早已结束并被回收，只留日志
            warn!(
                "移除服务 {} 失败: {}",
                handle.service_name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> SwarmOrchestrator {
        SwarmOrchestrator::new(OrchestratorConfig::default())
    }

    fn spec() -> ServiceSpec {
        ServiceSpec {
            image: "python:3.11".to_string(),
            command: Some("python -c 'print(1+1)'".to_string()),
            replicas: 2,
            cpus: Some(1.5),
            memory: Some("2G".to_string()),
            gpus: 1,
            env: vec!["MODE=train".to_string()],
        }
    }

    #[test]
    fn test_create_args_include_resource_limits() {
        let args = orchestrator().build_create_args("job-abc123", &spec());
        let joined = args.join(" ");
        assert!(joined.starts_with("service create --name gridpool-job-abc123"));
        assert!(joined.contains("--replicas 2"));
        assert!(joined.contains("--restart-condition none"));
        assert!(joined.contains("--limit-cpu 1.5"));
        assert!(joined.contains("--reserve-cpu 1.5"));
        assert!(joined.contains("--limit-memory 2G"));
        assert!(joined.contains("--generic-resource gpu=1"));
        assert!(joined.contains("--env MODE=train"));
    }

    #[test]
    fn test_command_is_wrapped_in_shell() {
        let args = orchestrator().build_create_args("job-abc123", &spec());
        let image_pos = args.iter().position(|a| a == "python:3.11").unwrap();
        assert_eq!(args[image_pos + 1], "sh");
        assert_eq!(args[image_pos + 2], "-c");
        assert_eq!(args[image_pos + 3], "python -c 'print(1+1)'");
    }

    #[test]
    fn test_minimal_spec_omits_optional_flags() {
        let minimal = ServiceSpec {
            image: "alpine".to_string(),
            command: None,
            replicas: 1,
            cpus: None,
            memory: None,
            gpus: 0,
            env: vec![],
        };
        let args = orchestrator().build_create_args("job-x", &minimal);
        let joined = args.join(" ");
        assert!(!joined.contains("--limit-cpu"));
        assert!(!joined.contains("--limit-memory"));
        assert!(!joined.contains("--generic-resource"));
        assert!(!joined.contains("--env"));
        assert_eq!(args.last().unwrap(), "alpine");
    }
}
