//! Worker代理HTTP客户端
//!
//! 网络层保证地址可达且已认证，这里只发普通的请求/应答：
//! GET /ping、GET /status、POST /exec、POST /cancel。

use std::time::Duration;

use async_trait::async_trait;
use gridpool_core::{PoolError, PoolResult};
use gridpool_domain::ports::{AgentClient, AgentStatus, ExecOutcome};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    cmd: &'a str,
    timeout_seconds: u64,
}

/// 代理的 /exec 应答体
#[derive(Debug, Deserialize)]
struct ExecResponse {
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: String,
    exit_code: i32,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    job_id: &'a str,
}

pub struct HttpAgentClient {
    http_client: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }

    fn base_url(address: &str) -> String {
        if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{address}")
        }
    }
}

impl Default for HttpAgentClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn ping(&self, address: &str) -> PoolResult<()> {
        let url = format!("{}/ping", Self::base_url(address));
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| PoolError::Network(format!("连接 {address} 失败: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(PoolError::Network(format!(
                "代理 {address} 应答异常: HTTP {}",
                response.status()
            )))
        }
    }

    async fn fetch_status(&self, address: &str) -> PoolResult<AgentStatus> {
        let url = format!("{}/status", Self::base_url(address));
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| PoolError::Network(format!("连接 {address} 失败: {e}")))?;

        if !response.status().is_success() {
            return Err(PoolError::Network(format!(
                "代理 {address} 应答异常: HTTP {}",
                response.status()
            )));
        }

        response
            .json::<AgentStatus>()
            .await
            .map_err(|e| PoolError::Network(format!("解析 {address} 状态应答失败: {e}")))
    }

    async fn execute(
        &self,
        address: &str,
        command: &str,
        timeout: Duration,
    ) -> PoolResult<ExecOutcome> {
        let url = format!("{}/exec", Self::base_url(address));
        debug!("向 {address} 派发命令");

        let request = ExecRequest {
            cmd: command,
            timeout_seconds: timeout.as_secs(),
        };

        // HTTP层超时留出余量，引擎自己的超时竞态先于传输层触发
        let response = self
            .http_client
            .post(&url)
            .timeout(timeout + Duration::from_secs(2))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PoolError::ExecutionTimeout
                } else {
                    PoolError::Network(format!("连接 {address} 失败: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(PoolError::ExecutionFailure(format!(
                "代理 {address} 执行应答异常: HTTP {}",
                response.status()
            )));
        }

        let body: ExecResponse = response
            .json()
            .await
            .map_err(|e| PoolError::Network(format!("解析 {address} 执行应答失败: {e}")))?;

        Ok(ExecOutcome {
            exit_code: body.exit_code,
            stdout: body.output,
            stderr: body.error,
        })
    }

    async fn cancel(&self, address: &str, job_id: &str) -> PoolResult<()> {
        let url = format!("{}/cancel", Self::base_url(address));
        debug!("向 {address} 发送作业 {job_id} 的取消请求");

        // 对端可能没有该路由或根本不应答，调用方一律按尽力而为处理
        self.http_client
            .post(&url)
            .timeout(Duration::from_secs(5))
            .json(&CancelRequest { job_id })
            .send()
            .await
            .map_err(|e| PoolError::Network(format!("连接 {address} 失败: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_prefixes_scheme() {
        assert_eq!(
            HttpAgentClient::base_url("10.0.0.2:7576"),
            "http://10.0.0.2:7576"
        );
        assert_eq!(
            HttpAgentClient::base_url("http://10.0.0.2:7576/"),
            "http://10.0.0.2:7576"
        );
        assert_eq!(
            HttpAgentClient::base_url("https://worker.example:7576"),
            "https://worker.example:7576"
        );
    }

    #[test]
    fn test_exec_response_defaults() {
        let body: ExecResponse =
            serde_json::from_str(r#"{"exit_code": 0}"#).unwrap();
        assert_eq!(body.exit_code, 0);
        assert!(body.output.is_empty());
        assert!(body.error.is_empty());
    }
}
