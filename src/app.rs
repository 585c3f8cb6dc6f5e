use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use gridpool_api::{create_routes, AppState};
use gridpool_core::AppConfig;
use gridpool_dispatcher::{CodeSafetyAnalyzer, HealthProber, JobLifecycleEngine};
use gridpool_domain::ports::{AgentClient, ServiceOrchestrator};
use gridpool_domain::registry::WorkerRegistry;
use gridpool_infrastructure::{HttpAgentClient, MemoryWorkerRegistry, SwarmOrchestrator};

/// 终态作业的清理周期
const CLEANUP_INTERVAL_SECONDS: u64 = 3600;

/// 主应用程序：装配注册表、探测器、引擎与API服务
pub struct Application {
    config: AppConfig,
    engine: Arc<JobLifecycleEngine>,
    registry: Arc<dyn WorkerRegistry>,
    prober: Arc<HealthProber>,
}

impl Application {
    pub fn new(config: AppConfig) -> Result<Self> {
        let registry: Arc<dyn WorkerRegistry> =
            Arc::new(MemoryWorkerRegistry::new(config.pool.staleness_seconds));
        let agent: Arc<dyn AgentClient> = Arc::new(HttpAgentClient::new());
        let orchestrator: Arc<dyn ServiceOrchestrator> =
            Arc::new(SwarmOrchestrator::new(config.orchestrator.clone()));
        let analyzer = CodeSafetyAnalyzer::new(&config.analyzer).context("初始化安全分析器失败")?;

        let engine = Arc::new(JobLifecycleEngine::new(
            Arc::clone(&registry),
            Arc::clone(&agent),
            orchestrator,
            analyzer,
            config.engine.clone(),
        ));
        let prober = Arc::new(HealthProber::new(
            Arc::clone(&registry),
            agent,
            config.prober.clone(),
        ));

        Ok(Self {
            config,
            engine,
            registry,
            prober,
        })
    }

    /// 运行全部组件直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if self.config.prober.enabled {
            let prober = Arc::clone(&self.prober);
            let prober_shutdown = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                prober.run(prober_shutdown).await;
            });
        }

        self.spawn_cleanup_loop(shutdown_rx.resubscribe());

        if !self.config.api.enabled {
            // 没有API面时挂起等待关闭
            let mut rx = shutdown_rx.resubscribe();
            let _ = rx.recv().await;
            return Ok(());
        }

        let state = AppState {
            engine: Arc::clone(&self.engine),
            registry: Arc::clone(&self.registry),
            prober: Arc::clone(&self.prober),
        };
        let router = create_routes(state, self.config.api.cors_enabled);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定 {} 失败", self.config.api.bind_address))?;
        info!("API服务监听 {}", self.config.api.bind_address);

        let mut server_shutdown = shutdown_rx.resubscribe();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
            .context("API服务异常退出")?;

        info!("API服务已停止");
        Ok(())
    }

    /// 周期清理超过保留期限的终态作业
    fn spawn_cleanup_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECONDS));
            // 第一次tick立即触发，跳过
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        engine.cleanup_finished().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }
}
