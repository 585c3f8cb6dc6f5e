use std::sync::Arc;

use chrono::Utc;
use gridpool_core::ProberConfig;
use gridpool_dispatcher::test_utils::MockAgentClient;
use gridpool_dispatcher::HealthProber;
use gridpool_domain::entities::{WorkerRegistration, WorkerTelemetry};
use gridpool_domain::registry::WorkerRegistry;
use gridpool_infrastructure::MemoryWorkerRegistry;

fn prober_config() -> ProberConfig {
    ProberConfig {
        enabled: true,
        probe_interval_seconds: 5,
        probe_timeout_seconds: 1,
    }
}

async fn register(registry: &MemoryWorkerRegistry, name: &str) -> String {
    let address = format!("{name}.internal:7576");
    registry
        .register(WorkerRegistration {
            name: name.to_string(),
            address: address.clone(),
            cpu_count: 4,
            memory_gb: 8,
            gpu_count: 0,
        })
        .await
        .unwrap();
    address
}

#[tokio::test]
async fn test_sweep_updates_telemetry_of_reachable_workers() {
    let registry = Arc::new(MemoryWorkerRegistry::new(30));
    let address = register(&registry, "w1").await;
    let agent = MockAgentClient::new();
    agent.set_status(&address, 25.0, 55.0, 2);

    let prober = HealthProber::new(Arc::clone(&registry) as Arc<dyn WorkerRegistry>, Arc::new(agent), prober_config());
    prober.probe_all().await;

    let worker = registry.get("w1").await.unwrap().unwrap();
    assert!(worker.is_online());
    assert!((worker.cpu_percent - 25.0).abs() < f64::EPSILON);
    assert!((worker.memory_percent - 55.0).abs() < f64::EPSILON);
    assert_eq!(worker.gpu_count, 2);
}

#[tokio::test]
async fn test_one_failing_worker_does_not_block_others() {
    let registry = Arc::new(MemoryWorkerRegistry::new(30));
    let good = register(&registry, "good").await;
    let bad = register(&registry, "bad").await;

    let agent = MockAgentClient::new();
    agent.set_status(&good, 10.0, 20.0, 0);
    agent.fail_address(&bad);

    let prober = HealthProber::new(
        Arc::clone(&registry) as Arc<dyn WorkerRegistry>,
        Arc::new(agent.clone()),
        prober_config(),
    );
    prober.probe_all().await;

    // 可达的Worker照常更新
    let worker = registry.get("good").await.unwrap().unwrap();
    assert!(worker.is_online());

    // 失败只进计数器，不影响同轮其它探测
    let counts = prober.error_counts().await;
    assert_eq!(counts.get("bad"), Some(&1));
    assert!(!counts.contains_key("good"));
    assert_eq!(agent.status_calls().len(), 2);
}

#[tokio::test]
async fn test_probe_failure_never_writes_registry() {
    let registry = Arc::new(MemoryWorkerRegistry::new(300));
    let address = register(&registry, "w1").await;

    // 先写入一次成功的遥测，使其在线
    registry
        .upsert_telemetry(
            "w1",
            WorkerTelemetry {
                cpu_percent: 5.0,
                memory_percent: 5.0,
                gpu_count: 0,
                collected_at: Utc::now(),
            },
        )
        .await
        .unwrap();

    let agent = MockAgentClient::new();
    agent.fail_address(&address);
    let prober = HealthProber::new(
        Arc::clone(&registry) as Arc<dyn WorkerRegistry>,
        Arc::new(agent),
        prober_config(),
    );
    prober.probe_all().await;
    prober.probe_all().await;

    // 过期期限内探测失败不强制下线，离线判定由快照的过期规则统一给出
    let worker = registry.get("w1").await.unwrap().unwrap();
    assert!(worker.is_online());
    assert_eq!(prober.error_counts().await.get("w1"), Some(&2));
}

#[tokio::test]
async fn test_probe_worker_on_demand() {
    let registry = Arc::new(MemoryWorkerRegistry::new(30));
    let good = register(&registry, "good").await;
    let bad = register(&registry, "bad").await;

    let agent = MockAgentClient::new();
    agent.set_status(&good, 1.0, 1.0, 0);
    agent.fail_address(&bad);

    let prober = HealthProber::new(
        Arc::clone(&registry) as Arc<dyn WorkerRegistry>,
        Arc::new(agent),
        prober_config(),
    );

    assert!(prober.probe_worker("good").await.unwrap());
    assert!(!prober.probe_worker("bad").await.unwrap());
    assert!(prober.probe_worker("missing").await.is_err());
}
