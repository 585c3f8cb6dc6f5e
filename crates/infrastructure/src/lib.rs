pub mod agent_client;
pub mod memory_registry;
pub mod orchestrator;

pub use agent_client::HttpAgentClient;
pub use memory_registry::MemoryWorkerRegistry;
pub use orchestrator::SwarmOrchestrator;
