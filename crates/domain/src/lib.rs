pub mod entities;
pub mod ports;
pub mod registry;

pub use entities::*;
pub use gridpool_core::{PoolError, PoolResult};
pub use ports::*;
pub use registry::WorkerRegistry;
