pub mod jobs;
pub mod pool;
pub mod workers;
