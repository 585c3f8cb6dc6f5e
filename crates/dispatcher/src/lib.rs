pub mod analyzer;
pub mod engine;
pub mod prober;
pub mod selector;
pub mod test_utils;

pub use analyzer::CodeSafetyAnalyzer;
pub use engine::{JobLifecycleEngine, SubmitRequest};
pub use prober::HealthProber;
pub use selector::select_worker;
