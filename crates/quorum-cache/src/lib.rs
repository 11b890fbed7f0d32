pub mod error;
pub mod optimizer;
pub mod response_cache;
pub mod sqlite;

pub use error::CacheError;
pub use optimizer::{CostOptimizer, OptimizedPrompt};
pub use response_cache::{cache_key, normalize_request, CacheStats, ResponseCache};
pub use sqlite::SnapshotStore;
