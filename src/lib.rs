pub mod analyser;
pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod pool;
pub mod scanner;
pub mod utils;

// 重新导出常用类型
pub use analyser::{Analyser, AnalyserSet, AnalyserSpec, AnalysisResult};
pub use cache::ResultsCache;
pub use config::Config;
pub use errors::{CacheError, PoolError, ScanError};
pub use models::Scan;
pub use pool::{WorkerCommand, WorkerPool};
pub use scanner::Scanner;
