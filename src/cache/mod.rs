//! 内容寻址的结果缓存

pub mod keys;
pub mod results_cache;

pub use keys::{content_hash, fastpath_key, file_stat, options_fingerprint, primary_key};
pub use results_cache::{CacheStats, FastpathRecord, ResultsCache};
