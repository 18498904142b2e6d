use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 扫描过程中按文件记录的错误
///
/// 这些错误永远不会中断整个扫描，只会附加到对应文件的错误列表中。
/// `Cache` 是唯一的例外：结果缓存损坏属于运维配置问题，会直接向上传播。
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanError {
    /// 分析器在 apply 时返回了错误
    #[error("An error occurred while scanning {path} using '{category}' analyser: {message}")]
    Analyser {
        path: String,
        category: String,
        message: String,
    },

    /// 归档文件无法解压，已作为不可扫描的叶子跳过
    #[error("Unable to extract archive {path}: {message}")]
    Extraction { path: String, message: String },

    /// 分析器超时，宿主 worker 已被终止
    #[error("'{category}' analyser timed out after {timeout_secs}s while scanning {path}")]
    Timeout {
        path: String,
        category: String,
        timeout_secs: u64,
    },

    /// worker 进程在执行任务时异常退出
    #[error("Worker crashed while scanning {path} using '{category}' analyser (exit code {exit_code:?})")]
    Crash {
        path: String,
        category: String,
        exit_code: Option<i32>,
    },

    /// 结果缓存读写失败
    #[error("Results cache failure: {message}")]
    Cache { message: String },
}

impl ScanError {
    /// 错误所属的分析器类别（归档错误没有类别）
    pub fn category(&self) -> Option<&str> {
        match self {
            ScanError::Analyser { category, .. }
            | ScanError::Timeout { category, .. }
            | ScanError::Crash { category, .. } => Some(category),
            ScanError::Extraction { .. } | ScanError::Cache { .. } => None,
        }
    }
}

impl From<CacheError> for ScanError {
    fn from(err: CacheError) -> Self {
        ScanError::Cache {
            message: err.to_string(),
        }
    }
}

/// 结果缓存错误
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cache value encoding error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("cache shard {0} lock poisoned")]
    Poisoned(usize),
}

/// worker 进程池错误
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker process `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker pool is closed")]
    Closed,

    #[error("worker protocol error: {0}")]
    Protocol(String),
}
