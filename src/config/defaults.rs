use std::path::PathBuf;

pub struct DefaultConfig;

impl DefaultConfig {
    /// 单个分析任务的默认超时（秒）
    pub const TIMEOUT_SECS: u64 = 60;

    /// 默认的最大文件大小（字节）
    pub const MAX_FILE_SIZE: u64 = 1_000_000;

    /// 缓存默认大小上限 2 GiB
    pub const CACHE_SIZE_LIMIT: u64 = 2 * 1024 * 1024 * 1024;

    /// 缓存默认分片数
    pub const CACHE_SHARDS: usize = 8;

    /// 覆盖最大文件大小的环境变量（单位 KiB）
    pub const FILE_MAX_SIZE_ENV: &'static str = "DEEPSCAN_FILE_MAX_SIZE";

    /// 默认的最大文件大小，可以通过环境变量覆盖
    pub fn max_file_size() -> u64 {
        std::env::var(Self::FILE_MAX_SIZE_ENV)
            .ok()
            .and_then(|value| Self::parse_kib(&value))
            .unwrap_or(Self::MAX_FILE_SIZE)
    }

    /// 解析以 KiB 为单位的大小，过大的值截断为 `u64::MAX`
    fn parse_kib(value: &str) -> Option<u64> {
        value.trim().parse::<u64>().ok().map(|kib| kib.saturating_mul(1024))
    }

    /// 默认缓存目录 `~/.deepscan/caches/ds`
    pub fn cache_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".deepscan")
            .join("caches")
            .join("ds")
    }
}
