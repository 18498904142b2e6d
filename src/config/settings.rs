use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Result;

use crate::analyser::{AnalyserSpec, CommandAnalyserConfig};
use crate::config::defaults::DefaultConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 扫描配置
    pub scan: ScanConfig,

    /// 结果缓存配置
    pub cache: CacheConfig,

    /// 分析器配置
    pub analysers: AnalysersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// 单个文件的最大分析大小（字节）
    pub max_file_size: u64,

    /// 每个分析器在单个文件上的超时时间（秒）
    pub timeout_secs: u64,

    /// worker 进程数，0 表示 CPU 核心数 - 1
    pub jobs: usize,

    /// 按文件名匹配的忽略模式（shell 通配符）
    pub ignore_patterns: Vec<String>,

    /// 是否忽略隐藏文件
    pub ignore_hidden: bool,

    /// 是否展开归档文件
    pub unpack_archives: bool,

    /// 在每个顶层扫描路径上额外应用的 gitignore 文件
    pub default_gitignores: Vec<PathBuf>,

    /// 固定的解压目录，未设置时每次扫描使用新的临时目录
    pub unpack_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 是否启用缓存
    pub enabled: bool,

    /// 缓存目录
    pub directory: PathBuf,

    /// 缓存大小上限（字节）
    pub size_limit: u64,

    /// 分片数量
    pub shards: usize,

    /// 是否启用基于 stat 的快速路径
    pub use_fastpath: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysersConfig {
    /// 是否提取版权信息
    pub include_copyright: bool,

    /// 是否检测加密算法
    pub include_crypto: bool,

    /// 是否计算文件指纹
    pub include_fingerprint: bool,

    /// 外部工具分析器
    pub commands: Vec<CommandAnalyserConfig>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_file_size: DefaultConfig::max_file_size(),
            timeout_secs: DefaultConfig::TIMEOUT_SECS,
            jobs: 0,
            ignore_patterns: Vec::new(),
            ignore_hidden: true,
            unpack_archives: true,
            default_gitignores: Vec::new(),
            unpack_dir: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: DefaultConfig::cache_dir(),
            size_limit: DefaultConfig::CACHE_SIZE_LIMIT,
            shards: DefaultConfig::CACHE_SHARDS,
            use_fastpath: true,
        }
    }
}

impl Default for AnalysersConfig {
    fn default() -> Self {
        Self {
            include_copyright: true,
            include_crypto: true,
            include_fingerprint: false,
            commands: Vec::new(),
        }
    }
}

impl ScanConfig {
    /// 单个分析任务的超时时间
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// 实际使用的 worker 数量（CPU 核心数 - 1，至少为 1）
    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            num_cpus::get().saturating_sub(1).max(1)
        }
    }
}

impl AnalysersConfig {
    /// 根据配置生成分析器描述列表
    pub fn specs(&self, max_file_size: u64) -> Vec<AnalyserSpec> {
        let mut specs = vec![
            AnalyserSpec::License {
                include_copyright: self.include_copyright,
                max_file_size,
            },
            AnalyserSpec::Comments {
                include_copyright: self.include_copyright,
                max_file_size,
            },
        ];

        if self.include_crypto {
            specs.push(AnalyserSpec::Crypto { max_file_size });
        }

        if self.include_fingerprint {
            specs.push(AnalyserSpec::Fingerprint { max_file_size });
        }

        specs.extend(self.commands.iter().cloned().map(AnalyserSpec::Command));
        specs
    }
}

impl Config {
    /// 从文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        // 确保目录存在
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// 获取默认配置文件路径
    pub fn default_config_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("无法找到配置目录"))?;
        path.push("deepscan");
        path.push("config.toml");
        Ok(path)
    }

    /// 加载配置，如果文件不存在则创建默认配置
    pub fn load_or_create_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            let config = Self::default();
            config.save_to_file(&config_path)?;
            Ok(config)
        }
    }

    /// 当前配置对应的分析器描述列表
    pub fn analyser_specs(&self) -> Vec<AnalyserSpec> {
        self.analysers.specs(self.scan.max_file_size)
    }
}
