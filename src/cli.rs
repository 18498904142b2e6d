use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use deepscan::config::Config;

#[derive(Parser)]
#[command(name = "deepscan")]
#[command(about = "扫描文件树，在隔离的 worker 进程中运行许可证、注释、加密算法和指纹分析")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 扫描指定的文件或目录
    Scan(ScanArgs),

    /// 管理结果缓存
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// 管理配置
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// worker 进程入口，通过标准输入输出与调度进程通信
    #[command(hide = true)]
    Worker,
}

#[derive(Args)]
pub struct ScanArgs {
    /// 要扫描的路径
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// worker 进程数 (默认为 CPU 核心数 - 1)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// 单个分析器的超时时间（秒）
    #[arg(long)]
    pub timeout: Option<u64>,

    /// 最大分析文件大小（字节）
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// 提取版权信息
    #[arg(long, overrides_with = "no_include_copyright")]
    pub include_copyright: bool,

    /// 不提取版权信息
    #[arg(long, overrides_with = "include_copyright")]
    pub no_include_copyright: bool,

    /// 检测加密算法
    #[arg(long, overrides_with = "no_include_crypto")]
    pub include_crypto: bool,

    /// 不检测加密算法
    #[arg(long, overrides_with = "include_crypto")]
    pub no_include_crypto: bool,

    /// 计算文件指纹
    #[arg(long)]
    pub include_fingerprint: bool,

    /// 按文件名忽略的模式，可重复
    #[arg(long = "ignore-pattern", value_name = "GLOB")]
    pub ignore_patterns: Vec<String>,

    /// 不展开归档文件
    #[arg(long)]
    pub no_unpack: bool,

    /// 不使用结果缓存
    #[arg(long)]
    pub no_cache: bool,

    /// 保存结果到文件（默认输出到标准输出）
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// 显示缓存统计信息
    Stats,

    /// 清空缓存
    Clear,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// 显示当前配置
    Show,

    /// 显示配置文件路径
    Path,
}

/// 成对开关的取值：显式开启、显式关闭或保持配置
fn toggle(on: bool, off: bool, current: bool) -> bool {
    if on {
        true
    } else if off {
        false
    } else {
        current
    }
}

impl ScanArgs {
    /// 用命令行参数覆盖配置
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(jobs) = self.jobs {
            config.scan.jobs = jobs;
        }
        if let Some(timeout) = self.timeout {
            config.scan.timeout_secs = timeout;
        }
        if let Some(max_file_size) = self.max_file_size {
            config.scan.max_file_size = max_file_size;
        }

        config.scan.ignore_patterns.extend(self.ignore_patterns.iter().cloned());
        if self.no_unpack {
            config.scan.unpack_archives = false;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }

        let analysers = &mut config.analysers;
        analysers.include_copyright = toggle(self.include_copyright, self.no_include_copyright, analysers.include_copyright);
        analysers.include_crypto = toggle(self.include_crypto, self.no_include_crypto, analysers.include_crypto);
        analysers.include_fingerprint |= self.include_fingerprint;
    }
}
