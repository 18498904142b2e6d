//! 分析器能力接口与内置分析器
//!
//! 分析器运行在独立的 worker 进程中，因此它们通过可序列化的 [`AnalyserSpec`]
//! 描述，由调度端和 worker 端各自构建同一组分析器。

pub mod command;
pub mod comments;
pub mod corpus;
pub mod crypto;
pub mod fingerprint;
pub mod language;
pub mod license;
pub mod matching;
pub mod textutils;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use command::{CommandAnalyser, CommandAnalyserConfig};
pub use comments::CommentAnalyser;
pub use crypto::CryptoAnalyser;
pub use fingerprint::FingerprintAnalyser;
pub use license::LicenseAnalyser;

/// 分析器选项，用于缓存指纹和扫描结果的可复现性记录
pub type AnalyserOptions = BTreeMap<String, Value>;

/// 单个分析器在单个文件上的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub category: String,
    pub data: Value,
}

impl AnalysisResult {
    pub fn new(category: impl Into<String>, data: Value) -> Self {
        Self {
            category: category.into(),
            data,
        }
    }
}

/// 分析器能力接口
///
/// `apply` 通过返回错误来表示失败，调度器是唯一的错误捕获与记录点。
pub trait Analyser: Send + Sync {
    /// 结果类别名，同一组分析器内唯一
    fn category(&self) -> &str;

    /// 行为变化时递增，使旧缓存自动失效
    fn version(&self) -> &str {
        "1"
    }

    /// 是否分析该文件（存在性、大小上限、内容嗅探）
    fn accepts(&self, path: &Path) -> bool;

    /// 影响结果的选项，必须对同一配置保持稳定
    fn options(&self) -> AnalyserOptions {
        AnalyserOptions::new()
    }

    /// 分析文件，没有发现时返回 None
    fn apply(&self, path: &Path, root: Option<&Path>) -> Result<Option<AnalysisResult>>;
}

/// 可序列化的分析器描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalyserSpec {
    License { include_copyright: bool, max_file_size: u64 },
    Comments { include_copyright: bool, max_file_size: u64 },
    Crypto { max_file_size: u64 },
    Fingerprint { max_file_size: u64 },
    Command(CommandAnalyserConfig),
}

impl AnalyserSpec {
    /// 描述对应的类别名
    pub fn category(&self) -> &str {
        match self {
            AnalyserSpec::License { .. } => license::CATEGORY,
            AnalyserSpec::Comments { .. } => comments::CATEGORY,
            AnalyserSpec::Crypto { .. } => crypto::CATEGORY,
            AnalyserSpec::Fingerprint { .. } => fingerprint::CATEGORY,
            AnalyserSpec::Command(config) => &config.category,
        }
    }

    /// 构建分析器实例
    pub fn build(&self) -> Result<Box<dyn Analyser>> {
        let analyser: Box<dyn Analyser> = match self {
            AnalyserSpec::License { include_copyright, max_file_size } => {
                Box::new(LicenseAnalyser::new(*include_copyright, *max_file_size))
            }
            AnalyserSpec::Comments { include_copyright, max_file_size } => {
                Box::new(CommentAnalyser::new(*include_copyright, *max_file_size))
            }
            AnalyserSpec::Crypto { max_file_size } => Box::new(CryptoAnalyser::new(*max_file_size)),
            AnalyserSpec::Fingerprint { max_file_size } => {
                Box::new(FingerprintAnalyser::new(*max_file_size))
            }
            AnalyserSpec::Command(config) => Box::new(CommandAnalyser::new(config.clone())?),
        };
        Ok(analyser)
    }
}

/// 一组已构建的分析器，保持配置顺序
pub struct AnalyserSet {
    analysers: Vec<Box<dyn Analyser>>,
}

impl AnalyserSet {
    /// 从描述列表构建，类别名重复时报错
    pub fn from_specs(specs: &[AnalyserSpec]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut analysers = Vec::with_capacity(specs.len());

        for spec in specs {
            if !seen.insert(spec.category().to_string()) {
                bail!("duplicate analyser category '{}'", spec.category());
            }
            analysers.push(spec.build()?);
        }

        Ok(Self { analysers })
    }

    pub fn get(&self, category: &str) -> Option<&dyn Analyser> {
        self.analysers
            .iter()
            .find(|a| a.category() == category)
            .map(|a| a.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Analyser> {
        self.analysers.iter().map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.analysers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analysers.is_empty()
    }

    /// 所有分析器选项的合并
    pub fn merged_options(&self) -> AnalyserOptions {
        let mut merged = AnalyserOptions::new();
        for analyser in &self.analysers {
            merged.extend(analyser.options());
        }
        merged
    }
}
