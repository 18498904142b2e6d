use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::matching::{is_regular_file, within_size_limit};
use super::{AnalyserOptions, Analyser, AnalysisResult};

fn default_version() -> String {
    "1".to_string()
}

/// 外部工具分析器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAnalyserConfig {
    /// 结果类别名
    pub category: String,
    /// 可执行程序
    pub program: String,
    /// 参数，`{path}` 和 `{root}` 会被替换
    #[serde(default)]
    pub args: Vec<String>,
    /// 按文件名匹配的 glob，为空时接受所有文件
    #[serde(default)]
    pub patterns: Vec<String>,
    /// 工具行为变化时修改，使缓存失效
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub max_file_size: Option<u64>,
}

/// 运行外部程序并把 stdout 解析为 JSON 的分析器
pub struct CommandAnalyser {
    config: CommandAnalyserConfig,
    patterns: Option<GlobSet>,
}

impl CommandAnalyser {
    pub fn new(config: CommandAnalyserConfig) -> Result<Self> {
        let patterns = if config.patterns.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &config.patterns {
                builder.add(Glob::new(pattern).with_context(|| format!("invalid pattern '{}'", pattern))?);
            }
            Some(builder.build()?)
        };

        Ok(Self { config, patterns })
    }

    fn expand_args(&self, path: &Path, root: Option<&Path>) -> Vec<String> {
        let path = path.to_string_lossy();
        let root = root.map(|r| r.to_string_lossy().to_string()).unwrap_or_default();

        self.config
            .args
            .iter()
            .map(|arg| arg.replace("{path}", &path).replace("{root}", &root))
            .collect()
    }
}

impl Analyser for CommandAnalyser {
    fn category(&self) -> &str {
        &self.config.category
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn accepts(&self, path: &Path) -> bool {
        if !is_regular_file(path) {
            return false;
        }

        if let Some(max) = self.config.max_file_size {
            if !within_size_limit(path, max) {
                return false;
            }
        }

        match (&self.patterns, path.file_name()) {
            (None, _) => true,
            (Some(set), Some(name)) => set.is_match(name),
            (Some(_), None) => false,
        }
    }

    fn options(&self) -> AnalyserOptions {
        let mut args = vec![Value::String(self.config.program.clone())];
        args.extend(self.config.args.iter().cloned().map(Value::String));
        AnalyserOptions::from([(format!("{}.command", self.config.category), Value::Array(args))])
    }

    fn apply(&self, path: &Path, root: Option<&Path>) -> Result<Option<AnalysisResult>> {
        let output = Command::new(&self.config.program)
            .args(self.expand_args(path, root))
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run '{}'", self.config.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "'{}' exited with {}: {}",
                self.config.program,
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(None);
        }

        let data: Value = serde_json::from_str(stdout.trim())
            .with_context(|| format!("'{}' did not print JSON", self.config.program))?;

        Ok(Some(AnalysisResult::new(self.config.category.clone(), data)))
    }
}
