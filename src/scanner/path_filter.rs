use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use tracing::warn;

use crate::config::ScanConfig;

/// 当前生效的 gitignore 规则，按目录深度从浅到深排列
pub type GitignoreStack = Vec<Arc<Gitignore>>;

/// 路径过滤器 - 隐藏文件、忽略模式和分层的 .gitignore 规则
pub struct PathFilter {
    /// 是否忽略隐藏文件
    ignore_hidden: bool,

    /// 按文件名匹配的忽略模式
    patterns: GlobSet,

    /// 在每个顶层路径上额外应用的 gitignore 文件
    default_gitignores: Vec<std::path::PathBuf>,
}

impl PathFilter {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignore_patterns {
            builder.add(Glob::new(pattern).with_context(|| format!("invalid ignore pattern '{}'", pattern))?);
        }

        Ok(Self {
            ignore_hidden: config.ignore_hidden,
            patterns: builder.build()?,
            default_gitignores: config.default_gitignores.clone(),
        })
    }

    /// 顶层路径的初始规则：默认 gitignore 以该路径为基准解析
    pub fn root_stack(&self, root: &Path) -> GitignoreStack {
        let mut stack = GitignoreStack::new();

        for file in &self.default_gitignores {
            let mut builder = GitignoreBuilder::new(root);
            if let Some(err) = builder.add(file) {
                warn!("Failed to read gitignore {}: {}", file.display(), err);
                continue;
            }
            match builder.build() {
                Ok(gitignore) => stack.push(Arc::new(gitignore)),
                Err(err) => warn!("Failed to parse gitignore {}: {}", file.display(), err),
            }
        }

        stack
    }

    /// 解析目录下的 .gitignore（如果存在），每个目录只解析一次
    pub fn load_gitignore(dir: &Path) -> Option<Arc<Gitignore>> {
        let file = dir.join(".gitignore");
        if !file.is_file() {
            return None;
        }

        let (gitignore, err) = Gitignore::new(&file);
        if let Some(err) = err {
            warn!("Problem parsing {}: {}", file.display(), err);
        }

        (!gitignore.is_empty()).then(|| Arc::new(gitignore))
    }

    /// 判断条目是否应该访问
    pub fn should_visit(&self, path: &Path, is_dir: bool, gitignores: &[Arc<Gitignore>]) -> bool {
        let Some(name) = path.file_name() else {
            return true;
        };

        if self.ignore_hidden && name.to_string_lossy().starts_with('.') {
            return false;
        }

        if self.patterns.is_match(name) {
            return false;
        }

        // 更深目录的规则优先，可以用 ! 重新包含
        for gitignore in gitignores.iter().rev() {
            match gitignore.matched(path, is_dir) {
                Match::Ignore(_) => return false,
                Match::Whitelist(_) => return true,
                Match::None => {}
            }
        }

        true
    }
}
