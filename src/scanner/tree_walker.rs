use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use ignore::gitignore::Gitignore;
use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::archive::{archive_extension, extract_zip, extraction_dir};
use super::path_filter::{GitignoreStack, PathFilter};
use crate::config::ScanConfig;
use crate::errors::ScanError;

/// 待扫描的文件：绝对路径和用于计算相对路径的根
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    pub path: PathBuf,
    pub root: Option<PathBuf>,
}

impl ScanTask {
    /// 相对于根的路径，没有根时为绝对路径
    pub fn relpath(&self) -> String {
        relative_to(&self.path, self.root.as_deref())
    }
}

/// 遍历过程中产生的事件
#[derive(Debug)]
pub enum WalkEvent {
    File(ScanTask),
    Ignored(String),
    ExtractionFailed(ScanError),
}

pub(crate) fn relative_to(path: &Path, root: Option<&Path>) -> String {
    root.and_then(|root| path.strip_prefix(root).ok())
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// 解压区域：临时目录或配置的固定目录
enum Scratch {
    Temporary(TempDir),
    Fixed(PathBuf),
}

impl Scratch {
    fn path(&self) -> &Path {
        match self {
            Scratch::Temporary(dir) => dir.path(),
            Scratch::Fixed(path) => path,
        }
    }
}

/// 目录树遍历器 - 应用路径过滤，展开归档文件
///
/// 解压出的目录会被记录下来，在 `cleanup` 或遍历器被丢弃时删除。
pub struct TreeWalker {
    filter: PathFilter,
    unpack_archives: bool,
    unpack_dir: Option<PathBuf>,
    scratch: Option<Scratch>,
    extracted: Vec<PathBuf>,
}

impl TreeWalker {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        Ok(Self {
            filter: PathFilter::new(config)?,
            unpack_archives: config.unpack_archives,
            unpack_dir: config.unpack_dir.clone(),
            scratch: None,
            extracted: Vec::new(),
        })
    }

    /// 已解压的目录
    pub fn extracted_dirs(&self) -> &[PathBuf] {
        &self.extracted
    }

    /// 遍历一个顶层路径，目录的根为其自身，文件的根为其父目录
    pub fn walk<F: FnMut(WalkEvent)>(&mut self, path: &Path, sink: &mut F) -> Result<()> {
        let path = std::fs::canonicalize(path)?;

        if path.is_dir() {
            let stack = self.filter.root_stack(&path);
            self.walk_dir(&path, &path, stack, sink)
        } else {
            let root = path.parent().map(Path::to_path_buf);
            self.visit_file(&path, root.as_deref(), sink)
        }
    }

    fn walk_dir<F: FnMut(WalkEvent)>(
        &mut self,
        dir: &Path,
        root: &Path,
        base: GitignoreStack,
        sink: &mut F,
    ) -> Result<()> {
        // (目录深度, 该目录的 .gitignore)
        let mut nested: Vec<(usize, Arc<Gitignore>)> = Vec::new();
        let mut entries = WalkDir::new(dir).follow_links(false).sort_by_file_name().into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Failed to read directory entry: {}", err);
                    continue;
                }
            };

            let depth = entry.depth();
            let path = entry.path();
            let is_dir = entry.file_type().is_dir();

            // 离开目录后，其规则不再生效
            nested.retain(|(d, _)| *d < depth);

            if depth > 0 {
                let active: GitignoreStack = base
                    .iter()
                    .cloned()
                    .chain(nested.iter().map(|(_, gitignore)| gitignore.clone()))
                    .collect();

                if !self.filter.should_visit(path, is_dir, &active) {
                    sink(WalkEvent::Ignored(relative_to(path, Some(root))));
                    if is_dir {
                        entries.skip_current_dir();
                    }
                    continue;
                }
            }

            if is_dir {
                if let Some(gitignore) = PathFilter::load_gitignore(path) {
                    nested.push((depth, gitignore));
                }
            } else if path.is_file() {
                self.visit_file(path, Some(root), sink)?;
            }
        }

        Ok(())
    }

    fn visit_file<F: FnMut(WalkEvent)>(&mut self, path: &Path, root: Option<&Path>, sink: &mut F) -> Result<()> {
        let extension = if self.unpack_archives { archive_extension(path) } else { None };

        let Some(extension) = extension else {
            sink(WalkEvent::File(ScanTask {
                path: path.to_path_buf(),
                root: root.map(Path::to_path_buf),
            }));
            return Ok(());
        };

        let scratch = self.scratch_path()?;
        let destination = extraction_dir(&scratch, path, extension);

        match extract_zip(path, &destination) {
            Ok(()) => {
                debug!("Extracted {} to {}", path.display(), destination.display());
                self.extracted.push(destination.clone());
                // 归档内容不继承任何 gitignore 规则
                self.walk_dir(&destination, &scratch, GitignoreStack::new(), sink)
            }
            Err(err) => {
                let relpath = relative_to(path, root);
                warn!("Unable to extract archive {}: {:#}", relpath, err);
                // 部分解压的内容同样需要清理
                if destination.exists() {
                    self.extracted.push(destination);
                }
                sink(WalkEvent::ExtractionFailed(ScanError::Extraction {
                    path: relpath,
                    message: format!("{:#}", err),
                }));
                Ok(())
            }
        }
    }

    fn scratch_path(&mut self) -> Result<PathBuf> {
        if self.scratch.is_none() {
            let scratch = match &self.unpack_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    Scratch::Fixed(std::fs::canonicalize(dir)?)
                }
                None => Scratch::Temporary(tempfile::Builder::new().prefix("deepscan-").tempdir()?),
            };
            self.scratch = Some(scratch);
        }

        match &self.scratch {
            Some(scratch) => Ok(scratch.path().to_path_buf()),
            None => anyhow::bail!("scratch area unavailable"),
        }
    }

    /// 删除所有解压出的目录
    pub fn cleanup(&mut self) {
        for dir in self.extracted.drain(..) {
            if dir.exists() {
                if let Err(err) = std::fs::remove_dir_all(&dir) {
                    warn!("Failed to remove {}: {}", dir.display(), err);
                }
            }
        }

        // 临时目录随 TempDir 一起删除
        self.scratch = None;
    }
}

impl Drop for TreeWalker {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::archive::tests::write_zip;
    use std::fs;
    use tempfile::tempdir;

    fn collect(walker: &mut TreeWalker, path: &Path) -> (Vec<String>, Vec<String>, Vec<ScanError>) {
        let mut files = Vec::new();
        let mut ignored = Vec::new();
        let mut errors = Vec::new();

        walker
            .walk(path, &mut |event| match event {
                WalkEvent::File(task) => files.push(task.relpath()),
                WalkEvent::Ignored(relpath) => ignored.push(relpath),
                WalkEvent::ExtractionFailed(err) => errors.push(err),
            })
            .unwrap();

        files.sort();
        ignored.sort();
        (files, ignored, errors)
    }

    #[test]
    fn test_walk_applies_filters_and_gitignores() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src/gen")).unwrap();
        fs::write(root.join(".gitignore"), "*.tmp\ngen/\n").unwrap();
        fs::write(root.join("a.py"), "x = 1\n").unwrap();
        fs::write(root.join("b.tmp"), "").unwrap();
        fs::write(root.join("debug.log"), "").unwrap();
        fs::write(root.join("src/lib.rs"), "").unwrap();
        fs::write(root.join("src/gen/out.rs"), "").unwrap();

        let config = ScanConfig {
            ignore_patterns: vec!["*.log".to_string()],
            ..ScanConfig::default()
        };
        let mut walker = TreeWalker::new(&config).unwrap();
        let (files, ignored, errors) = collect(&mut walker, root);

        assert_eq!(files, vec!["a.py".to_string(), "src/lib.rs".to_string()]);
        assert_eq!(
            ignored,
            vec![".gitignore".to_string(), "b.tmp".to_string(), "debug.log".to_string(), "src/gen".to_string()]
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn test_single_file_root_is_parent() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("LICENSE");
        fs::write(&file, "MIT").unwrap();

        let mut walker = TreeWalker::new(&ScanConfig::default()).unwrap();
        let (files, _, _) = collect(&mut walker, &file);
        assert_eq!(files, vec!["LICENSE".to_string()]);
    }

    #[test]
    fn test_archives_are_expanded_without_gitignores() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().join("project");
        fs::create_dir(&root).unwrap();
        fs::write(root.join(".gitignore"), "*.tmp\n").unwrap();
        write_zip(&root.join("pkg.whl"), &[("pkg/mod.py", "# m\n"), ("data.tmp", "x")]);
        fs::write(root.join("broken.jar"), "not a zip").unwrap();

        let scratch = temp_dir.path().join("scratch");
        let config = ScanConfig {
            unpack_dir: Some(scratch.clone()),
            ..ScanConfig::default()
        };
        let mut walker = TreeWalker::new(&config).unwrap();
        let (files, _, errors) = collect(&mut walker, &root);

        assert_eq!(files, vec!["pkg/data.tmp".to_string(), "pkg/pkg/mod.py".to_string()]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ScanError::Extraction { path, .. } if path == "broken.jar"));

        assert_eq!(walker.extracted_dirs().len(), 1);
        assert!(scratch.join("pkg").exists());

        walker.cleanup();
        assert!(!scratch.join("pkg").exists());
    }

    #[test]
    fn test_archives_are_left_alone_when_unpacking_is_disabled() {
        let temp_dir = tempdir().unwrap();
        write_zip(&temp_dir.path().join("pkg.zip"), &[("a.txt", "a")]);

        let config = ScanConfig {
            unpack_archives: false,
            ..ScanConfig::default()
        };
        let mut walker = TreeWalker::new(&config).unwrap();
        let (files, _, _) = collect(&mut walker, temp_dir.path());
        assert_eq!(files, vec!["pkg.zip".to_string()]);
    }
}
