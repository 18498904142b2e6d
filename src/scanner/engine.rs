use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::ScanDispatcher;
use super::tree_walker::{ScanTask, TreeWalker, WalkEvent};
use crate::analyser::{AnalyserOptions, AnalyserSet, AnalyserSpec};
use crate::cache::ResultsCache;
use crate::config::ScanConfig;
use crate::errors::ScanError;
use crate::models::Scan;
use crate::pool::{WorkerCommand, WorkerPool};

type PathIgnoredCallback = Box<dyn Fn(&str) + Send + Sync>;
type FileCompletedCallback = Box<dyn Fn(&str, &Map<String, Value>, &[ScanError]) + Send + Sync>;
type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// 扫描器 - 遍历目录树，把文件分派给 worker 进程池，汇总结果
pub struct Scanner {
    config: ScanConfig,
    specs: Vec<AnalyserSpec>,
    analysers: Arc<AnalyserSet>,
    cache: Option<Arc<ResultsCache>>,
    use_fastpath: bool,
    worker_command: Option<WorkerCommand>,
    cancel: CancellationToken,
    on_path_ignored: Option<PathIgnoredCallback>,
    on_file_scan_completed: Option<FileCompletedCallback>,
    on_progress: Option<ProgressCallback>,
}

impl Scanner {
    pub fn new(config: ScanConfig, specs: Vec<AnalyserSpec>) -> Result<Self> {
        let analysers = AnalyserSet::from_specs(&specs)?;

        Ok(Self {
            config,
            specs,
            analysers: Arc::new(analysers),
            cache: None,
            use_fastpath: true,
            worker_command: None,
            cancel: CancellationToken::new(),
            on_path_ignored: None,
            on_file_scan_completed: None,
            on_progress: None,
        })
    }

    /// 使用结果缓存
    pub fn with_cache(mut self, cache: Arc<ResultsCache>, use_fastpath: bool) -> Self {
        self.cache = Some(cache);
        self.use_fastpath = use_fastpath;
        self
    }

    /// 替换 worker 进程的启动命令（默认为当前可执行文件的 `worker` 子命令）
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    pub fn on_path_ignored(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_path_ignored = Some(Box::new(callback));
        self
    }

    pub fn on_file_scan_completed(
        mut self,
        callback: impl Fn(&str, &Map<String, Value>, &[ScanError]) + Send + Sync + 'static,
    ) -> Self {
        self.on_file_scan_completed = Some(Box::new(callback));
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// 所有分析器选项的合并
    pub fn options(&self) -> AnalyserOptions {
        self.analysers.merged_options()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 请求取消，正在执行的文件完成前停止分派新文件
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 扫描给定路径
    ///
    /// 先完整遍历以得到文件总数，再并发分派。解压出的目录在任何情况下都会被清理。
    pub async fn run(&self, paths: &[PathBuf]) -> Result<Scan> {
        let started = Instant::now();
        let mut scan = Scan::new(self.options());

        let (mut walker, events) = {
            let config = self.config.clone();
            let paths = paths.to_vec();
            tokio::task::spawn_blocking(move || -> Result<(TreeWalker, Vec<WalkEvent>)> {
                let mut walker = TreeWalker::new(&config)?;
                let mut events = Vec::new();
                for path in &paths {
                    if !path.exists() {
                        warn!("Path does not exist: {}", path.display());
                        continue;
                    }
                    walker
                        .walk(path, &mut |event| events.push(event))
                        .with_context(|| format!("failed to walk {}", path.display()))?;
                }
                Ok((walker, events))
            })
            .await??
        };

        let mut tasks: Vec<ScanTask> = Vec::new();
        for event in events {
            match event {
                WalkEvent::File(task) => tasks.push(task),
                WalkEvent::Ignored(relpath) => {
                    scan.stats.ignored += 1;
                    if let Some(callback) = &self.on_path_ignored {
                        callback(&relpath);
                    }
                }
                WalkEvent::ExtractionFailed(err) => {
                    let relpath = match &err {
                        ScanError::Extraction { path, .. } => path.clone(),
                        _ => String::new(),
                    };
                    scan.add_errors(&relpath, vec![err]);
                }
            }
        }

        scan.stats.total = tasks.len();
        info!("Found {} files to scan ({} ignored)", scan.stats.total, scan.stats.ignored);

        let outcome = if tasks.is_empty() {
            Ok(())
        } else {
            self.dispatch(tasks, &mut scan).await
        };

        walker.cleanup();
        scan.stats.duration_ms = started.elapsed().as_millis() as u64;
        outcome?;

        Ok(scan)
    }

    async fn dispatch(&self, tasks: Vec<ScanTask>, scan: &mut Scan) -> Result<()> {
        let command = match &self.worker_command {
            Some(command) => command.clone(),
            None => WorkerCommand::current_exe()?,
        };

        let jobs = self.config.effective_jobs().min(tasks.len()).max(1);
        let pool = WorkerPool::spawn(jobs, command, &self.specs).await?;
        debug!("Dispatching {} files to {} workers", tasks.len(), pool.size());

        let dispatcher = Arc::new(ScanDispatcher::new(
            pool,
            self.analysers.clone(),
            self.cache.clone(),
            self.use_fastpath,
            self.config.timeout(),
        ));

        let total = tasks.len();
        let result = {
            let mut reports = stream::iter(tasks)
                .map(|task| {
                    let dispatcher = dispatcher.clone();
                    async move { dispatcher.scan_file(&task).await }
                })
                .buffer_unordered(jobs);

            loop {
                let next = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!("Scan cancelled after {} of {} files", scan.stats.finished, total);
                        break Ok(());
                    }
                    next = reports.next() => next,
                };

                let Some(report) = next else {
                    break Ok(());
                };

                match report {
                    Ok(report) => {
                        scan.stats.finished += 1;
                        scan.stats.cache_hits += report.cache_hits;

                        if let Some(callback) = &self.on_file_scan_completed {
                            callback(&report.relpath, &report.results, &report.errors);
                        }
                        scan.add_file(&report.relpath, report.results, report.errors);

                        if let Some(callback) = &self.on_progress {
                            callback(scan.stats.finished, total);
                        }
                    }
                    Err(err) => break Err(err),
                }
            }
        };

        match Arc::try_unwrap(dispatcher) {
            Ok(dispatcher) => dispatcher.into_pool().shutdown().await,
            Err(_) => warn!("Worker pool still in use, relying on drop to stop workers"),
        }

        result
    }
}
