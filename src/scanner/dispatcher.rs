use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use super::tree_walker::ScanTask;
use crate::analyser::AnalyserSet;
use crate::cache::{content_hash, fastpath_key, file_stat, options_fingerprint, primary_key, ResultsCache};
use crate::errors::{CacheError, ScanError};
use crate::pool::{JobOutcome, JobRequest, WaitStatus, WorkerPool};

/// 单个文件的扫描结果
#[derive(Debug, Clone, Default)]
pub struct FileReport {
    pub relpath: String,
    /// 类别 -> 数据，按分析器顺序
    pub results: Map<String, Value>,
    pub errors: Vec<ScanError>,
    pub cache_hits: usize,
}

/// 缓存未命中、需要提交给 worker 的分析
#[derive(Debug, Clone)]
struct Miss {
    category: String,
    keys: Option<CacheKeys>,
}

/// 写回缓存时使用的键
#[derive(Debug, Clone)]
struct CacheKeys {
    primary: String,
    fastpath: Option<String>,
    size: u64,
    mtime_ns: i64,
}

/// 缓存查询的结果
#[derive(Debug, Default)]
struct Lookup {
    /// 按分析器顺序选中的类别
    selected: Vec<String>,
    hits: Vec<(String, Value)>,
    misses: Vec<Miss>,
}

/// 每个类别的版本与选项指纹
#[derive(Debug, Clone)]
struct CategoryIdentity {
    version: String,
    fingerprint: Option<String>,
}

fn category_identities(analysers: &AnalyserSet) -> HashMap<String, CategoryIdentity> {
    analysers
        .iter()
        .map(|analyser| {
            (
                analyser.category().to_string(),
                CategoryIdentity {
                    version: analyser.version().to_string(),
                    fingerprint: options_fingerprint(&analyser.options()),
                },
            )
        })
        .collect()
}

/// 在阻塞线程上完成分析器选择和缓存查询
fn lookup(
    analysers: &AnalyserSet,
    identities: &HashMap<String, CategoryIdentity>,
    cache: Option<&ResultsCache>,
    use_fastpath: bool,
    path: &Path,
) -> std::result::Result<Lookup, CacheError> {
    let mut lookup = Lookup::default();

    let selected: Vec<&str> = analysers
        .iter()
        .filter(|analyser| analyser.accepts(path))
        .map(|analyser| analyser.category())
        .collect();
    lookup.selected = selected.iter().map(|c| c.to_string()).collect();

    let Some(cache) = cache else {
        lookup.misses = selected
            .into_iter()
            .map(|category| Miss { category: category.to_string(), keys: None })
            .collect();
        return Ok(lookup);
    };

    // 文件在选择之后消失时不使用缓存，交给分析器报告错误
    let Ok((size, mtime_ns)) = file_stat(path) else {
        lookup.misses = selected
            .into_iter()
            .map(|category| Miss { category: category.to_string(), keys: None })
            .collect();
        return Ok(lookup);
    };

    let mut hash: Option<String> = None;

    for (index, category) in selected.iter().copied().enumerate() {
        let Some(identity) = identities.get(category) else {
            continue;
        };
        let fingerprint = identity.fingerprint.as_deref();

        let fast = use_fastpath.then(|| fastpath_key(category, &identity.version, path, fingerprint));
        if let Some(fast) = &fast {
            if let Some(value) = cache.get_with_fastpath(fast, size, mtime_ns)? {
                lookup.hits.push((category.to_string(), value));
                continue;
            }
        }

        if hash.is_none() {
            match content_hash(path) {
                Ok(digest) => hash = Some(digest),
                Err(err) => {
                    // 文件不可读属于单个文件的问题，剩余的分析交给 worker，由分析器报告错误
                    warn!("Unable to hash {}, bypassing cache: {}", path.display(), err);
                    lookup.misses.extend(
                        selected[index..]
                            .iter()
                            .map(|category| Miss { category: category.to_string(), keys: None }),
                    );
                    return Ok(lookup);
                }
            }
        }
        let digest = hash.as_deref().unwrap_or_default();
        let primary = primary_key(category, &identity.version, digest, size, fingerprint);

        if let Some(value) = cache.get(&primary)? {
            if let Some(fast) = &fast {
                cache.refresh_fastpath(fast, &primary, size, mtime_ns)?;
            }
            lookup.hits.push((category.to_string(), value));
            continue;
        }

        lookup.misses.push(Miss {
            category: category.to_string(),
            keys: Some(CacheKeys {
                primary,
                fastpath: fast,
                size,
                mtime_ns,
            }),
        });
    }

    Ok(lookup)
}

/// 扫描调度器 - 查询缓存，把未命中的分析提交给 worker 进程池，并执行超时
pub struct ScanDispatcher {
    pool: WorkerPool,
    analysers: Arc<AnalyserSet>,
    identities: Arc<HashMap<String, CategoryIdentity>>,
    cache: Option<Arc<ResultsCache>>,
    use_fastpath: bool,
    timeout: Duration,
}

impl ScanDispatcher {
    pub fn new(
        pool: WorkerPool,
        analysers: Arc<AnalyserSet>,
        cache: Option<Arc<ResultsCache>>,
        use_fastpath: bool,
        timeout: Duration,
    ) -> Self {
        let identities = category_identities(&analysers);

        Self {
            pool,
            analysers,
            identities: Arc::new(identities),
            cache,
            use_fastpath,
            timeout,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn into_pool(self) -> WorkerPool {
        self.pool
    }

    /// 扫描单个文件，只有缓存错误和进程池关闭会返回错误
    pub async fn scan_file(&self, task: &ScanTask) -> Result<FileReport> {
        let relpath = task.relpath();
        let mut report = FileReport {
            relpath: relpath.clone(),
            ..FileReport::default()
        };

        let lookup = {
            let analysers = self.analysers.clone();
            let identities = self.identities.clone();
            let cache = self.cache.clone();
            let use_fastpath = self.use_fastpath;
            let path = task.path.clone();
            tokio::task::spawn_blocking(move || {
                lookup(&analysers, &identities, cache.as_deref(), use_fastpath, &path)
            })
            .await??
        };

        let mut found: HashMap<String, Value> = HashMap::new();
        report.cache_hits = lookup.hits.len();
        for (category, value) in lookup.hits {
            debug!("Cache hit for {} using '{}'", relpath, category);
            if !value.is_null() {
                found.insert(category, value);
            }
        }

        // 先全部提交，再逐个等待
        let mut submitted = Vec::with_capacity(lookup.misses.len());
        for miss in lookup.misses {
            let handle = self.pool.submit(JobRequest {
                category: miss.category.clone(),
                path: task.path.clone(),
                root: task.root.clone(),
            })?;
            submitted.push((miss, handle));
        }

        for (miss, mut handle) in submitted {
            match self.pool.wait(&mut handle, self.timeout).await {
                WaitStatus::Ready(JobOutcome::Completed(data)) => {
                    if let Some(keys) = miss.keys {
                        self.store(keys, data.clone().unwrap_or(Value::Null)).await?;
                    }
                    if let Some(data) = data {
                        found.insert(miss.category, data);
                    }
                }
                WaitStatus::Ready(JobOutcome::Failed(message)) => {
                    let err = ScanError::Analyser {
                        path: relpath.clone(),
                        category: miss.category,
                        message,
                    };
                    error!("{}", err);
                    report.errors.push(err);
                }
                WaitStatus::Ready(JobOutcome::Crashed(exit_code)) => {
                    let err = ScanError::Crash {
                        path: relpath.clone(),
                        category: miss.category,
                        exit_code,
                    };
                    error!("{}", err);
                    report.errors.push(err);
                }
                WaitStatus::Ready(JobOutcome::Abandoned) => {
                    debug!("Analysis of {} using '{}' was abandoned", relpath, miss.category);
                }
                WaitStatus::Pending => {
                    match self.pool.find_hosting_worker(&handle) {
                        Some(worker) => {
                            warn!(
                                "Terminating worker {:?} stuck on {} using '{}'",
                                worker.pid, relpath, miss.category
                            );
                            self.pool.terminate(worker);
                        }
                        // 任务仍在排队，丢弃句柄后会被跳过
                        None => debug!("Job {} timed out before it was started", handle.id()),
                    }

                    let err = ScanError::Timeout {
                        path: relpath.clone(),
                        category: miss.category,
                        timeout_secs: self.timeout.as_secs(),
                    };
                    error!("{}", err);
                    report.errors.push(err);
                }
            }
        }

        // 结果按分析器顺序排列
        for category in &lookup.selected {
            if let Some(value) = found.remove(category) {
                report.results.insert(category.clone(), value);
            }
        }

        Ok(report)
    }

    async fn store(&self, keys: CacheKeys, value: Value) -> Result<()> {
        let Some(cache) = self.cache.clone() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || match &keys.fastpath {
            Some(fast) => cache.set_with_fastpath(&keys.primary, &value, fast, keys.size, keys.mtime_ns),
            None => cache.set(&keys.primary, &value),
        })
        .await??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::{AnalyserSpec, CommandAnalyserConfig};
    use std::fs;
    use tempfile::tempdir;

    fn analysers() -> AnalyserSet {
        AnalyserSet::from_specs(&[
            AnalyserSpec::Fingerprint { max_file_size: 1_000_000 },
            AnalyserSpec::Command(CommandAnalyserConfig {
                category: "tool".to_string(),
                program: "true".to_string(),
                args: Vec::new(),
                patterns: Vec::new(),
                version: "1".to_string(),
                max_file_size: None,
            }),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup_without_cache_submits_everything() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, "hello").unwrap();

        let analysers = analysers();
        let found = lookup(&analysers, &category_identities(&analysers), None, true, &file).unwrap();

        assert_eq!(found.selected, vec!["wfp".to_string(), "tool".to_string()]);
        assert!(found.hits.is_empty());
        assert!(found.misses.iter().all(|miss| miss.keys.is_none()));
    }

    #[test]
    fn test_lookup_keys_misses_for_readable_files() {
        let temp_dir = tempdir().unwrap();
        let cache = ResultsCache::open_at(&temp_dir.path().join("cache"), 1 << 20, 2).unwrap();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, "hello").unwrap();

        let analysers = analysers();
        let found = lookup(&analysers, &category_identities(&analysers), Some(&cache), true, &file).unwrap();

        assert_eq!(found.misses.len(), 2);
        assert!(found.misses.iter().all(|miss| miss.keys.as_ref().is_some_and(|k| k.fastpath.is_some())));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_lookup_treats_unreadable_file_as_plain_misses() {
        let temp_dir = tempdir().unwrap();
        let cache = ResultsCache::open_at(&temp_dir.path().join("cache"), 1 << 20, 2).unwrap();

        // stat 成功但读取失败 (EIO)
        let path = Path::new("/proc/self/mem");
        let analysers = analysers();
        let found = lookup(&analysers, &category_identities(&analysers), Some(&cache), true, path).unwrap();

        assert!(found.hits.is_empty());
        assert_eq!(
            found.misses.iter().map(|miss| miss.category.as_str()).collect::<Vec<_>>(),
            vec!["wfp", "tool"]
        );
        assert!(found.misses.iter().all(|miss| miss.keys.is_none()));
    }
}
