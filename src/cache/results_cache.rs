use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::CacheConfig;
use crate::errors::CacheError;

type CacheResult<T> = std::result::Result<T, CacheError>;

/// 快速路径记录：指向主键，并记录写入时文件的 stat 信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastpathRecord {
    pub cache_key: String,
    pub size: u64,
    pub mtime_ns: i64,
}

/// 缓存统计信息
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// 缓存目录
    pub directory: PathBuf,

    /// 分片数量
    pub shards: usize,

    /// 条目数（包含快速路径记录）
    pub entries: u64,

    /// 已存储的字节数
    pub total_bytes: u64,

    /// 大小上限
    pub size_limit: u64,

    /// 本进程内的命中次数
    pub hits: u64,

    /// 本进程内的未命中次数
    pub misses: u64,
}

/// 分片的 SQLite 结果缓存
///
/// 每个分片是一个独立的数据库文件，多个进程可以同时读写。
/// 超出大小上限时按写入顺序淘汰最早的条目。
pub struct ResultsCache {
    directory: PathBuf,
    shards: Vec<Mutex<Shard>>,
    size_limit: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// 一个分片：数据库连接和当前已存储的字节数
///
/// `stored_bytes` 在打开时统计一次，之后随每次写入事务更新。
struct Shard {
    conn: Connection,
    stored_bytes: u64,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        seq   INTEGER PRIMARY KEY AUTOINCREMENT,
        key   TEXT NOT NULL UNIQUE,
        value BLOB NOT NULL,
        size  INTEGER NOT NULL
    );
";

fn apply_pragmas(conn: &Connection) -> CacheResult<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    Ok(())
}

impl ResultsCache {
    /// 打开（必要时创建）缓存目录下的所有分片
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        Self::open_at(&config.directory, config.size_limit, config.shards)
    }

    pub fn open_at(directory: &Path, size_limit: u64, shards: usize) -> CacheResult<Self> {
        std::fs::create_dir_all(directory)?;

        let shard_count = shards.max(1);
        let mut connections = Vec::with_capacity(shard_count);

        for index in 0..shard_count {
            let conn = Connection::open(directory.join(format!("shard-{:03}.sqlite3", index)))?;
            apply_pragmas(&conn)?;
            conn.execute_batch(SCHEMA)?;
            let stored_bytes: i64 = conn.query_row("SELECT COALESCE(SUM(size), 0) FROM entries", [], |row| row.get(0))?;
            connections.push(Mutex::new(Shard {
                conn,
                stored_bytes: stored_bytes.max(0) as u64,
            }));
        }

        debug!("Opened results cache at {} ({} shards)", directory.display(), shard_count);

        Ok(Self {
            directory: directory.to_path_buf(),
            shards: connections,
            size_limit,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn shard_index(&self, key: &str) -> usize {
        (xxh3_64(key.as_bytes()) % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &str) -> CacheResult<MutexGuard<'_, Shard>> {
        let index = self.shard_index(key);
        self.shards[index].lock().map_err(|_| CacheError::Poisoned(index))
    }

    fn shard_limit(&self) -> u64 {
        self.size_limit / self.shards.len() as u64
    }

    fn read_raw(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let shard = self.shard(key)?;
        let value = shard
            .conn
            .query_row("SELECT value FROM entries WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn write_raw(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        let limit = self.shard_limit();
        let mut guard = self.shard(key)?;
        let shard = &mut *guard;
        let tx = shard.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let replaced: i64 = tx
            .query_row("SELECT size FROM entries WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?
            .unwrap_or(0);

        // 重新写入会获得新的序号，即"最近写入"
        let size = (key.len() + value.len()) as i64;
        tx.execute(
            "INSERT OR REPLACE INTO entries (key, value, size) VALUES (?1, ?2, ?3)",
            params![key, value, size],
        )?;

        let mut total = (shard.stored_bytes as i64 - replaced).max(0) + size;
        while total as u64 > limit {
            let oldest: Option<(i64, i64)> = tx
                .query_row("SELECT seq, size FROM entries ORDER BY seq ASC LIMIT 1", [], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .optional()?;

            match oldest {
                Some((seq, evicted)) => {
                    tx.execute("DELETE FROM entries WHERE seq = ?1", params![seq])?;
                    total -= evicted;
                }
                None => break,
            }
        }

        tx.commit()?;
        shard.stored_bytes = total.max(0) as u64;
        Ok(())
    }

    /// 按主键读取，命中时返回缓存的值（"没有发现"缓存为 null）
    pub fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let found = match self.read_raw(key)? {
            Some(raw) => Some(serde_json::from_slice(&raw)?),
            None => None,
        };

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };

        Ok(found)
    }

    /// 通过快速路径读取，stat 信息不一致时视为未命中
    pub fn get_with_fastpath(&self, fast_key: &str, size: u64, mtime_ns: i64) -> CacheResult<Option<Value>> {
        let record: Option<FastpathRecord> = match self.read_raw(fast_key)? {
            Some(raw) => serde_json::from_slice(&raw).ok(),
            None => None,
        };

        match record {
            Some(record) if record.size == size && record.mtime_ns == mtime_ns => self.get(&record.cache_key),
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// 写入主键
    pub fn set(&self, key: &str, value: &Value) -> CacheResult<()> {
        self.write_raw(key, &serde_json::to_vec(value)?)
    }

    /// 写入或刷新快速路径记录
    pub fn refresh_fastpath(&self, fast_key: &str, primary_key: &str, size: u64, mtime_ns: i64) -> CacheResult<()> {
        let record = FastpathRecord {
            cache_key: primary_key.to_string(),
            size,
            mtime_ns,
        };
        self.write_raw(fast_key, &serde_json::to_vec(&record)?)
    }

    /// 同时写入主键和快速路径记录
    pub fn set_with_fastpath(
        &self,
        primary_key: &str,
        value: &Value,
        fast_key: &str,
        size: u64,
        mtime_ns: i64,
    ) -> CacheResult<()> {
        self.set(primary_key, value)?;
        self.refresh_fastpath(fast_key, primary_key, size, mtime_ns)
    }

    /// 清空所有分片
    pub fn clear(&self) -> CacheResult<u64> {
        let mut removed = 0;
        for (index, shard) in self.shards.iter().enumerate() {
            let mut shard = shard.lock().map_err(|_| CacheError::Poisoned(index))?;
            removed += shard.conn.execute("DELETE FROM entries", [])? as u64;
            shard.stored_bytes = 0;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> CacheResult<CacheStats> {
        let mut entries = 0u64;
        let mut total_bytes = 0u64;

        for (index, shard) in self.shards.iter().enumerate() {
            let shard = shard.lock().map_err(|_| CacheError::Poisoned(index))?;
            let (count, bytes): (i64, i64) = shard.conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            entries += count as u64;
            total_bytes += bytes as u64;
        }

        Ok(CacheStats {
            directory: self.directory.clone(),
            shards: self.shards.len(),
            entries,
            total_bytes,
            size_limit: self.size_limit,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        })
    }

    /// 检查点写回 WAL 并关闭所有连接
    pub fn close(self) -> CacheResult<()> {
        for (index, shard) in self.shards.into_iter().enumerate() {
            let conn = shard.into_inner().map_err(|_| CacheError::Poisoned(index))?.conn;
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            conn.close().map_err(|(_, err)| CacheError::Sqlite(err))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_set_and_get() {
        let temp_dir = tempdir().unwrap();
        let cache = ResultsCache::open_at(temp_dir.path(), 1 << 20, 4).unwrap();

        assert_eq!(cache.get("license:v1:abc:3").unwrap(), None);

        cache.set("license:v1:abc:3", &json!({"spdx": ["MIT"]})).unwrap();
        cache.set("comments:v1:abc:3", &Value::Null).unwrap();

        assert_eq!(cache.get("license:v1:abc:3").unwrap(), Some(json!({"spdx": ["MIT"]})));
        // 缓存的 "没有发现" 也是命中
        assert_eq!(cache.get("comments:v1:abc:3").unwrap(), Some(Value::Null));

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_fastpath_is_validated_against_stat() {
        let temp_dir = tempdir().unwrap();
        let cache = ResultsCache::open_at(temp_dir.path(), 1 << 20, 2).unwrap();

        cache
            .set_with_fastpath("license:v1:abc:3", &json!(1), "fast:license:v1:/x:noopts", 3, 100)
            .unwrap();

        assert_eq!(cache.get_with_fastpath("fast:license:v1:/x:noopts", 3, 100).unwrap(), Some(json!(1)));
        assert_eq!(cache.get_with_fastpath("fast:license:v1:/x:noopts", 3, 101).unwrap(), None);
        assert_eq!(cache.get_with_fastpath("fast:license:v1:/x:noopts", 4, 100).unwrap(), None);
        assert_eq!(cache.get_with_fastpath("fast:license:v1:/y:noopts", 3, 100).unwrap(), None);
    }

    #[test]
    fn test_fastpath_to_evicted_primary_is_a_miss() {
        let temp_dir = tempdir().unwrap();
        let cache = ResultsCache::open_at(temp_dir.path(), 1 << 20, 1).unwrap();

        cache.refresh_fastpath("fast:k", "missing:primary", 1, 1).unwrap();
        assert_eq!(cache.get_with_fastpath("fast:k", 1, 1).unwrap(), None);
    }

    #[test]
    fn test_eviction_removes_least_recently_stored() {
        let temp_dir = tempdir().unwrap();
        let cache = ResultsCache::open_at(temp_dir.path(), 300, 1).unwrap();
        let payload = json!("x".repeat(80));

        cache.set("k1", &payload).unwrap();
        cache.set("k2", &payload).unwrap();
        cache.set("k3", &payload).unwrap();
        // 重新写入使 k1 成为最近写入
        cache.set("k1", &payload).unwrap();
        cache.set("k4", &payload).unwrap();

        assert_eq!(cache.get("k2").unwrap(), None);
        assert!(cache.get("k1").unwrap().is_some());
        assert!(cache.get("k4").unwrap().is_some());
        assert!(cache.stats().unwrap().total_bytes <= 300);
    }

    #[test]
    fn test_running_total_tracks_replacements_and_reopen() {
        let temp_dir = tempdir().unwrap();
        let payload = json!("x".repeat(80));
        {
            let cache = ResultsCache::open_at(temp_dir.path(), 300, 1).unwrap();
            cache.set("k1", &payload).unwrap();
            cache.set("k2", &payload).unwrap();
            // 覆盖写入不重复计数，因此不会淘汰 k2
            cache.set("k1", &payload).unwrap();
            cache.set("k1", &payload).unwrap();
            assert!(cache.get("k2").unwrap().is_some());

            let stored = cache.shards[0].lock().unwrap().stored_bytes;
            assert_eq!(stored, cache.stats().unwrap().total_bytes);
            cache.close().unwrap();
        }

        // 重新打开时从已有条目恢复字节数，继续按上限淘汰
        let cache = ResultsCache::open_at(temp_dir.path(), 300, 1).unwrap();
        let stored = cache.shards[0].lock().unwrap().stored_bytes;
        assert_eq!(stored, cache.stats().unwrap().total_bytes);
        cache.set("k3", &payload).unwrap();
        cache.set("k4", &payload).unwrap();
        assert_eq!(cache.get("k2").unwrap(), None);
        assert!(cache.get("k4").unwrap().is_some());
        let stored = cache.shards[0].lock().unwrap().stored_bytes;
        assert_eq!(stored, cache.stats().unwrap().total_bytes);
        assert!(cache.stats().unwrap().total_bytes <= 300);

        cache.clear().unwrap();
        assert_eq!(cache.shards[0].lock().unwrap().stored_bytes, 0);
    }

    #[test]
    fn test_clear_and_reopen() {
        let temp_dir = tempdir().unwrap();
        {
            let cache = ResultsCache::open_at(temp_dir.path(), 1 << 20, 2).unwrap();
            cache.set("persisted", &json!([1, 2])).unwrap();
            cache.close().unwrap();
        }

        let cache = ResultsCache::open_at(temp_dir.path(), 1 << 20, 2).unwrap();
        assert_eq!(cache.get("persisted").unwrap(), Some(json!([1, 2])));

        assert_eq!(cache.clear().unwrap(), 1);
        assert_eq!(cache.get("persisted").unwrap(), None);
    }
}
