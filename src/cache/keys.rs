//! 缓存键与文件指纹

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde_json::Value;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::analyser::AnalyserOptions;

/// 流式哈希时的读取块大小
const HASH_CHUNK: usize = 64 * 1024;

/// 文件内容的 xxh3-128 摘要
pub fn content_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buffer = vec![0u8; HASH_CHUNK];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:032x}", hasher.digest128()))
}

/// 文件的 (大小, 纳秒级修改时间)
pub fn file_stat(path: &Path) -> io::Result<(u64, i64)> {
    let metadata = std::fs::metadata(path)?;
    let mtime_ns = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    Ok((metadata.len(), mtime_ns))
}

/// 递归排序对象的键，得到稳定的 JSON 表示
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k.clone(), canonical(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// 分析器选项的指纹，没有选项时返回 None
pub fn options_fingerprint(options: &AnalyserOptions) -> Option<String> {
    if options.is_empty() {
        return None;
    }

    let canonical: serde_json::Map<String, Value> =
        options.iter().map(|(k, v)| (k.clone(), canonical(v))).collect();
    let encoded = Value::Object(canonical).to_string();
    Some(format!("{:016x}", xxh3_64(encoded.as_bytes())))
}

/// 内容寻址的主键
pub fn primary_key(
    category: &str,
    version: &str,
    content_hash: &str,
    size: u64,
    fingerprint: Option<&str>,
) -> String {
    match fingerprint {
        Some(fp) => format!("{}:v{}:{}:{}:opts:{}", category, version, content_hash, size, fp),
        None => format!("{}:v{}:{}:{}", category, version, content_hash, size),
    }
}

/// 基于路径的快速路径键
pub fn fastpath_key(category: &str, version: &str, path: &Path, fingerprint: Option<&str>) -> String {
    format!(
        "fast:{}:v{}:{}:{}",
        category,
        version,
        path.display(),
        fingerprint.unwrap_or("noopts")
    )
}
