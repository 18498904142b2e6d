use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use serde_json::{json, Value};
use xxhash_rust::xxh3::xxh3_64;

use super::matching::{is_regular_file, within_size_limit};
use super::{AnalyserOptions, Analyser, AnalysisResult};

pub const CATEGORY: &str = "wfp";

/// gram 长度（字符）
pub const GRAM: usize = 30;
/// 窗口长度（gram 数）
pub const WINDOW: usize = 64;

/// 只保留字母数字并转为小写，其余字符不参与指纹
fn normalize_byte(byte: u8) -> Option<u8> {
    byte.is_ascii_alphanumeric().then(|| byte.to_ascii_lowercase())
}

/// 对内容做 winnowing，返回 (行号, 哈希) 列表
pub fn winnow(content: &[u8]) -> Vec<(usize, u32)> {
    let mut selected = Vec::new();
    let mut gram: VecDeque<u8> = VecDeque::with_capacity(GRAM);
    let mut window: VecDeque<u32> = VecDeque::with_capacity(WINDOW);
    let mut last_selected: Option<u32> = None;
    let mut line = 1;

    for &byte in content {
        if byte == b'\n' {
            line += 1;
            continue;
        }

        let Some(normalized) = normalize_byte(byte) else {
            continue;
        };

        gram.push_back(normalized);
        if gram.len() < GRAM {
            continue;
        }

        let bytes: Vec<u8> = gram.iter().copied().collect();
        window.push_back(xxh3_64(&bytes) as u32);
        gram.pop_front();

        if window.len() < WINDOW {
            continue;
        }

        if let Some(&min) = window.iter().min() {
            if last_selected != Some(min) {
                selected.push((line, min));
                last_selected = Some(min);
            }
        }
        window.pop_front();
    }

    selected
}

/// 生成 SCANOSS 风格的 WFP 文本
pub fn wfp_for_content(content: &[u8], relpath: &str) -> String {
    let mut wfp = format!("file={:016x},{},{}\n", xxh3_64(content), content.len(), relpath);

    let mut current_line = 0;
    for (line, hash) in winnow(content) {
        if line != current_line {
            if current_line != 0 {
                wfp.push('\n');
            }
            let _ = write!(wfp, "{}={:08x}", line, hash);
            current_line = line;
        } else {
            let _ = write!(wfp, ",{:08x}", hash);
        }
    }

    if current_line != 0 {
        wfp.push('\n');
    }

    wfp
}

/// 文件指纹分析器
pub struct FingerprintAnalyser {
    max_file_size: u64,
}

impl FingerprintAnalyser {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

impl Analyser for FingerprintAnalyser {
    fn category(&self) -> &str {
        CATEGORY
    }

    fn accepts(&self, path: &Path) -> bool {
        is_regular_file(path) && within_size_limit(path, self.max_file_size)
    }

    fn options(&self) -> AnalyserOptions {
        AnalyserOptions::from([("includeWfp".to_string(), Value::Bool(true))])
    }

    fn apply(&self, path: &Path, root: Option<&Path>) -> Result<Option<AnalysisResult>> {
        let content = std::fs::read(path)?;
        if content.is_empty() {
            return Ok(None);
        }

        let relpath = root
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        Ok(Some(AnalysisResult::new(
            CATEGORY,
            json!({ "wfp": wfp_for_content(&content, &relpath) }),
        )))
    }
}
