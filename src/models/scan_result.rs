use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analyser::AnalyserOptions;
use crate::errors::ScanError;

/// 一次扫描的汇总结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    /// 相对路径 -> {类别: 数据}，按完成顺序排列
    pub result: Map<String, Value>,

    /// 已扫描但没有任何发现的文件
    pub no_result: Vec<String>,

    /// 相对路径 -> 错误列表
    #[serde(default)]
    pub errors: BTreeMap<String, Vec<ScanError>>,

    /// 扫描统计信息
    pub stats: ScanStats,

    /// 所有分析器选项的合并，用于复现扫描
    pub options: AnalyserOptions,

    /// 扫描开始时间
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    /// 待扫描的文件数
    pub total: usize,

    /// 已完成的文件数
    pub finished: usize,

    /// 被过滤掉的路径数
    #[serde(default)]
    pub ignored: usize,

    /// 缓存命中的分析次数
    #[serde(default)]
    pub cache_hits: usize,

    /// 扫描耗时（毫秒）
    #[serde(default)]
    pub duration_ms: u64,
}

impl Scan {
    /// 创建空的扫描结果
    pub fn new(options: AnalyserOptions) -> Self {
        Self {
            result: Map::new(),
            no_result: Vec::new(),
            errors: BTreeMap::new(),
            stats: ScanStats::default(),
            options,
            time: Utc::now(),
        }
    }

    /// 记录一个文件的结果
    pub fn add_file(&mut self, relpath: &str, results: Map<String, Value>, errors: Vec<ScanError>) {
        if results.is_empty() {
            self.no_result.push(relpath.to_string());
        } else {
            self.result.insert(relpath.to_string(), Value::Object(results));
        }

        if !errors.is_empty() {
            self.add_errors(relpath, errors);
        }
    }

    pub fn add_errors(&mut self, relpath: &str, errors: Vec<ScanError>) {
        self.errors.entry(relpath.to_string()).or_default().extend(errors);
    }

    /// 结果中出现的所有许可证
    pub fn licenses(&self) -> Vec<String> {
        let mut licenses = BTreeSet::new();

        for file in self.result.values() {
            collect_licenses(&file["license"], &mut licenses);

            if let Some(comments) = file["comments"].as_array() {
                for comment in comments {
                    collect_licenses(comment, &mut licenses);
                    if let Some(mentions) = comment["licenses"].as_array() {
                        licenses.extend(mentions.iter().filter_map(Value::as_str).map(str::to_string));
                    }
                }
            }
        }

        licenses.into_iter().collect()
    }

    /// 顶层文件中通过文本匹配识别的许可证
    pub fn root_licenses(&self) -> Vec<String> {
        self.result
            .iter()
            .filter(|(relpath, _)| {
                Path::new(relpath.as_str())
                    .parent()
                    .map_or(true, |parent| parent.as_os_str().is_empty())
            })
            .filter_map(|(_, file)| {
                let found = &file["license"]["match"];
                found.get("score")?;
                found["key"].as_str().map(str::to_string)
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// 收集 `match.key` 和 `spdx` 中的许可证
fn collect_licenses(item: &Value, licenses: &mut BTreeSet<String>) {
    if let Some(key) = item["match"]["key"].as_str() {
        licenses.insert(key.to_string());
    }

    if let Some(spdx) = item["spdx"].as_array() {
        licenses.extend(spdx.iter().filter_map(Value::as_str).map(str::to_string));
    }
}
