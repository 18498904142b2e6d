//! worker 进程的行分隔 JSON 协议
//!
//! 协调端先发送一行 [`Handshake`]，之后每行一个 [`Request`]；
//! worker 对每个请求按顺序回复一行 [`Response`]。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analyser::AnalyserSpec;

/// 启动后的第一行，描述 worker 需要构建的分析器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    pub analysers: Vec<AnalyserSpec>,
}

/// 单个 (分析器, 文件) 任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub job: u64,
    pub category: String,
    pub path: PathBuf,
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WireOutcome {
    Completed { data: Option<Value> },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub job: u64,
    pub outcome: WireOutcome,
}

/// 编码为单行 JSON（带换行符）
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
