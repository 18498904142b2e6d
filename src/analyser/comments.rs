use std::path::Path;

use anyhow::Result;
use serde_json::{json, Map, Value};

use super::language::{classify, CommentStyle};
use super::matching::is_source_file;
use super::textutils::{extract_copyright, license_mentions, match_license_text, spdx_identifiers};
use super::{AnalyserOptions, Analyser, AnalysisResult};

pub const CATEGORY: &str = "comments";

/// 源代码中的一段注释
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// 起始行号（从 1 开始）
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// 行内下一个注释起始标记
enum Marker {
    Line(usize, usize),
    Block(usize, usize, &'static str),
}

/// 在行中寻找最早出现的注释标记，同一位置优先较长的标记
fn find_marker(line: &str, style: &CommentStyle) -> Option<Marker> {
    let mut best: Option<(usize, usize, Marker)> = None;

    for prefix in style.line {
        // 关键字形式的行注释（如 REM）只在行首生效
        let pos = if prefix.starts_with(|c: char| c.is_alphabetic()) {
            let indent = line.len() - line.trim_start().len();
            line[indent..].starts_with(prefix).then_some(indent)
        } else {
            line.find(prefix)
        };

        if let Some(pos) = pos {
            if best.as_ref().map_or(true, |(p, l, _)| pos < *p || (pos == *p && prefix.len() > *l)) {
                best = Some((pos, prefix.len(), Marker::Line(pos, prefix.len())));
            }
        }
    }

    for (start, end) in style.block {
        if let Some(pos) = line.find(start) {
            if best.as_ref().map_or(true, |(p, l, _)| pos < *p || (pos == *p && start.len() > *l)) {
                best = Some((pos, start.len(), Marker::Block(pos, start.len(), *end)));
            }
        }
    }

    best.map(|(_, _, marker)| marker)
}

/// 按注释语法提取注释，不处理字符串字面量中的标记
pub fn extract_comments(content: &str, style: &CommentStyle) -> Vec<Comment> {
    let mut comments = Vec::new();
    // 未闭合的块注释：(起始行, 已收集文本, 结束标记)
    let mut open: Option<(usize, Vec<String>, &'static str)> = None;

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        let mut rest = line;

        loop {
            if let Some((start_line, mut parts, end)) = open.take() {
                match rest.find(end) {
                    Some(pos) => {
                        parts.push(rest[..pos].to_string());
                        comments.push(Comment {
                            start_line,
                            end_line: line_no,
                            text: parts.join("\n").trim().to_string(),
                        });
                        rest = &rest[pos + end.len()..];
                    }
                    None => {
                        parts.push(rest.to_string());
                        open = Some((start_line, parts, end));
                        break;
                    }
                }
                continue;
            }

            match find_marker(rest, style) {
                Some(Marker::Line(pos, len)) => {
                    comments.push(Comment {
                        start_line: line_no,
                        end_line: line_no,
                        text: rest[pos + len..].trim().to_string(),
                    });
                    break;
                }
                Some(Marker::Block(pos, len, end)) => {
                    open = Some((line_no, Vec::new(), end));
                    rest = &rest[pos + len..];
                }
                None => break,
            }
        }
    }

    // 文件结束时仍未闭合的块注释
    if let Some((start_line, parts, _)) = open {
        comments.push(Comment {
            start_line,
            end_line: content.lines().count().max(start_line),
            text: parts.join("\n").trim().to_string(),
        });
    }

    comments
}

/// 合并首尾相邻的注释
pub fn merge_adjacent(comments: Vec<Comment>) -> Vec<Comment> {
    let mut merged: Vec<Comment> = Vec::with_capacity(comments.len());

    for comment in comments {
        match merged.last_mut() {
            Some(current) if comment.start_line == current.end_line + 1 => {
                current.end_line = comment.end_line;
                current.text.push('\n');
                current.text.push_str(&comment.text);
            }
            _ => merged.push(comment),
        }
    }

    merged
}

/// 源代码注释中的许可证与版权分析器
pub struct CommentAnalyser {
    include_copyright: bool,
    max_file_size: u64,
}

impl CommentAnalyser {
    pub fn new(include_copyright: bool, max_file_size: u64) -> Self {
        Self {
            include_copyright,
            max_file_size,
        }
    }

    /// 分析单个注释块，首个块额外尝试整段许可证匹配
    fn analyse_comment(&self, comment: &Comment, is_head: bool) -> Result<Option<Value>> {
        let mut data = Map::new();

        if is_head {
            if let Some(found) = match_license_text(&comment.text) {
                data.insert("match".to_string(), serde_json::to_value(found)?);
            }
        }

        let licenses = license_mentions(&comment.text);
        if !licenses.is_empty() {
            data.insert("licenses".to_string(), json!(licenses));
        }

        let spdx = spdx_identifiers(&comment.text);
        if !spdx.is_empty() {
            data.insert("spdx".to_string(), json!(spdx));
        }

        if self.include_copyright {
            let copyright = extract_copyright(&comment.text);
            if !copyright.is_empty() {
                data.insert("copyright".to_string(), serde_json::to_value(copyright)?);
            }
        }

        if data.is_empty() {
            return Ok(None);
        }

        data.insert("line".to_string(), json!(comment.start_line));
        data.insert("endLine".to_string(), json!(comment.end_line));
        Ok(Some(Value::Object(data)))
    }
}

impl Analyser for CommentAnalyser {
    fn category(&self) -> &str {
        CATEGORY
    }

    fn accepts(&self, path: &Path) -> bool {
        is_source_file(path, self.max_file_size)
    }

    fn options(&self) -> AnalyserOptions {
        AnalyserOptions::from([("includeCopyright".to_string(), Value::Bool(self.include_copyright))])
    }

    fn apply(&self, path: &Path, _root: Option<&Path>) -> Result<Option<AnalysisResult>> {
        let Some(lang) = classify(path) else {
            return Ok(None);
        };

        let bytes = std::fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        let comments = merge_adjacent(extract_comments(&content, &lang.comment_style()));

        let mut results = Vec::new();
        for (index, comment) in comments.iter().enumerate() {
            if let Some(found) = self.analyse_comment(comment, index == 0)? {
                results.push(found);
            }
        }

        if results.is_empty() {
            return Ok(None);
        }

        Ok(Some(AnalysisResult::new(CATEGORY, Value::Array(results))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::language::Lang;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_extract_line_and_block_comments() {
        let source = "// first\nint x; /* inline */ int y;\n/*\n * block\n */\ncode(); // trailing\n";
        let comments = extract_comments(source, &Lang::C.comment_style());

        assert_eq!(comments.len(), 4);
        assert_eq!(comments[0], Comment { start_line: 1, end_line: 1, text: "first".to_string() });
        assert_eq!(comments[1].text, "inline");
        assert_eq!((comments[2].start_line, comments[2].end_line), (3, 5));
        assert_eq!(comments[2].text, "* block");
        assert_eq!(comments[3].text, "trailing");
    }

    #[test]
    fn test_python_docstring_and_hash_comments() {
        let source = "# one\n# two\n\"\"\"doc\nstring\"\"\"\nx = 1\n";
        let comments = merge_adjacent(extract_comments(source, &Lang::Python.comment_style()));

        assert_eq!(comments.len(), 1);
        assert_eq!((comments[0].start_line, comments[0].end_line), (1, 4));
        assert!(comments[0].text.starts_with("one\ntwo\ndoc"));
    }

    #[test]
    fn test_lua_block_takes_precedence_over_line_marker() {
        let source = "--[[ block\ncomment ]]\n-- line\n";
        let comments = extract_comments(source, &Lang::Lua.comment_style());
        assert_eq!(comments.len(), 2);
        assert_eq!((comments[0].start_line, comments[0].end_line), (1, 2));
    }

    #[test]
    fn test_unterminated_block_runs_to_end_of_file() {
        let comments = extract_comments("/* never\nclosed\n", &Lang::C.comment_style());
        assert_eq!(comments.len(), 1);
        assert_eq!((comments[0].start_line, comments[0].end_line), (1, 2));
    }

    #[test]
    fn test_apply_reports_spdx_and_copyright() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("a.py");
        fs::write(
            &path,
            "# SPDX-License-Identifier: MIT\n# Copyright 2020 Acme\n\nimport os\n\n# plain note\n",
        )
        .unwrap();

        let analyser = CommentAnalyser::new(true, 1_000_000);
        assert!(analyser.accepts(&path));

        let result = analyser.apply(&path, None).unwrap().unwrap();
        let blocks = result.data.as_array().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["line"], 1);
        assert_eq!(blocks[0]["endLine"], 2);
        assert_eq!(blocks[0]["spdx"][0], "MIT");
        assert_eq!(blocks[0]["copyright"][0]["holders"][0], "Acme");
    }

    #[test]
    fn test_apply_without_findings() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("main.rs");
        fs::write(&path, "// just a note\nfn main() {}\n").unwrap();

        let analyser = CommentAnalyser::new(false, 1_000_000);
        assert!(analyser.apply(&path, None).unwrap().is_none());
    }
}
