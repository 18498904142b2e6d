use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::language::classify;
use super::matching::is_text_file;
use super::textutils::{extract_copyright, match_license_text, spdx_identifiers};
use super::{AnalyserOptions, Analyser, AnalysisResult};

pub const CATEGORY: &str = "license";

/// 超过该长度的文本不做整文件许可证匹配
const MAX_LICENSE_TEXT_LENGTH: usize = 100_000;

fn license_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)LICEN[CS]E|COPYING|COPYRIGHT").expect("valid license file regex"))
}

/// 非源代码文本文件的许可证分析器
pub struct LicenseAnalyser {
    include_copyright: bool,
    max_file_size: u64,
}

impl LicenseAnalyser {
    pub fn new(include_copyright: bool, max_file_size: u64) -> Self {
        Self {
            include_copyright,
            max_file_size,
        }
    }
}

impl Analyser for LicenseAnalyser {
    fn category(&self) -> &str {
        CATEGORY
    }

    fn accepts(&self, path: &Path) -> bool {
        classify(path).is_none() && is_text_file(path, self.max_file_size)
    }

    fn options(&self) -> AnalyserOptions {
        AnalyserOptions::from([("includeCopyright".to_string(), Value::Bool(self.include_copyright))])
    }

    fn apply(&self, path: &Path, _root: Option<&Path>) -> Result<Option<AnalysisResult>> {
        let bytes = std::fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);

        let mut data = Map::new();

        let is_license_file = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| license_file_regex().is_match(name))
            .unwrap_or(false);

        if is_license_file && content.len() < MAX_LICENSE_TEXT_LENGTH {
            if let Some(found) = match_license_text(&content) {
                data.insert("match".to_string(), serde_json::to_value(found)?);
            }
        }

        let spdx = spdx_identifiers(&content);
        if !spdx.is_empty() {
            data.insert("spdx".to_string(), json!(spdx));
        }

        if self.include_copyright {
            let copyright = extract_copyright(&content);
            if !copyright.is_empty() {
                data.insert("copyright".to_string(), serde_json::to_value(copyright)?);
            }
        }

        if data.is_empty() {
            return Ok(None);
        }

        Ok(Some(AnalysisResult::new(CATEGORY, Value::Object(data))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::corpus::LICENSES;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_license_file_is_matched() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("LICENSE");
        fs::write(&path, format!("MIT License\n\nCopyright (c) 2020 Jane Doe\n\n{}", LICENSES[0].text)).unwrap();

        let analyser = LicenseAnalyser::new(true, 1_000_000);
        assert!(analyser.accepts(&path));

        let result = analyser.apply(&path, None).unwrap().unwrap();
        assert_eq!(result.category, "license");
        assert_eq!(result.data["match"]["key"], "MIT");
        assert_eq!(result.data["copyright"][0]["holders"][0], "Jane Doe");
    }

    #[test]
    fn test_source_files_are_not_accepted() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("main.py");
        fs::write(&path, "# SPDX-License-Identifier: MIT\n").unwrap();

        let analyser = LicenseAnalyser::new(false, 1_000_000);
        assert!(!analyser.accepts(&path));
    }

    #[test]
    fn test_plain_text_without_findings() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("README");
        fs::write(&path, "Nothing to see here\n").unwrap();

        let analyser = LicenseAnalyser::new(true, 1_000_000);
        assert!(analyser.apply(&path, None).unwrap().is_none());
    }
}
