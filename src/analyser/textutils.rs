//! 许可证与版权文本处理

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use xxhash_rust::xxh3::xxh3_64;

use super::corpus::{LICENSES, LICENSE_MENTIONS};

/// 相似度匹配的最低分数
pub const MIN_SIMILARITY: f32 = 0.8;

/// 许可证文本匹配结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseMatch {
    pub key: String,
    pub name: String,
    pub score: f32,
    /// `exact` 或 `similarity`
    pub method: String,
}

/// 版权声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Copyright {
    pub clause: String,
    pub years: Vec<String>,
    pub holders: Vec<String>,
}

fn spdx_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"SPDX-License-Identifier:\s*([A-Za-z0-9.+\-() ]+?)\s*(?:\*/|-->|$)")
            .expect("valid SPDX regex")
    })
}

fn copyright_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bcopyright\b|©|\(c\)").expect("valid copyright regex"))
}

fn years_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:19|20)\d{2}(?:\s*[-,]\s*(?:19|20)\d{2})*\b").expect("valid years regex")
    })
}

fn holder_noise_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)spdx-filecopyrighttext:|\bcopyright\b|©|\(c\)|\ball rights reserved\.?|^\s*by\b")
            .expect("valid holder regex")
    })
}

fn mention_regexes() -> &'static [(Regex, &'static str)] {
    static RES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RES.get_or_init(|| {
        LICENSE_MENTIONS
            .iter()
            .filter_map(|(pattern, key)| Regex::new(pattern).ok().map(|re| (re, *key)))
            .collect()
    })
}

/// 语料的归一化文本及其哈希
fn corpus_index() -> &'static [(String, u64)] {
    static INDEX: OnceLock<Vec<(String, u64)>> = OnceLock::new();
    INDEX.get_or_init(|| {
        LICENSES
            .iter()
            .map(|license| {
                let normalized = normalize(&strip_copyright_lines(license.text));
                let hash = xxh3_64(normalized.as_bytes());
                (normalized, hash)
            })
            .collect()
    })
}

/// 归一化文本：小写、只保留字母数字、单空格分隔
pub fn normalize(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 去掉版权行，避免年份和持有人影响匹配
fn strip_copyright_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !copyright_regex().is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 将完整的许可证文本与语料比对
pub fn match_license_text(text: &str) -> Option<LicenseMatch> {
    let normalized = normalize(&strip_copyright_lines(text));
    if normalized.is_empty() {
        return None;
    }

    let hash = xxh3_64(normalized.as_bytes());
    let index = corpus_index();

    if let Some(pos) = index.iter().position(|(_, h)| *h == hash) {
        let license = &LICENSES[pos];
        return Some(LicenseMatch {
            key: license.key.to_string(),
            name: license.name.to_string(),
            score: 1.0,
            method: "exact".to_string(),
        });
    }

    let words = normalized.split(' ').count();
    let mut best: Option<(usize, f32)> = None;

    for (pos, (candidate, _)) in index.iter().enumerate() {
        // 长度差异过大的候选直接跳过
        let candidate_words = candidate.split(' ').count();
        if words * 2 < candidate_words || candidate_words * 2 < words {
            continue;
        }

        let score = TextDiff::from_words(normalized.as_str(), candidate.as_str()).ratio();
        if score >= MIN_SIMILARITY && best.map_or(true, |(_, s)| score > s) {
            best = Some((pos, score));
        }
    }

    best.map(|(pos, score)| {
        let license = &LICENSES[pos];
        LicenseMatch {
            key: license.key.to_string(),
            name: license.name.to_string(),
            score,
            method: "similarity".to_string(),
        }
    })
}

/// 提取 SPDX-License-Identifier 表达式
pub fn spdx_identifiers(text: &str) -> Vec<String> {
    let mut found = Vec::new();

    for line in text.lines() {
        if let Some(caps) = spdx_regex().captures(line) {
            let expression = caps[1].trim().to_string();
            if !expression.is_empty() && !found.contains(&expression) {
                found.push(expression);
            }
        }
    }

    found
}

/// 文本中按名称提及的许可证
pub fn license_mentions(text: &str) -> Vec<String> {
    let mut found = Vec::new();

    for (re, key) in mention_regexes() {
        if re.is_match(text) && !found.iter().any(|k| k == key) {
            found.push(key.to_string());
        }
    }

    found
}

/// 逐行提取版权声明
pub fn extract_copyright(text: &str) -> Vec<Copyright> {
    let mut found = Vec::new();

    for line in text.lines() {
        let clause = line
            .trim()
            .trim_start_matches(|c: char| matches!(c, '#' | '/' | '*' | ';' | '-' | '!' | '<'))
            .trim();

        if !copyright_regex().is_match(clause) {
            continue;
        }

        let years: Vec<String> = years_regex()
            .find_iter(clause)
            .map(|m| m.as_str().to_string())
            .collect();

        let without_years = years_regex().replace_all(clause, " ");
        let holder = holder_noise_regex().replace_all(&without_years, " ");
        let holder = holder
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | ':' | '-'))
            .to_string();

        let holders = if holder.is_empty() { Vec::new() } else { vec![holder] };

        // 只有 "copyright" 字样而没有任何信息的行不算声明
        if years.is_empty() && holders.is_empty() {
            continue;
        }

        found.push(Copyright {
            clause: clause.to_string(),
            years,
            holders,
        });
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIT_WITH_HOLDER: &str = "MIT License\n\nCopyright (c) 2021 Jane Doe\n\n";

    #[test]
    fn test_exact_match_ignores_copyright_line() {
        let text = format!("{}{}", "Copyright (c) 2019 Acme Corp\n\n", LICENSES[0].text);
        let found = match_license_text(&text).unwrap();
        assert_eq!(found.key, "MIT");
        assert_eq!(found.method, "exact");
        assert_eq!(found.score, 1.0);
    }

    #[test]
    fn test_similarity_match_tolerates_small_edits() {
        let text = format!("{}{}", MIT_WITH_HOLDER, LICENSES[0].text.replace("sublicense, ", ""));
        let found = match_license_text(&text).unwrap();
        assert_eq!(found.key, "MIT");
        assert_eq!(found.method, "similarity");
        assert!(found.score >= MIN_SIMILARITY && found.score < 1.0);
    }

    #[test]
    fn test_unrelated_text_does_not_match() {
        assert!(match_license_text("just a readme with some words").is_none());
        assert!(match_license_text("").is_none());
    }

    #[test]
    fn test_spdx_identifiers() {
        let text = "// SPDX-License-Identifier: GPL-3.0-or-later\n/* SPDX-License-Identifier: MIT OR Apache-2.0 */\n";
        assert_eq!(
            spdx_identifiers(text),
            vec!["GPL-3.0-or-later".to_string(), "MIT OR Apache-2.0".to_string()]
        );
    }

    #[test]
    fn test_license_mentions() {
        let text = "Licensed under the Apache License, Version 2.0 and the MIT License";
        assert_eq!(license_mentions(text), vec!["MIT".to_string(), "Apache-2.0".to_string()]);
    }

    #[test]
    fn test_extract_copyright() {
        let found = extract_copyright(" * Copyright (c) 2019-2021 Acme Corp. All rights reserved.\nnothing here\n# copyright\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].years, vec!["2019-2021".to_string()]);
        assert_eq!(found[0].holders, vec!["Acme Corp".to_string()]);
    }
}
