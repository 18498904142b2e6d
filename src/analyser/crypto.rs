use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::matching::is_source_file;
use super::{AnalyserOptions, Analyser, AnalysisResult};

pub const CATEGORY: &str = "crypto";

/// 加密原语识别规则（正则, 算法名, 类别）
const CRYPTO_PATTERNS: &[(&str, &str, &str)] = &[
    (r"(?i)\baes(?:[-_]?(?:128|192|256))?\b|\brijndael\b", "AES", "symmetric"),
    (r"(?i)\b3?des(?:[-_]?ede)?\b|\btriple[-_ ]?des\b", "DES", "symmetric"),
    (r"(?i)\bblowfish\b", "Blowfish", "symmetric"),
    (r"(?i)\bchacha(?:20)?\b", "ChaCha20", "symmetric"),
    (r"(?i)\brc4\b|\barcfour\b", "RC4", "symmetric"),
    (r"(?i)\brsa\b", "RSA", "asymmetric"),
    (r"(?i)\becdsa\b|\bsecp256[kr]1\b|\bprime256v1\b", "ECDSA", "asymmetric"),
    (r"(?i)\bed25519\b|\bcurve25519\b|\bx25519\b", "Curve25519", "asymmetric"),
    (r"(?i)\bdiffie[-_ ]?hellman\b|\becdh\b", "DH", "key-exchange"),
    (r"(?i)\bmd5\b", "MD5", "hash"),
    (r"(?i)\bsha[-_]?1\b", "SHA-1", "hash"),
    (r"(?i)\bsha[-_]?(?:224|256|384|512)\b|\bsha2\b", "SHA-2", "hash"),
    (r"(?i)\bsha3(?:[-_]?(?:224|256|384|512))?\b|\bkeccak\b", "SHA-3", "hash"),
    (r"(?i)\bblake2[bs]?\b|\bblake3\b", "BLAKE", "hash"),
    (r"(?i)\bhmac\b", "HMAC", "mac"),
    (r"(?i)\bpbkdf2\b|\bbcrypt\b|\bscrypt\b|\bargon2(?:id|i|d)?\b", "KDF", "key-derivation"),
];

fn crypto_regexes() -> &'static [(Regex, &'static str, &'static str)] {
    static RES: OnceLock<Vec<(Regex, &'static str, &'static str)>> = OnceLock::new();
    RES.get_or_init(|| {
        CRYPTO_PATTERNS
            .iter()
            .filter_map(|(pattern, algorithm, family)| {
                Regex::new(pattern).ok().map(|re| (re, *algorithm, *family))
            })
            .collect()
    })
}

/// 单个算法在文件中的出现位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoFinding {
    pub algorithm: String,
    pub family: String,
    pub lines: Vec<usize>,
}

/// 逐行查找加密原语，按规则顺序输出
pub fn find_crypto(content: &str) -> Vec<CryptoFinding> {
    let mut findings: Vec<CryptoFinding> = Vec::new();

    for (re, algorithm, family) in crypto_regexes() {
        let lines: Vec<usize> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| re.is_match(line))
            .map(|(index, _)| index + 1)
            .collect();

        if !lines.is_empty() {
            findings.push(CryptoFinding {
                algorithm: algorithm.to_string(),
                family: family.to_string(),
                lines,
            });
        }
    }

    findings
}

/// 源代码中的加密算法分析器
pub struct CryptoAnalyser {
    max_file_size: u64,
}

impl CryptoAnalyser {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

impl Analyser for CryptoAnalyser {
    fn category(&self) -> &str {
        CATEGORY
    }

    fn accepts(&self, path: &Path) -> bool {
        is_source_file(path, self.max_file_size)
    }

    fn options(&self) -> AnalyserOptions {
        AnalyserOptions::from([("includeCrypto".to_string(), Value::Bool(true))])
    }

    fn apply(&self, path: &Path, _root: Option<&Path>) -> Result<Option<AnalysisResult>> {
        let bytes = std::fs::read(path)?;
        let findings = find_crypto(&String::from_utf8_lossy(&bytes));

        if findings.is_empty() {
            return Ok(None);
        }

        Ok(Some(AnalysisResult::new(CATEGORY, serde_json::to_value(findings)?)))
    }
}
