//! 分析器共用的文件匹配函数，各分析器按需组合使用。

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::language::classify;

/// 用于内容嗅探的读取长度
const SNIFF_LEN: usize = 1024;

/// 常见二进制文件的文件头
const BINARY_SIGNATURES: &[&[u8]] = &[
    b"\x89PNG",
    b"\xff\xd8\xff",
    b"GIF8",
    b"\x00\x00\x00",
    b"PK\x03\x04",
];

/// 路径是否指向一个普通文件
pub fn is_regular_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

/// 文件大小是否在上限以内
pub fn within_size_limit(path: &Path, max_file_size: u64) -> bool {
    path.metadata()
        .map(|m| m.len() <= max_file_size)
        .unwrap_or(false)
}

/// 通过文件头和 UTF-8 校验判断文件是否为文本
pub fn looks_like_text(path: &Path) -> bool {
    let mut buffer = Vec::with_capacity(SNIFF_LEN);
    let read = File::open(path).and_then(|file| file.take(SNIFF_LEN as u64).read_to_end(&mut buffer));
    if read.is_err() {
        return false;
    }

    let header = &buffer[..buffer.len().min(8)];
    if BINARY_SIGNATURES.iter().any(|sig| header.starts_with(sig)) {
        return false;
    }

    // 文件头中出现空字节通常意味着二进制文件
    if header.contains(&0) {
        return false;
    }

    match std::str::from_utf8(&buffer) {
        Ok(_) => true,
        // 读取窗口截断了一个多字节字符
        Err(err) => err.error_len().is_none() && buffer.len() == SNIFF_LEN,
    }
}

/// 大小合适的文本文件
pub fn is_text_file(path: &Path, max_file_size: u64) -> bool {
    is_regular_file(path) && within_size_limit(path, max_file_size) && looks_like_text(path)
}

/// 可识别语言的源代码文件
pub fn is_source_file(path: &Path, max_file_size: u64) -> bool {
    classify(path).is_some() && is_text_file(path, max_file_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_text_and_binary_detection() {
        let temp_dir = tempdir().unwrap();

        let text = temp_dir.path().join("notes.txt");
        fs::write(&text, "hello world\n").unwrap();
        assert!(looks_like_text(&text));

        let png = temp_dir.path().join("image.txt");
        fs::write(&png, b"\x89PNG\r\n\x1a\nrest").unwrap();
        assert!(!looks_like_text(&png));

        let nul = temp_dir.path().join("data.txt");
        fs::write(&nul, b"ab\x00cd").unwrap();
        assert!(!looks_like_text(&nul));

        let latin1 = temp_dir.path().join("latin1.txt");
        fs::write(&latin1, b"caf\xe9 au lait").unwrap();
        assert!(!looks_like_text(&latin1));
    }

    #[test]
    fn test_multibyte_char_cut_at_sniff_boundary_is_text() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("long.txt");

        let mut content = "a".repeat(SNIFF_LEN - 1);
        content.push('é');
        fs::write(&path, content).unwrap();

        assert!(looks_like_text(&path));
    }

    #[test]
    fn test_size_limit_and_source_detection() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("main.rs");
        fs::write(&source, "fn main() {}\n").unwrap();

        assert!(is_source_file(&source, 1024));
        assert!(!is_source_file(&source, 4));
        assert!(!is_source_file(temp_dir.path(), 1024));

        let license = temp_dir.path().join("LICENSE");
        fs::write(&license, "MIT").unwrap();
        assert!(is_text_file(&license, 1024));
        assert!(!is_source_file(&license, 1024));
    }
}
