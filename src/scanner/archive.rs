//! zip 系列归档的识别与解压

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use zip::ZipArchive;

/// 可以展开的归档扩展名（均为 zip 格式）
pub const ARCHIVE_EXTENSIONS: &[&str] = &[".zip", ".whl", ".jar", ".war", ".ear", ".egg", ".nupkg", ".apk"];

/// 匹配的归档扩展名
pub fn archive_extension(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    ARCHIVE_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| name.len() > ext.len() && name.ends_with(ext))
}

/// 解压目录名：去掉扩展名的文件名，已存在时追加序号
pub fn extraction_dir(scratch: &Path, archive: &Path, extension: &str) -> PathBuf {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = &name[..name.len().saturating_sub(extension.len())];

    let mut candidate = scratch.join(stem);
    let mut counter = 1;
    while candidate.exists() {
        candidate = scratch.join(format!("{}~{}", stem, counter));
        counter += 1;
    }
    candidate
}

/// 把 zip 归档解压到目标目录，忽略指向目录外的条目
pub fn extract_zip(archive: &Path, destination: &Path) -> Result<()> {
    let file = File::open(archive).with_context(|| format!("failed to open {}", archive.display()))?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;

    std::fs::create_dir_all(destination)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;

        let Some(enclosed_name) = entry.enclosed_name() else {
            continue;
        };
        let target = destination.join(enclosed_name);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// 测试用：写入一个包含给定文件的 zip
    pub(crate) fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, content) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_archive_extension() {
        assert_eq!(archive_extension(Path::new("/a/pkg-1.0.whl")), Some(".whl"));
        assert_eq!(archive_extension(Path::new("lib.JAR")), Some(".jar"));
        assert_eq!(archive_extension(Path::new("notes.txt")), None);
        assert_eq!(archive_extension(Path::new(".zip")), None);
    }

    #[test]
    fn test_extract_and_unique_directory() {
        let temp_dir = tempdir().unwrap();
        let archive = temp_dir.path().join("pkg.whl");
        write_zip(&archive, &[("pkg/__init__.py", "# hi\n"), ("LICENSE", "MIT")]);

        let scratch = temp_dir.path().join("scratch");
        let first = extraction_dir(&scratch, &archive, ".whl");
        assert_eq!(first, scratch.join("pkg"));

        extract_zip(&archive, &first).unwrap();
        assert!(first.join("pkg/__init__.py").is_file());
        assert!(first.join("LICENSE").is_file());

        assert_eq!(extraction_dir(&scratch, &archive, ".whl"), scratch.join("pkg~1"));
    }

    #[test]
    fn test_corrupt_archive_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let archive = temp_dir.path().join("broken.zip");
        std::fs::write(&archive, "definitely not a zip").unwrap();

        assert!(extract_zip(&archive, &temp_dir.path().join("out")).is_err());
    }
}
