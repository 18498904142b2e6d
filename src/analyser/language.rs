//! 基于文件名/扩展名的语言识别，以及各语言的注释语法。

use std::path::Path;

use serde::{Deserialize, Serialize};

/// 支持注释提取的语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lang {
    Assembly,
    Batch,
    C,
    Clojure,
    CMake,
    Cpp,
    CSharp,
    Dart,
    Elixir,
    Fortran,
    Go,
    Haskell,
    Html,
    Java,
    JavaScript,
    Kotlin,
    Lisp,
    Lua,
    Markdown,
    ObjectiveC,
    Perl,
    Php,
    Python,
    R,
    Ruby,
    Rust,
    Scala,
    Shell,
    Sql,
    Swift,
    TypeScript,
    Xml,
    Yaml,
}

/// 注释语法：行注释前缀与块注释定界符
#[derive(Debug, Clone, Copy)]
pub struct CommentStyle {
    pub line: &'static [&'static str],
    pub block: &'static [(&'static str, &'static str)],
}

const BCPL: CommentStyle = CommentStyle { line: &["//"], block: &[("/*", "*/")] };
const SHELL: CommentStyle = CommentStyle { line: &["#"], block: &[] };
const HTML: CommentStyle = CommentStyle { line: &[], block: &[("<!--", "-->")] };
const SQL: CommentStyle = CommentStyle { line: &["--"], block: &[("/*", "*/")] };
const HASKELL: CommentStyle = CommentStyle { line: &["--"], block: &[("{-", "-}")] };
const LUA: CommentStyle = CommentStyle { line: &["--"], block: &[("--[[", "]]")] };
const LISP: CommentStyle = CommentStyle { line: &[";"], block: &[] };
const BATCH: CommentStyle = CommentStyle { line: &["REM ", "rem ", "::"], block: &[] };
const FORTRAN: CommentStyle = CommentStyle { line: &["!"], block: &[] };
const ASSEMBLY: CommentStyle = CommentStyle { line: &[";", "//"], block: &[("/*", "*/")] };
const PHP: CommentStyle = CommentStyle { line: &["//", "#"], block: &[("/*", "*/")] };
const RUBY: CommentStyle = CommentStyle { line: &["#"], block: &[("=begin", "=end")] };
const PYTHON: CommentStyle = CommentStyle { line: &["#"], block: &[("\"\"\"", "\"\"\"")] };

impl Lang {
    /// 对应语言的注释语法
    pub fn comment_style(&self) -> CommentStyle {
        match self {
            Lang::C
            | Lang::Cpp
            | Lang::CSharp
            | Lang::Dart
            | Lang::Go
            | Lang::Java
            | Lang::JavaScript
            | Lang::Kotlin
            | Lang::ObjectiveC
            | Lang::Rust
            | Lang::Scala
            | Lang::Swift
            | Lang::TypeScript => BCPL,
            Lang::CMake | Lang::Elixir | Lang::Perl | Lang::R | Lang::Shell | Lang::Yaml => SHELL,
            Lang::Python => PYTHON,
            Lang::Ruby => RUBY,
            Lang::Php => PHP,
            Lang::Html | Lang::Markdown | Lang::Xml => HTML,
            Lang::Sql => SQL,
            Lang::Haskell => HASKELL,
            Lang::Lua => LUA,
            Lang::Clojure | Lang::Lisp => LISP,
            Lang::Batch => BATCH,
            Lang::Fortran => FORTRAN,
            Lang::Assembly => ASSEMBLY,
        }
    }

    fn from_extension(ext: &str) -> Option<Lang> {
        let lang = match ext {
            "s" | "asm" => Lang::Assembly,
            "bat" | "cmd" => Lang::Batch,
            "c" | "h" => Lang::C,
            "clj" | "cljs" | "cljc" => Lang::Clojure,
            "cmake" => Lang::CMake,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Lang::Cpp,
            "cs" => Lang::CSharp,
            "dart" => Lang::Dart,
            "ex" | "exs" => Lang::Elixir,
            "f" | "f77" | "f90" | "f95" | "for" => Lang::Fortran,
            "go" => Lang::Go,
            "hs" => Lang::Haskell,
            "html" | "htm" => Lang::Html,
            "java" => Lang::Java,
            "js" | "jsx" | "mjs" | "cjs" => Lang::JavaScript,
            "kt" | "kts" => Lang::Kotlin,
            "lisp" | "el" | "lsp" => Lang::Lisp,
            "lua" => Lang::Lua,
            "md" | "markdown" => Lang::Markdown,
            "m" | "mm" => Lang::ObjectiveC,
            "pl" | "pm" => Lang::Perl,
            "php" => Lang::Php,
            "py" | "pyi" => Lang::Python,
            "r" => Lang::R,
            "rb" | "rake" | "gemspec" => Lang::Ruby,
            "rs" => Lang::Rust,
            "scala" | "sc" => Lang::Scala,
            "sh" | "bash" | "zsh" => Lang::Shell,
            "sql" => Lang::Sql,
            "swift" => Lang::Swift,
            "ts" | "tsx" | "mts" | "cts" => Lang::TypeScript,
            "xml" | "xsd" | "xsl" | "pom" => Lang::Xml,
            "yml" | "yaml" => Lang::Yaml,
            _ => return None,
        };
        Some(lang)
    }
}

/// 根据文件名识别语言，无法识别时返回 None
pub fn classify(path: &Path) -> Option<Lang> {
    let file_name = path.file_name()?.to_str()?;

    match file_name {
        "CMakeLists.txt" => return Some(Lang::CMake),
        "Rakefile" | "Gemfile" => return Some(Lang::Ruby),
        _ => {}
    }

    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Lang::from_extension(&ext)
}
