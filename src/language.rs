//! Language detection and per-language lexical conventions.
//!
//! Detection is purely extension based. The cache never looks at syntax,
//! but the hasher and the surface parser need to know how comments and
//! string literals look in each language.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Go,
    Rust,
    Java,
    C,
    Cpp,
    CSharp,
    Php,
    Ruby,
    Kotlin,
    Swift,
    Lua,
}

/// How a language spells its comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `//` line comments and `/* */` blocks.
    CLike,
    /// `#` line comments.
    Hash,
    /// `--` line comments and `--[[ ]]` blocks.
    DoubleDash,
    /// `//`, `/* */` and `#` (PHP).
    CLikeAndHash,
}

impl Language {
    pub const ALL: [Language; 14] = [
        Language::JavaScript,
        Language::TypeScript,
        Language::Python,
        Language::Go,
        Language::Rust,
        Language::Java,
        Language::C,
        Language::Cpp,
        Language::CSharp,
        Language::Php,
        Language::Ruby,
        Language::Kotlin,
        Language::Swift,
        Language::Lua,
    ];

    /// Detect the language of a file from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::from_extension(&ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let lang = match ext {
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => Language::Cpp,
            "cs" => Language::CSharp,
            "php" => Language::Php,
            "rb" => Language::Ruby,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "lua" => Language::Lua,
            _ => return None,
        };
        Some(lang)
    }

    /// Parse a configured language name. Accepts a few common aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        let lang = match name.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" => Language::JavaScript,
            "typescript" | "ts" => Language::TypeScript,
            "python" | "py" => Language::Python,
            "go" | "golang" => Language::Go,
            "rust" | "rs" => Language::Rust,
            "java" => Language::Java,
            "c" => Language::C,
            "cpp" | "c++" => Language::Cpp,
            "csharp" | "c#" | "cs" => Language::CSharp,
            "php" => Language::Php,
            "ruby" | "rb" => Language::Ruby,
            "kotlin" | "kt" => Language::Kotlin,
            "swift" => Language::Swift,
            "lua" => Language::Lua,
            _ => return None,
        };
        Some(lang)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Php => "php",
            Language::Ruby => "ruby",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::Lua => "lua",
        }
    }

    /// Extensions probed when resolving extensionless import specifiers.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::TypeScript => &["ts", "tsx", "mts", "cts"],
            Language::Python => &["py", "pyi"],
            Language::Go => &["go"],
            Language::Rust => &["rs"],
            Language::Java => &["java"],
            Language::C => &["c", "h"],
            Language::Cpp => &["cpp", "cc", "cxx", "hpp", "hh", "hxx"],
            Language::CSharp => &["cs"],
            Language::Php => &["php"],
            Language::Ruby => &["rb"],
            Language::Kotlin => &["kt", "kts"],
            Language::Swift => &["swift"],
            Language::Lua => &["lua"],
        }
    }

    pub fn comment_style(&self) -> CommentStyle {
        match self {
            Language::Python | Language::Ruby => CommentStyle::Hash,
            Language::Lua => CommentStyle::DoubleDash,
            Language::Php => CommentStyle::CLikeAndHash,
            _ => CommentStyle::CLike,
        }
    }

    /// Whether leading indentation carries meaning.
    pub fn indentation_significant(&self) -> bool {
        matches!(self, Language::Python)
    }

    /// Whether backtick strings exist (template literals, Go raw strings).
    pub fn has_backtick_strings(&self) -> bool {
        matches!(
            self,
            Language::JavaScript | Language::TypeScript | Language::Go
        )
    }

    /// Whether a single quote opens a string literal (as opposed to a char
    /// literal or lifetime, which we treat the same way except for Rust).
    pub fn single_quote_strings(&self) -> bool {
        !matches!(self, Language::Rust)
    }

    /// JavaScript and TypeScript share module resolution rules.
    pub fn is_ecmascript(&self) -> bool {
        matches!(self, Language::JavaScript | Language::TypeScript)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory names that hold test code by convention.
const TEST_DIRS: &[&str] = &["test", "tests", "__tests__", "spec", "__mocks__"];

/// Check whether a path looks like a test file.
///
/// Recognizes `*.test.*`, `*.spec.*`, `test_*.py`, `*_test.{py,go,rs}` and
/// anything under a conventional test directory.
pub fn is_test_file(path: &Path) -> bool {
    let in_test_dir = path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| TEST_DIRS.contains(&s))
            .unwrap_or(false)
    });
    if in_test_dir {
        return true;
    }

    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    if file_name.contains(".test.") || file_name.contains(".spec.") {
        return true;
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match ext {
        "py" => stem.starts_with("test_") || stem.ends_with("_test"),
        "go" | "rs" => stem.ends_with("_test"),
        _ => false,
    }
}

/// Candidate test file names for a source file, relative to the same
/// directory. Used to find related tests by naming convention.
pub fn conventional_test_names(path: &Path) -> Vec<String> {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match ext {
        "py" => vec![format!("test_{stem}.py"), format!("{stem}_test.py")],
        "go" => vec![format!("{stem}_test.go")],
        "rs" => vec![format!("{stem}_test.rs")],
        "" => Vec::new(),
        _ => vec![
            format!("{stem}.test.{ext}"),
            format!("{stem}.spec.{ext}"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_from_extension() {
        assert_eq!(
            Language::from_path(Path::new("src/utils/math.js")),
            Some(Language::JavaScript)
        );
        assert_eq!(
            Language::from_path(Path::new("app/Main.TSX")),
            Some(Language::TypeScript)
        );
        assert_eq!(Language::from_path(Path::new("README.md")), None);
        assert_eq!(Language::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_name_round_trip() {
        for lang in Language::ALL {
            assert_eq!(Language::from_name(lang.as_str()), Some(lang));
        }
        assert_eq!(Language::from_name("golang"), Some(Language::Go));
        assert_eq!(Language::from_name("cobol"), None);
    }

    #[test]
    fn test_is_test_file() {
        assert!(is_test_file(Path::new("src/math.test.js")));
        assert!(is_test_file(Path::new("src/math.spec.ts")));
        assert!(is_test_file(Path::new("pkg/test_math.py")));
        assert!(is_test_file(Path::new("pkg/math_test.go")));
        assert!(is_test_file(Path::new("src/__tests__/math.js")));
        assert!(is_test_file(Path::new("tests/integration.rs")));
        assert!(!is_test_file(Path::new("src/utils/math.js")));
        assert!(!is_test_file(Path::new("src/testing_utils.py")));
    }

    #[test]
    fn test_conventional_test_names() {
        assert_eq!(
            conventional_test_names(Path::new("utils/math.js")),
            vec!["math.test.js".to_string(), "math.spec.js".to_string()]
        );
        assert_eq!(
            conventional_test_names(Path::new("calc.py")),
            vec!["test_calc.py".to_string(), "calc_test.py".to_string()]
        );
    }
}
