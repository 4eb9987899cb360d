//! Structural summaries handed to the cache by a parser.
//!
//! Real parsing happens outside this crate. A parser implements
//! [`AstParser`] and returns an [`AstSummary`]: functions, classes, imports
//! and exports. The cache stores these summaries and the invalidation engine
//! diffs them; nothing here ever walks a syntax tree.
//!
//! [`SurfaceParser`] is a line-oriented fallback that extracts the same
//! summary with regular expressions. It is good enough to classify change
//! impact and discover imports, and makes no claim beyond that.

pub mod lexer;
mod surface;

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use surface::SurfaceParser;

/// How one file refers to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    /// Static `import`/`use`/`#include`.
    Import,
    /// CommonJS style `require(...)`.
    Require,
    /// Dynamic `import(...)`.
    Dynamic,
    /// Any import that originates in a test file.
    Test,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRef {
    /// Module specifier exactly as written (`./math`, `crate::a::b`, `os.path`).
    pub source: String,
    pub kind: ImportKind,
    /// Imported names, if the syntax lists them.
    #[serde(default)]
    pub specifiers: Vec<String>,
}

impl ImportRef {
    pub fn new(source: impl Into<String>, kind: ImportKind) -> Self {
        Self {
            source: source.into(),
            kind,
            specifiers: Vec::new(),
        }
    }

    pub fn with_specifiers(mut self, specifiers: Vec<String>) -> Self {
        self.specifiers = specifiers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub exported: bool,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            name: name.into(),
            params,
            is_async: false,
            exported: false,
        }
    }

    /// Canonical textual form used for diffing: `async name(a, b)`.
    pub fn render(&self) -> String {
        let prefix = if self.is_async { "async " } else { "" };
        format!("{prefix}{}({})", self.name, self.params.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSignature {
    pub name: String,
    #[serde(default)]
    pub extends: Option<String>,
    /// Rendered method signatures.
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub exported: bool,
}

impl ClassSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extends: None,
            methods: Vec::new(),
            exported: false,
        }
    }

    pub fn render(&self) -> String {
        let mut methods = self.methods.clone();
        methods.sort();
        match &self.extends {
            Some(base) => format!("{} : {base} {{{}}}", self.name, methods.join("; ")),
            None => format!("{} {{{}}}", self.name, methods.join("; ")),
        }
    }
}

/// Structural summary of one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstSummary {
    #[serde(default)]
    pub functions: Vec<FunctionSignature>,
    #[serde(default)]
    pub classes: Vec<ClassSignature>,
    #[serde(default)]
    pub imports: Vec<ImportRef>,
    /// Names visible to other modules.
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub complexity: u32,
}

impl AstSummary {
    /// Sorted set of exported names.
    pub fn export_surface(&self) -> BTreeSet<String> {
        self.exports.iter().cloned().collect()
    }

    /// Sorted set of rendered function signatures.
    pub fn function_surface(&self) -> BTreeSet<String> {
        self.functions.iter().map(FunctionSignature::render).collect()
    }

    /// Sorted set of rendered class signatures.
    pub fn class_surface(&self) -> BTreeSet<String> {
        self.classes.iter().map(ClassSignature::render).collect()
    }

    /// Rough serialized size, used for cache accounting.
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// Result of handing a file to a parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub success: bool,
    pub ast: Option<AstSummary>,
    pub error: Option<String>,
}

impl ParseOutcome {
    pub fn ok(ast: AstSummary) -> Self {
        Self {
            success: true,
            ast: Some(ast),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            ast: None,
            error: Some(error.into()),
        }
    }

    /// Take the summary if parsing succeeded.
    pub fn into_ast(self) -> Option<AstSummary> {
        if self.success { self.ast } else { None }
    }
}

/// External parser collaborator.
pub trait AstParser: Send + Sync {
    fn parse_file(&self, path: &Path, content: &str) -> ParseOutcome;
}
