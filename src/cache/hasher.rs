//! Language-aware content hashing.
//!
//! Two files hash identically when they differ only in ordinary comments,
//! trailing whitespace, blank lines, runs of spaces, or (where indentation
//! is not significant) leading whitespace. Doc comments are kept because
//! they are part of a module's public face.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::language::Language;
use crate::parsing::lexer::{Segment, segments};

/// Placeholder delimiting an extracted string literal.
const MARK: char = '\u{0}';

/// Full SHA-256 of `bytes` as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// First 8 hex chars of the SHA-256 of `bytes`.
pub fn short_digest(bytes: &[u8]) -> String {
    let mut hex = sha256_hex(bytes);
    hex.truncate(8);
    hex
}

/// Canonical text form used for hashing.
pub fn normalize(content: &str, language: Language) -> String {
    // Pull string literals out so line-based cleanup cannot touch them.
    let mut literals = Vec::new();
    let mut code = String::with_capacity(content.len());
    for segment in segments(content, language) {
        match segment {
            Segment::Code(text) => code.push_str(&text),
            Segment::Str(text) => {
                code.push(MARK);
                code.push_str(&literals.len().to_string());
                code.push(MARK);
                literals.push(text);
            }
            Segment::Comment { text, doc: true } => code.push_str(&text),
            Segment::Comment { text, doc: false } => {
                code.extend(text.chars().filter(|c| *c == '\n'));
            }
        }
    }

    let keep_indent = language.indentation_significant();
    let mut lines = Vec::new();
    for line in code.lines() {
        let body = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if body.is_empty() {
            continue;
        }
        if keep_indent {
            let indent_len = line.len() - line.trim_start().len();
            lines.push(format!("{}{body}", &line[..indent_len]));
        } else {
            lines.push(body);
        }
    }

    restore_literals(&lines.join("\n"), &literals)
}

fn restore_literals(text: &str, literals: &[String]) -> String {
    if literals.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut parts = text.split(MARK);
    if let Some(first) = parts.next() {
        out.push_str(first);
    }
    // Parts alternate: literal index, following code.
    while let Some(index) = parts.next() {
        match index.parse::<usize>().ok().and_then(|i| literals.get(i)) {
            Some(literal) => out.push_str(literal),
            None => out.push_str(index),
        }
        if let Some(rest) = parts.next() {
            out.push_str(rest);
        }
    }
    out
}

/// Hash of the content with every comment and all whitespace outside
/// string literals removed.
///
/// Two versions with equal fingerprints differ only in formatting or
/// documentation.
pub fn formatting_fingerprint(content: &str, language: Language) -> String {
    let mut compact = String::with_capacity(content.len());
    for segment in segments(content, language) {
        match segment {
            Segment::Code(text) => compact.extend(text.chars().filter(|c| !c.is_whitespace())),
            Segment::Str(text) => compact.push_str(&text),
            Segment::Comment { .. } => {}
        }
    }
    sha256_hex(compact.as_bytes())
}

/// Produces normalized content hashes and remembers the last hash per path.
#[derive(Debug, Default)]
pub struct ContentHasher {
    memo: DashMap<PathBuf, String>,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `content` without touching the memo.
    pub fn hash_content(&self, content: &str, language: Language) -> String {
        sha256_hex(normalize(content, language).as_bytes())
    }

    /// Normalized hash of `content`, recorded as the latest for `file_path`.
    pub fn generate_hash(&self, file_path: &Path, content: &str, language: Language) -> String {
        let hash = self.hash_content(content, language);
        self.memo.insert(file_path.to_path_buf(), hash.clone());
        hash
    }

    /// Re-read `file_path` and check it still hashes to `expected_hash`.
    ///
    /// Unreadable files and unknown languages never validate.
    pub fn validate_hash_consistency(&self, file_path: &Path, expected_hash: &str) -> bool {
        let Some(language) = Language::from_path(file_path) else {
            return false;
        };
        match std::fs::read_to_string(file_path) {
            Ok(content) => self.generate_hash(file_path, &content, language) == expected_hash,
            Err(e) => {
                tracing::debug!("[hasher] cannot read {}: {e}", file_path.display());
                false
            }
        }
    }

    pub fn last_hash(&self, file_path: &Path) -> Option<String> {
        self.memo.get(file_path).map(|h| h.value().clone())
    }

    /// Drop the memo for one path, or for every path.
    pub fn clear_memo(&self, file_path: Option<&Path>) {
        match file_path {
            Some(path) => {
                self.memo.remove(path);
            }
            None => self.memo.clear(),
        }
    }
}
