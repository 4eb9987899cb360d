//! Resolve import specifiers to files known to the project.
//!
//! Resolution is purely lexical against the set of project files: nothing
//! is read from disk and package managers are not consulted. Specifiers
//! that point outside the project resolve to nothing.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use crate::language::Language;
use crate::parsing::ImportRef;

const ECMASCRIPT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts"];

/// Lexically normalize a relative path, resolving `.` and `..`.
///
/// Returns `None` when `..` would climb above the project root.
pub fn normalize(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Some(parts.iter().collect())
}

#[derive(Debug, Default, Clone)]
pub struct ImportResolver {
    files: HashSet<PathBuf>,
    /// Dotted module suffix -> file, for Python and JVM languages.
    modules: HashMap<(Language, String), PathBuf>,
    /// Directory -> Go files in it.
    go_packages: HashMap<PathBuf, Vec<PathBuf>>,
}

impl ImportResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.files.contains(file)
    }

    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter()
    }

    pub fn add_file(&mut self, file: &Path) {
        if !self.files.insert(file.to_path_buf()) {
            return;
        }
        let Some(language) = Language::from_path(file) else {
            return;
        };
        match language {
            Language::Python | Language::Java | Language::Kotlin => {
                for suffix in module_suffixes(file, language) {
                    let slot = self
                        .modules
                        .entry((language, suffix))
                        .or_insert_with(|| file.to_path_buf());
                    // Prefer the shallowest file for an ambiguous suffix.
                    if file.components().count() < slot.components().count() {
                        *slot = file.to_path_buf();
                    }
                }
            }
            Language::Go if !crate::language::is_test_file(file) => {
                let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
                let files = self.go_packages.entry(dir).or_default();
                files.push(file.to_path_buf());
                files.sort();
            }
            _ => {}
        }
    }

    pub fn remove_file(&mut self, file: &Path) {
        if !self.files.remove(file) {
            return;
        }
        self.modules.retain(|_, target| target != file);
        if let Some(dir) = file.parent() {
            if let Some(files) = self.go_packages.get_mut(dir) {
                files.retain(|f| f != file);
                if files.is_empty() {
                    self.go_packages.remove(dir);
                }
            }
        }
    }

    /// Files `import` refers to when written in `from`.
    pub fn resolve(&self, from: &Path, import: &ImportRef) -> Vec<PathBuf> {
        let Some(language) = Language::from_path(from) else {
            return Vec::new();
        };
        let source = import.source.trim();
        if source.is_empty() {
            return Vec::new();
        }

        let resolved = match language {
            Language::JavaScript | Language::TypeScript => self.resolve_ecmascript(from, source),
            Language::Python => self.resolve_python(from, import),
            Language::Rust => self.resolve_rust(from, source),
            Language::Go => return self.resolve_go(source),
            Language::Java | Language::Kotlin => self.resolve_dotted(language, source),
            Language::C | Language::Cpp => self.resolve_include(from, source),
            Language::Lua => self.resolve_relative(from, &source.replace('.', "/"), language),
            _ => self.resolve_relative(from, source, language),
        };

        resolved
            .filter(|target| target.as_path() != from)
            .into_iter()
            .collect()
    }

    fn probe(&self, candidate: &Path) -> Option<PathBuf> {
        let normalized = normalize(candidate)?;
        self.files.contains(&normalized).then_some(normalized)
    }

    fn probe_with_extensions(&self, base: &Path, extensions: &[&str]) -> Option<PathBuf> {
        if let Some(hit) = self.probe(base) {
            return Some(hit);
        }
        let name = base.file_name()?.to_string_lossy().into_owned();
        for ext in extensions {
            if let Some(hit) = self.probe(&base.with_file_name(format!("{name}.{ext}"))) {
                return Some(hit);
            }
        }
        None
    }

    fn resolve_ecmascript(&self, from: &Path, source: &str) -> Option<PathBuf> {
        if !(source.starts_with("./") || source.starts_with("../") || source.starts_with('/')) {
            return None;
        }
        let base = match source.strip_prefix('/') {
            Some(absolute) => PathBuf::from(absolute),
            None => parent_of(from).join(source),
        };

        if let Some(hit) = self.probe_with_extensions(&base, ECMASCRIPT_EXTENSIONS) {
            return Some(hit);
        }
        // TypeScript sources import `./x.js` for `./x.ts`.
        if base.extension().is_some() {
            let stem = base.with_extension("");
            if let Some(hit) = self.probe_with_extensions(&stem, ECMASCRIPT_EXTENSIONS) {
                return Some(hit);
            }
        }
        ECMASCRIPT_EXTENSIONS
            .iter()
            .find_map(|ext| self.probe(&base.join(format!("index.{ext}"))))
    }

    fn resolve_python(&self, from: &Path, import: &ImportRef) -> Option<PathBuf> {
        let source = import.source.trim();
        let dots = source.chars().take_while(|c| *c == '.').count();

        if dots == 0 {
            // `from pkg import mod` may name a submodule.
            for specifier in &import.specifiers {
                let dotted = format!("{source}.{specifier}");
                if let Some(hit) = self.modules.get(&(Language::Python, dotted)) {
                    return Some(hit.clone());
                }
            }
            return self
                .modules
                .get(&(Language::Python, source.to_string()))
                .cloned();
        }

        let mut base = parent_of(from).to_path_buf();
        for _ in 1..dots {
            base = base.parent()?.to_path_buf();
        }
        let rest = &source[dots..];
        let module_base = if rest.is_empty() {
            base.clone()
        } else {
            base.join(rest.replace('.', "/"))
        };

        for specifier in &import.specifiers {
            let candidate = module_base.join(specifier);
            if let Some(hit) = self.probe_python(&candidate) {
                return Some(hit);
            }
        }
        if rest.is_empty() {
            return self.probe(&base.join("__init__.py"));
        }
        self.probe_python(&module_base)
    }

    fn probe_python(&self, base: &Path) -> Option<PathBuf> {
        self.probe_with_extensions(base, &["py", "pyi"])
            .filter(|p| p.extension().is_some())
            .or_else(|| self.probe(&base.join("__init__.py")))
    }

    fn resolve_rust(&self, from: &Path, source: &str) -> Option<PathBuf> {
        let segments: Vec<&str> = source.split("::").filter(|s| !s.is_empty()).collect();
        let (first, rest) = segments.split_first()?;

        let module_dir = rust_module_dir(from);
        let (base, rest) = match *first {
            "crate" => (rust_crate_root(from), rest),
            "self" => (module_dir, rest),
            "super" => {
                let mut dir = module_dir.parent()?.to_path_buf();
                let mut rest = rest;
                while rest.first() == Some(&"super") {
                    dir = dir.parent()?.to_path_buf();
                    rest = &rest[1..];
                }
                (dir, rest)
            }
            _ => return None,
        };

        // `crate::a::b::Item` may name an item inside `a/b.rs`, so try the
        // longest module path first.
        for len in (1..=rest.len()).rev() {
            let module: PathBuf = rest[..len].iter().collect();
            let candidate = base.join(&module);
            if let Some(hit) = self
                .probe(&candidate.with_extension("rs"))
                .or_else(|| self.probe(&candidate.join("mod.rs")))
            {
                return Some(hit);
            }
        }
        None
    }

    fn resolve_go(&self, source: &str) -> Vec<PathBuf> {
        let best = self
            .go_packages
            .iter()
            .filter(|(dir, _)| {
                let dir = dir.to_string_lossy().replace('\\', "/");
                !dir.is_empty() && (source == dir || source.ends_with(&format!("/{dir}")))
            })
            .max_by_key(|(dir, _)| dir.components().count());
        best.map(|(_, files)| files.clone()).unwrap_or_default()
    }

    fn resolve_dotted(&self, language: Language, source: &str) -> Option<PathBuf> {
        let source = source.trim_end_matches(".*");
        self.modules.get(&(language, source.to_string())).cloned()
    }

    fn resolve_include(&self, from: &Path, source: &str) -> Option<PathBuf> {
        self.probe(&parent_of(from).join(source))
            .or_else(|| self.probe(Path::new(source)))
    }

    fn resolve_relative(&self, from: &Path, source: &str, language: Language) -> Option<PathBuf> {
        let extensions = language.extensions();
        self.probe_with_extensions(&parent_of(from).join(source), extensions)
            .or_else(|| self.probe_with_extensions(Path::new(source), extensions))
    }
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new(""))
}

/// Directory holding the submodules of a Rust source file.
fn rust_module_dir(file: &Path) -> PathBuf {
    let parent = parent_of(file).to_path_buf();
    match file.file_name().and_then(|n| n.to_str()) {
        Some("mod.rs" | "lib.rs" | "main.rs") => parent,
        _ => match file.file_stem() {
            Some(stem) => parent.join(stem),
            None => parent,
        },
    }
}

/// The nearest `src` ancestor, or the file's top-level directory.
fn rust_crate_root(file: &Path) -> PathBuf {
    let mut root = PathBuf::new();
    let mut found = None;
    for component in parent_of(file).components() {
        root.push(component);
        if component.as_os_str() == "src" {
            found = Some(root.clone());
        }
    }
    found.unwrap_or_default()
}

/// Every dotted suffix a module can be imported by.
fn module_suffixes(file: &Path, language: Language) -> Vec<String> {
    let mut parts: Vec<String> = file
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let Some(last) = parts.pop() else {
        return Vec::new();
    };
    let stem = Path::new(&last)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(last);
    if !(language == Language::Python && stem == "__init__") {
        parts.push(stem);
    }

    (0..parts.len())
        .map(|start| parts[start..].join("."))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::ImportKind;

    fn resolver(files: &[&str]) -> ImportResolver {
        let mut resolver = ImportResolver::new();
        for file in files {
            resolver.add_file(Path::new(file));
        }
        resolver
    }

    fn import(source: &str) -> ImportRef {
        ImportRef::new(source, ImportKind::Import)
    }

    fn resolve(r: &ImportResolver, from: &str, source: &str) -> Vec<PathBuf> {
        r.resolve(Path::new(from), &import(source))
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("src/a/../b.js")), Some(PathBuf::from("src/b.js")));
        assert_eq!(normalize(Path::new("./a.js")), Some(PathBuf::from("a.js")));
        assert_eq!(normalize(Path::new("../a.js")), None);
    }

    #[test]
    fn test_ecmascript_resolution() {
        let r = resolver(&[
            "src/utils/math.js",
            "src/components/index.ts",
            "src/app.ts",
            "src/lib/format.ts",
        ]);
        assert_eq!(
            resolve(&r, "src/app.ts", "./utils/math"),
            vec![PathBuf::from("src/utils/math.js")]
        );
        assert_eq!(
            resolve(&r, "src/app.ts", "./components"),
            vec![PathBuf::from("src/components/index.ts")]
        );
        assert_eq!(
            resolve(&r, "src/utils/math.js", "../lib/format.js"),
            vec![PathBuf::from("src/lib/format.ts")]
        );
        assert!(resolve(&r, "src/app.ts", "react").is_empty());
        assert!(resolve(&r, "src/app.ts", "./missing").is_empty());
    }

    #[test]
    fn test_python_resolution() {
        let r = resolver(&[
            "app/__init__.py",
            "app/models.py",
            "app/services/user.py",
            "app/services/__init__.py",
        ]);
        assert_eq!(
            resolve(&r, "app/services/user.py", "app.models"),
            vec![PathBuf::from("app/models.py")]
        );
        assert_eq!(
            resolve(&r, "app/services/user.py", "..models"),
            vec![PathBuf::from("app/models.py")]
        );
        assert_eq!(
            resolve(&r, "app/models.py", "app.services"),
            vec![PathBuf::from("app/services/__init__.py")]
        );

        let from_import = import(".").with_specifiers(vec!["models".to_string()]);
        assert_eq!(
            r.resolve(Path::new("app/__init__.py"), &from_import),
            vec![PathBuf::from("app/models.py")]
        );
        assert!(resolve(&r, "app/models.py", "os.path").is_empty());
    }

    #[test]
    fn test_rust_resolution() {
        let r = resolver(&[
            "src/lib.rs",
            "src/cache/mod.rs",
            "src/cache/key.rs",
            "src/language.rs",
        ]);
        assert_eq!(
            resolve(&r, "src/lib.rs", "self::cache"),
            vec![PathBuf::from("src/cache/mod.rs")]
        );
        assert_eq!(
            resolve(&r, "src/cache/mod.rs", "self::key"),
            vec![PathBuf::from("src/cache/key.rs")]
        );
        assert_eq!(
            resolve(&r, "src/cache/key.rs", "crate::language::Language"),
            vec![PathBuf::from("src/language.rs")]
        );
        assert_eq!(
            resolve(&r, "src/cache/key.rs", "super::super::language"),
            vec![PathBuf::from("src/language.rs")]
        );
        assert!(resolve(&r, "src/lib.rs", "std::path").is_empty());
    }

    #[test]
    fn test_go_resolution() {
        let r = resolver(&["util/strings.go", "util/numbers.go", "util/numbers_test.go", "main.go"]);
        assert_eq!(
            resolve(&r, "main.go", "example.com/app/util"),
            vec![PathBuf::from("util/numbers.go"), PathBuf::from("util/strings.go")]
        );
        assert!(resolve(&r, "main.go", "fmt").is_empty());
    }

    #[test]
    fn test_remove_file() {
        let mut r = resolver(&["a.js", "b.js"]);
        r.remove_file(Path::new("a.js"));
        assert!(resolve(&r, "b.js", "./a").is_empty());
    }
}
