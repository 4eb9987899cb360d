//! Regex-based structural surface extraction.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::lexer::strip_comments;
use super::{AstParser, AstSummary, ClassSignature, FunctionSignature, ImportKind, ImportRef, ParseOutcome};
use crate::language::Language;

macro_rules! re {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($pattern).expect("static regex must compile"));
    };
}

// ECMAScript
re!(JS_FUNCTION, r"(?m)^[ \t]*(export[ \t]+(?:default[ \t]+)?)?(async[ \t]+)?function[ \t]*\*?[ \t]*([A-Za-z_$][\w$]*)[ \t]*\(([^)]*)\)");
re!(JS_ARROW, r"(?m)^[ \t]*(export[ \t]+)?(?:const|let|var)[ \t]+([A-Za-z_$][\w$]*)[ \t]*=[ \t]*(async[ \t]+)?(?:function[ \t]*\*?[ \t]*[\w$]*[ \t]*\(([^)]*)\)|\(([^)]*)\)[ \t]*=>|([A-Za-z_$][\w$]*)[ \t]*=>)");
re!(JS_CLASS, r"(?m)^[ \t]*(export[ \t]+(?:default[ \t]+)?)?(?:abstract[ \t]+)?(class|interface)[ \t]+([A-Za-z_$][\w$]*)(?:[ \t]+extends[ \t]+([\w$.]+))?");
re!(JS_METHOD, r"^[ \t]*(?:(?:static|async|public|private|protected|readonly|get|set)[ \t]+)*([A-Za-z_$#][\w$]*)[ \t]*\(([^)]*)\)[ \t]*(?::[^{]*)?\{");
re!(JS_EXPORT_DECL, r"(?m)^[ \t]*export[ \t]+(?:default[ \t]+)?(?:async[ \t]+)?(?:function\*?|class|const|let|var|interface|type|enum|abstract[ \t]+class)[ \t]+([A-Za-z_$][\w$]*)");
re!(JS_EXPORT_DEFAULT, r"(?m)^[ \t]*export[ \t]+default[ \t]+([A-Za-z_$][\w$]*)?");
re!(JS_EXPORT_LIST, r"\bexport[ \t]*(?:type[ \t]*)?\{([^}]*)\}");
re!(JS_EXPORT_STAR, r#"\bexport[ \t]*\*[ \t]*(?:as[ \t]+(\w+)[ \t]*)?from[ \t]*['"]([^'"]+)['"]"#);
re!(CJS_EXPORT_OBJECT, r"\bmodule\.exports[ \t]*=[ \t]*\{([^}]*)\}");
re!(CJS_EXPORT_NAME, r"\bmodule\.exports[ \t]*=[ \t]*([A-Za-z_$][\w$]*)");
re!(CJS_EXPORT_PROP, r"\b(?:module\.)?exports\.([A-Za-z_$][\w$]*)[ \t]*=");
re!(JS_IMPORT_FROM, r#"\bimport[ \t]+(?:type[ \t]+)?([\w$*{}\s,]*?)[ \t]*from[ \t]*['"]([^'"]+)['"]"#);
re!(JS_IMPORT_BARE, r#"(?m)^[ \t]*import[ \t]*['"]([^'"]+)['"]"#);
re!(JS_REEXPORT_FROM, r#"\bexport[ \t]*(?:type[ \t]*)?\{[^}]*\}[ \t]*from[ \t]*['"]([^'"]+)['"]"#);
re!(JS_REQUIRE, r#"\brequire[ \t]*\([ \t]*['"]([^'"]+)['"][ \t]*\)"#);
re!(JS_DYNAMIC_IMPORT, r#"\bimport[ \t]*\([ \t]*['"]([^'"]+)['"][ \t]*\)"#);

// Python
re!(PY_DEF, r"(?m)^([ \t]*)(async[ \t]+)?def[ \t]+(\w+)[ \t]*\(([^)]*)\)");
re!(PY_CLASS, r"(?m)^([ \t]*)class[ \t]+(\w+)[ \t]*(?:\(([^)]*)\))?[ \t]*:");
re!(PY_ALL, r"(?s)__all__[ \t]*=[ \t]*[\[(](.*?)[\])]");
re!(PY_IMPORT, r"(?m)^[ \t]*import[ \t]+([\w.]+(?:[ \t]*,[ \t]*[\w.]+)*)");
re!(PY_FROM, r"(?m)^[ \t]*from[ \t]+(\.*[\w.]*)[ \t]+import[ \t]+\(?([^)\n]*)");

// Go
re!(GO_IMPORT_SINGLE, r#"(?m)^[ \t]*import[ \t]+(?:[\w.]+[ \t]+)?"([^"]+)""#);
re!(GO_IMPORT_BLOCK, r"(?s)\bimport[ \t]*\((.*?)\)");
re!(GO_QUOTED, r#""([^"]+)""#);
re!(GO_FUNC, r"(?m)^func[ \t]*(?:\(([^)]*)\)[ \t]*)?(\w+)[ \t]*(?:\[[^\]]*\])?\(([^)]*)\)");
re!(GO_TYPE, r"(?m)^type[ \t]+(\w+)[ \t]+(?:\[[^\]]*\][ \t]*)?(struct|interface)\b");
re!(GO_VALUE, r"(?m)^(?:const|var)[ \t]+([A-Z]\w*)");

// Rust
re!(RS_FN, r"(?m)^([ \t]*)(pub(?:\([^)]*\))?[ \t]+)?(?:const[ \t]+)?(async[ \t]+)?(?:unsafe[ \t]+)?(?:extern[ \t]+\x22[^\x22]*\x22[ \t]+)?fn[ \t]+(\w+)[ \t]*(?:<[^>{]*>)?[ \t]*\(([^)]*)\)");
re!(RS_TYPE, r"(?m)^[ \t]*(pub(?:\([^)]*\))?[ \t]+)?(struct|enum|trait|union)[ \t]+(\w+)");
re!(RS_PUB_ITEM, r"(?m)^[ \t]*pub[ \t]+(?:async[ \t]+)?(?:unsafe[ \t]+)?(?:fn|struct|enum|trait|mod|const|static|type|union|macro)[ \t]+(\w+)");
re!(RS_PUB_USE, r"(?m)^[ \t]*pub[ \t]+use[ \t]+([^;]+);");
re!(RS_USE, r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?use[ \t]+([^;]+);");
re!(RS_MOD, r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?mod[ \t]+(\w+)[ \t]*;");

// Everything else
re!(GEN_CLASS, r"(?m)^[ \t]*((?:(?:public|private|protected|internal|export|abstract|final|sealed|open|data|static|partial)[ \t]+)*)(class|interface|struct|enum|object|protocol|trait|module)[ \t]+([\w:]+)");
re!(GEN_FUNC, r"(?m)^[ \t]*((?:(?:public|private|protected|internal|static|final|abstract|override|open|suspend|async|virtual|inline|extern|local|def|func|fun|function|export)[ \t]+)*)(?:[\w<>\[\],.?*&]+[ \t]+)?([A-Za-z_][\w.:]*)[ \t]*\(([^)\n]*)\)[ \t]*(?:(?:->|:|throws)[^{;\n]*)?\{?[ \t]*$");
re!(GEN_INCLUDE, r#"(?m)^[ \t]*#[ \t]*include[ \t]*"([^"]+)""#);
re!(GEN_JAVA_IMPORT, r"(?m)^[ \t]*import[ \t]+(?:static[ \t]+)?([\w.]+)");
re!(GEN_USING, r"(?m)^[ \t]*using[ \t]+(?:static[ \t]+)?([\w.]+)[ \t]*;");
re!(GEN_REQUIRE, r#"\b(?:require(?:_relative|_once)?|include(?:_once)?)[ \t]*\(?[ \t]*['"]([^'"]+)['"]"#);
re!(GEN_PHP_USE, r"(?m)^[ \t]*use[ \t]+([\w\\]+)");

re!(COMPLEXITY, r"\b(?:if|for|foreach|while|case|catch|except|elif|when|guard|match)\b|&&|\|\||\?\?");

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "foreach", "while", "switch", "catch", "return", "function", "match", "else",
    "elif", "except", "with", "when", "new", "sizeof", "typeof", "do", "try", "super", "this",
    "constructor_call",
];

/// Heuristic [`AstParser`] backed by regular expressions.
///
/// Comments are stripped first so that commented-out code never shows up
/// in the surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurfaceParser;

impl SurfaceParser {
    pub fn new() -> Self {
        Self
    }

    /// Extract the structural surface of `content` written in `language`.
    pub fn summarize(&self, content: &str, language: Language) -> AstSummary {
        let code = strip_comments(content, language, false);
        let mut summary = match language {
            Language::JavaScript | Language::TypeScript => summarize_ecmascript(&code),
            Language::Python => summarize_python(&code),
            Language::Go => summarize_go(&code),
            Language::Rust => summarize_rust(&code),
            other => summarize_generic(&code, other),
        };
        summary.complexity = 1 + COMPLEXITY.find_iter(&code).count() as u32;
        summary.exports.sort();
        summary.exports.dedup();
        summary
    }
}

impl AstParser for SurfaceParser {
    fn parse_file(&self, path: &Path, content: &str) -> ParseOutcome {
        match Language::from_path(path) {
            Some(language) => ParseOutcome::ok(self.summarize(content, language)),
            None => ParseOutcome::failed(format!("unsupported language: {}", path.display())),
        }
    }
}

fn split_params(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}

fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            // `a as b` exports `b`; `type T` exports `T`
            let name = part.rsplit(char::is_whitespace).next().unwrap_or(part);
            Some(name.trim_matches(|c| c == '"' || c == '\'').to_string())
        })
        .filter(|n| !n.is_empty())
        .collect()
}

fn line_of(code: &str, offset: usize) -> usize {
    code[..offset].bytes().filter(|b| *b == b'\n').count()
}

/// Net brace depth at the start of each line.
fn brace_depths(code: &str) -> Vec<i32> {
    let mut depths = Vec::new();
    let mut depth = 0i32;
    for line in code.lines() {
        depths.push(depth);
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
        }
    }
    depths
}

fn summarize_ecmascript(code: &str) -> AstSummary {
    let mut summary = AstSummary::default();

    for cap in JS_FUNCTION.captures_iter(code) {
        let mut sig = FunctionSignature::new(&cap[3], split_params(&cap[4]));
        sig.exported = cap.get(1).is_some();
        sig.is_async = cap.get(2).is_some();
        summary.functions.push(sig);
    }

    for cap in JS_ARROW.captures_iter(code) {
        let params = cap
            .get(4)
            .or_else(|| cap.get(5))
            .or_else(|| cap.get(6))
            .map(|m| split_params(m.as_str()))
            .unwrap_or_default();
        let mut sig = FunctionSignature::new(&cap[2], params);
        sig.exported = cap.get(1).is_some();
        sig.is_async = cap.get(3).is_some();
        summary.functions.push(sig);
    }

    // Classes and their methods, tracked by brace depth.
    let lines: Vec<&str> = code.lines().collect();
    let depths = brace_depths(code);
    for cap in JS_CLASS.captures_iter(code) {
        let Some(whole) = cap.get(0) else { continue };
        let mut class = ClassSignature::new(&cap[3]);
        class.exported = cap.get(1).is_some();
        class.extends = cap.get(4).map(|m| m.as_str().to_string());

        let start = line_of(code, whole.start());
        let class_depth = depths.get(start).copied().unwrap_or(0);
        for (idx, line) in lines.iter().enumerate().skip(start + 1) {
            let depth = depths[idx];
            if depth <= class_depth {
                break;
            }
            if depth != class_depth + 1 {
                continue;
            }
            if let Some(m) = JS_METHOD.captures(line) {
                let name = &m[1];
                if CONTROL_KEYWORDS.contains(&name) {
                    continue;
                }
                let sig = FunctionSignature::new(name, split_params(&m[2]));
                let rendered = if line.contains("async ") {
                    format!("async {}", sig.render())
                } else {
                    sig.render()
                };
                class.methods.push(rendered);
            }
        }
        summary.classes.push(class);
    }

    // Exports
    for cap in JS_EXPORT_DECL.captures_iter(code) {
        summary.exports.push(cap[1].to_string());
    }
    for cap in JS_EXPORT_DEFAULT.captures_iter(code) {
        // `export default function foo` is already named by JS_EXPORT_DECL.
        match cap.get(1).map(|m| m.as_str()) {
            Some("function" | "class" | "async" | "abstract") | None => {
                summary.exports.push("default".to_string())
            }
            Some(name) => summary.exports.push(format!("default:{name}")),
        }
    }
    for cap in JS_EXPORT_LIST.captures_iter(code) {
        summary.exports.extend(split_names(&cap[1]));
    }
    for cap in JS_EXPORT_STAR.captures_iter(code) {
        match cap.get(1) {
            Some(ns) => summary.exports.push(ns.as_str().to_string()),
            None => summary.exports.push(format!("*:{}", &cap[2])),
        }
    }
    for cap in CJS_EXPORT_OBJECT.captures_iter(code) {
        summary.exports.extend(
            split_names(&cap[1])
                .into_iter()
                .map(|n| n.split(':').next().unwrap_or(&n).trim().to_string()),
        );
    }
    if !CJS_EXPORT_OBJECT.is_match(code) {
        for cap in CJS_EXPORT_NAME.captures_iter(code) {
            summary.exports.push(format!("default:{}", &cap[1]));
        }
    }
    for cap in CJS_EXPORT_PROP.captures_iter(code) {
        summary.exports.push(cap[1].to_string());
    }

    // Exported functions and classes carry the flag.
    let exported: std::collections::HashSet<&str> =
        summary.exports.iter().map(String::as_str).collect();
    let flagged: Vec<bool> = summary
        .functions
        .iter()
        .map(|f| f.exported || exported.contains(f.name.as_str()))
        .collect();
    for (f, flag) in summary.functions.iter_mut().zip(flagged) {
        f.exported = flag;
    }

    // Imports
    for cap in JS_IMPORT_FROM.captures_iter(code) {
        let specifiers = cap[1]
            .replace(['{', '}'], ",")
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.rsplit(char::is_whitespace).next().unwrap_or(s).to_string())
            .collect();
        summary
            .imports
            .push(ImportRef::new(&cap[2], ImportKind::Import).with_specifiers(specifiers));
    }
    for cap in JS_IMPORT_BARE.captures_iter(code) {
        summary.imports.push(ImportRef::new(&cap[1], ImportKind::Import));
    }
    for cap in JS_REEXPORT_FROM.captures_iter(code) {
        summary.imports.push(ImportRef::new(&cap[1], ImportKind::Import));
    }
    for cap in JS_EXPORT_STAR.captures_iter(code) {
        summary.imports.push(ImportRef::new(&cap[2], ImportKind::Import));
    }
    for cap in JS_REQUIRE.captures_iter(code) {
        summary.imports.push(ImportRef::new(&cap[1], ImportKind::Require));
    }
    for cap in JS_DYNAMIC_IMPORT.captures_iter(code) {
        summary.imports.push(ImportRef::new(&cap[1], ImportKind::Dynamic));
    }

    summary
}

fn summarize_python(code: &str) -> AstSummary {
    let mut summary = AstSummary::default();

    // (indent, index into classes)
    let mut class_spans: Vec<(usize, usize, usize)> = Vec::new();
    for cap in PY_CLASS.captures_iter(code) {
        let Some(whole) = cap.get(0) else { continue };
        let mut class = ClassSignature::new(&cap[2]);
        class.extends = cap
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());
        class.exported = cap[1].is_empty() && !cap[2].starts_with('_');
        class_spans.push((whole.start(), cap[1].len(), summary.classes.len()));
        summary.classes.push(class);
    }

    for cap in PY_DEF.captures_iter(code) {
        let Some(whole) = cap.get(0) else { continue };
        let indent = cap[1].len();
        let mut sig = FunctionSignature::new(&cap[3], split_params(&cap[4]));
        sig.is_async = cap.get(2).is_some();

        if indent == 0 {
            sig.exported = !sig.name.starts_with('_');
            summary.functions.push(sig);
            continue;
        }

        // Attach to the closest preceding class with a smaller indent.
        let owner = class_spans
            .iter()
            .rev()
            .find(|(start, class_indent, _)| *start < whole.start() && *class_indent < indent);
        match owner {
            Some((_, _, idx)) => summary.classes[*idx].methods.push(sig.render()),
            None => summary.functions.push(sig),
        }
    }

    match PY_ALL.captures(code) {
        Some(cap) => summary.exports = split_names(&cap[1]),
        None => {
            summary.exports.extend(
                summary
                    .functions
                    .iter()
                    .filter(|f| f.exported)
                    .map(|f| f.name.clone()),
            );
            summary.exports.extend(
                summary
                    .classes
                    .iter()
                    .filter(|c| c.exported)
                    .map(|c| c.name.clone()),
            );
        }
    }

    for cap in PY_IMPORT.captures_iter(code) {
        for module in cap[1].split(',') {
            summary
                .imports
                .push(ImportRef::new(module.trim(), ImportKind::Import));
        }
    }
    for cap in PY_FROM.captures_iter(code) {
        let specifiers = split_names(&cap[2].replace(')', ""));
        summary
            .imports
            .push(ImportRef::new(&cap[1], ImportKind::Import).with_specifiers(specifiers));
    }

    summary
}

fn is_go_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn summarize_go(code: &str) -> AstSummary {
    let mut summary = AstSummary::default();

    for cap in GO_TYPE.captures_iter(code) {
        let mut class = ClassSignature::new(&cap[1]);
        class.exported = is_go_exported(&cap[1]);
        if class.exported {
            summary.exports.push(cap[1].to_string());
        }
        summary.classes.push(class);
    }

    for cap in GO_FUNC.captures_iter(code) {
        let name = &cap[2];
        let mut sig = FunctionSignature::new(name, split_params(&cap[3]));
        sig.exported = is_go_exported(name);

        let receiver_type = cap.get(1).and_then(|r| {
            r.as_str()
                .split_whitespace()
                .last()
                .map(|t| t.trim_start_matches('*').to_string())
        });
        match receiver_type {
            Some(recv) => {
                if let Some(class) = summary.classes.iter_mut().find(|c| c.name == recv) {
                    class.methods.push(sig.render());
                }
                if sig.exported && is_go_exported(&recv) {
                    summary.exports.push(format!("{recv}.{name}"));
                }
            }
            None => {
                if sig.exported {
                    summary.exports.push(name.to_string());
                }
                summary.functions.push(sig);
            }
        }
    }

    for cap in GO_VALUE.captures_iter(code) {
        summary.exports.push(cap[1].to_string());
    }

    for cap in GO_IMPORT_SINGLE.captures_iter(code) {
        summary.imports.push(ImportRef::new(&cap[1], ImportKind::Import));
    }
    for block in GO_IMPORT_BLOCK.captures_iter(code) {
        for cap in GO_QUOTED.captures_iter(&block[1]) {
            summary.imports.push(ImportRef::new(&cap[1], ImportKind::Import));
        }
    }

    summary
}

fn summarize_rust(code: &str) -> AstSummary {
    let mut summary = AstSummary::default();

    for cap in RS_TYPE.captures_iter(code) {
        let mut class = ClassSignature::new(&cap[3]);
        class.exported = cap.get(1).is_some_and(|m| m.as_str().trim() == "pub");
        summary.classes.push(class);
    }

    for cap in RS_FN.captures_iter(code) {
        let mut sig = FunctionSignature::new(&cap[4], split_params(&cap[5]));
        sig.is_async = cap.get(3).is_some();
        sig.exported = cap.get(2).is_some_and(|m| m.as_str().trim() == "pub");
        summary.functions.push(sig);
    }

    for cap in RS_PUB_ITEM.captures_iter(code) {
        summary.exports.push(cap[1].to_string());
    }
    for cap in RS_PUB_USE.captures_iter(code) {
        summary
            .exports
            .push(format!("use:{}", cap[1].split_whitespace().collect::<String>()));
    }

    for cap in RS_USE.captures_iter(code) {
        let path: String = cap[1].split_whitespace().collect();
        // `a::b::{C, D}` imports from `a::b`
        let (source, specifiers) = match path.find("::{") {
            Some(idx) => (
                path[..idx].to_string(),
                split_names(path[idx + 3..].trim_end_matches('}')),
            ),
            None => (path.clone(), Vec::new()),
        };
        summary
            .imports
            .push(ImportRef::new(source, ImportKind::Import).with_specifiers(specifiers));
    }
    for cap in RS_MOD.captures_iter(code) {
        summary
            .imports
            .push(ImportRef::new(format!("self::{}", &cap[1]), ImportKind::Import));
    }

    summary
}

fn summarize_generic(code: &str, language: Language) -> AstSummary {
    let mut summary = AstSummary::default();
    let visibility_keywords = matches!(
        language,
        Language::Java | Language::CSharp | Language::Swift | Language::Kotlin | Language::Php
    );

    for cap in GEN_CLASS.captures_iter(code) {
        let modifiers = cap.get(1).map(|m| m.as_str()).unwrap_or("");
        let mut class = ClassSignature::new(&cap[3]);
        class.exported = if visibility_keywords {
            modifiers.contains("public") || modifiers.contains("open")
        } else {
            true
        };
        if class.exported {
            summary.exports.push(class.name.clone());
        }
        summary.classes.push(class);
    }

    for cap in GEN_FUNC.captures_iter(code) {
        let name = &cap[2];
        let short = name.rsplit(['.', ':']).next().unwrap_or(name);
        if CONTROL_KEYWORDS.contains(&short) {
            continue;
        }
        let modifiers = cap.get(1).map(|m| m.as_str()).unwrap_or("");
        let mut sig = FunctionSignature::new(name, split_params(&cap[3]));
        sig.is_async = modifiers.contains("async") || modifiers.contains("suspend");
        sig.exported = if visibility_keywords {
            modifiers.contains("public") || modifiers.contains("open")
        } else {
            !modifiers.contains("local") && !modifiers.contains("static")
        };
        if sig.exported {
            summary.exports.push(name.to_string());
        }
        summary.functions.push(sig);
    }

    let import_patterns: &[(&Regex, ImportKind)] = match language {
        Language::C | Language::Cpp => &[(&GEN_INCLUDE, ImportKind::Import)],
        Language::Java | Language::Kotlin | Language::Swift => {
            &[(&GEN_JAVA_IMPORT, ImportKind::Import)]
        }
        Language::CSharp => &[(&GEN_USING, ImportKind::Import)],
        Language::Php => &[
            (&GEN_REQUIRE, ImportKind::Require),
            (&GEN_PHP_USE, ImportKind::Import),
        ],
        _ => &[(&GEN_REQUIRE, ImportKind::Require)],
    };
    for (pattern, kind) in import_patterns {
        for cap in pattern.captures_iter(code) {
            summary.imports.push(ImportRef::new(&cap[1], *kind));
        }
    }

    summary
}
