//! Change impact classification by structural surface diffing.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::ContentHasher;
use crate::cache::hasher::formatting_fingerprint;
use crate::change::{ChangeEvent, ChangeType};
use crate::language::Language;
use crate::parsing::{AstParser, AstSummary};

/// How far a change can ripple, from "nothing changed" up.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ChangeImpact {
    None,
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl ChangeImpact {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeImpact::None => "none",
            ChangeImpact::Low => "low",
            ChangeImpact::Medium => "medium",
            ChangeImpact::High => "high",
            ChangeImpact::Critical => "critical",
        }
    }
}

impl fmt::Display for ChangeImpact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeImpact {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ChangeImpact::None),
            "low" => Ok(ChangeImpact::Low),
            "medium" => Ok(ChangeImpact::Medium),
            "high" => Ok(ChangeImpact::High),
            "critical" => Ok(ChangeImpact::Critical),
            other => Err(format!("unknown impact level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactAnalysis {
    pub impact: ChangeImpact,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<String>,
}

impl ImpactAnalysis {
    fn new(impact: ChangeImpact, reason: impl Into<String>) -> Self {
        Self {
            impact,
            reason: reason.into(),
            old_hash: None,
            new_hash: None,
        }
    }

    fn with_hashes(mut self, old: String, new: String) -> Self {
        self.old_hash = Some(old);
        self.new_hash = Some(new);
        self
    }
}

/// Classifies change events using normalized hashes and parser surfaces.
#[derive(Clone)]
pub struct ImpactClassifier {
    hasher: Arc<ContentHasher>,
    parser: Arc<dyn AstParser>,
}

impl fmt::Debug for ImpactClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImpactClassifier").finish_non_exhaustive()
    }
}

impl ImpactClassifier {
    pub fn new(hasher: Arc<ContentHasher>, parser: Arc<dyn AstParser>) -> Self {
        Self { hasher, parser }
    }

    pub fn classify(&self, event: &ChangeEvent) -> ImpactAnalysis {
        match &event.change_type {
            ChangeType::Delete => {
                return ImpactAnalysis::new(ChangeImpact::Critical, "file deleted");
            }
            ChangeType::Rename { from } => {
                return ImpactAnalysis::new(
                    ChangeImpact::Critical,
                    format!("file renamed from {}", from.display()),
                );
            }
            ChangeType::Add | ChangeType::Modify => {}
        }

        let (Some(old), Some(new)) = (&event.old_content, &event.new_content) else {
            return ImpactAnalysis::new(ChangeImpact::Medium, "previous content unavailable");
        };
        let Some(language) = Language::from_path(&event.file_path) else {
            return ImpactAnalysis::new(ChangeImpact::Medium, "unknown language");
        };

        let old_hash = self.hasher.hash_content(old, language);
        let new_hash = self
            .hasher
            .generate_hash(&event.file_path, new, language);
        if old_hash == new_hash {
            return ImpactAnalysis::new(ChangeImpact::None, "normalized content unchanged")
                .with_hashes(old_hash, new_hash);
        }

        let analysis = self.compare(event, old, new, language);
        analysis.with_hashes(old_hash, new_hash)
    }

    fn compare(&self, event: &ChangeEvent, old: &str, new: &str, language: Language) -> ImpactAnalysis {
        let before = self.parser.parse_file(&event.file_path, old).into_ast();
        let after = self.parser.parse_file(&event.file_path, new).into_ast();
        let (Some(before), Some(after)) = (before, after) else {
            return ImpactAnalysis::new(ChangeImpact::Medium, "content changed, parse failed");
        };

        if let Some(diff) = surface_diff(&before.export_surface(), &after.export_surface()) {
            return ImpactAnalysis::new(ChangeImpact::Critical, format!("exports changed: {diff}"));
        }
        if let Some(diff) = signature_diff(&before, &after) {
            return ImpactAnalysis::new(ChangeImpact::High, format!("signatures changed: {diff}"));
        }
        if formatting_fingerprint(old, language) == formatting_fingerprint(new, language) {
            return ImpactAnalysis::new(ChangeImpact::Low, "formatting or documentation only");
        }
        ImpactAnalysis::new(ChangeImpact::Medium, "implementation changed")
    }
}

fn signature_diff(before: &AstSummary, after: &AstSummary) -> Option<String> {
    let functions = surface_diff(&before.function_surface(), &after.function_surface());
    let classes = surface_diff(&before.class_surface(), &after.class_surface());
    match (functions, classes) {
        (None, None) => None,
        (Some(f), None) => Some(f),
        (None, Some(c)) => Some(c),
        (Some(f), Some(c)) => Some(format!("{f}; {c}")),
    }
}

/// `-removed +added` summary, or `None` when the sets are equal.
fn surface_diff(before: &BTreeSet<String>, after: &BTreeSet<String>) -> Option<String> {
    if before == after {
        return None;
    }
    let removed = before.difference(after).map(|s| format!("-{s}"));
    let added = after.difference(before).map(|s| format!("+{s}"));
    Some(removed.chain(added).collect::<Vec<_>>().join(" "))
}
