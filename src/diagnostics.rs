//! Program-level diagnostics and graph-inspection nodes.
//!
//! Per-method defects that stem from genuine input problems are collected
//! here and surfaced once after the rest of the program has been
//! attempted, so one bad input archive does not hide other problems.
//! Compilation still ultimately fails when any error-level diagnostic was
//! collected.
//!
//! Warning-level feature diagnostics (e.g. an always-throwing invoke kept
//! alive for an old API level) are deduplicated per kind: users get one
//! line with the minimum API information, not one line per call site.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use strum::IntoStaticStr;

use crate::model::{FieldId, MethodId, TypeId};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// Reported, compilation continues.
    Warning,
    /// Reported, compilation ultimately fails.
    Error,
}

/// Classified diagnostic kinds; the dedup unit for warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum DiagnosticKind {
    /// Input bytecode failed verification.
    MalformedInput,
    /// A class or member was defined twice.
    DuplicateDefinition,
    /// An invoke target does not resolve.
    UnresolvedTarget,
    /// An invoke target resolves but is inaccessible.
    InaccessibleTarget,
    /// An invoke's dispatch kind contradicts the target's static-ness.
    StaticMismatch,
    /// A language/platform feature unsupported below some API level.
    UnsupportedFeature,
}

/// Where a diagnostic originates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Unknown provenance.
    Unknown,
    /// A source archive or file.
    Archive(String),
    /// A program class.
    Class(TypeId),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "<unknown>"),
            Self::Archive(name) => write!(f, "{name}"),
            Self::Class(ty) => write!(f, "class {ty}"),
        }
    }
}

/// One collected diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity.
    pub level: DiagnosticLevel,
    /// Classification.
    pub kind: DiagnosticKind,
    /// Provenance.
    pub origin: Origin,
    /// The method involved, when position information is available.
    pub method: Option<MethodId>,
    /// Minimum API level at which the construct is supported, when the
    /// diagnostic is API-gated.
    pub min_api: Option<u32>,
    /// Human-readable message.
    pub message: String,
}

/// Thread-safe diagnostic sink with per-kind warning dedup.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Mutex<Vec<Diagnostic>>,
    reported_kinds: Mutex<HashMap<DiagnosticKind, u32>>,
}

impl Diagnostics {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic unconditionally.
    pub fn report(&self, diagnostic: Diagnostic) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(diagnostic);
        }
    }

    /// Records a warning once per kind, keeping the smallest API level
    /// seen for that kind.
    pub fn report_once_per_kind(&self, diagnostic: Diagnostic) {
        let Ok(mut seen) = self.reported_kinds.lock() else {
            return;
        };
        let api = diagnostic.min_api.unwrap_or(0);
        match seen.get_mut(&diagnostic.kind) {
            Some(existing_api) => {
                if api < *existing_api {
                    *existing_api = api;
                    if let Ok(mut entries) = self.entries.lock() {
                        if let Some(slot) = entries
                            .iter_mut()
                            .find(|d| d.kind == diagnostic.kind)
                        {
                            *slot = diagnostic;
                        }
                    }
                }
            }
            None => {
                seen.insert(diagnostic.kind, api);
                drop(seen);
                self.report(diagnostic);
            }
        }
    }

    /// Number of collected diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if any error-level diagnostic was collected.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries
            .lock()
            .map(|e| e.iter().any(|d| d.level == DiagnosticLevel::Error))
            .unwrap_or(false)
    }

    /// Snapshot of the collected diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

/// A node of the keep/retention inspection graph.
///
/// One tagged union instead of an open class hierarchy: the set of node
/// kinds is closed, and identity/equality derive structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphNodeKind {
    /// A program class.
    Class(TypeId),
    /// A program method.
    Method(MethodId),
    /// A program field.
    Field(FieldId),
    /// An annotation type.
    Annotation(TypeId),
    /// A keep rule, by rule index.
    KeepRule(usize),
}

impl GraphNodeKind {
    /// Structural identity: (variant tag, item index).
    #[must_use]
    pub const fn identity(&self) -> (u8, usize) {
        match self {
            Self::Class(ty) => (0, ty.index()),
            Self::Method(m) => (1, m.index()),
            Self::Field(f) => (2, f.index()),
            Self::Annotation(ty) => (3, ty.index()),
            Self::KeepRule(index) => (4, *index),
        }
    }
}

impl fmt::Display for GraphNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(ty) => write!(f, "class {ty}"),
            Self::Method(m) => write!(f, "method {m}"),
            Self::Field(field) => write!(f, "field {field}"),
            Self::Annotation(ty) => write!(f, "annotation {ty}"),
            Self::KeepRule(index) => write!(f, "keep-rule #{index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(kind: DiagnosticKind, min_api: Option<u32>) -> Diagnostic {
        Diagnostic {
            level: DiagnosticLevel::Warning,
            kind,
            origin: Origin::Unknown,
            method: None,
            min_api,
            message: "test".to_string(),
        }
    }

    #[test]
    fn test_report_collects() {
        let diagnostics = Diagnostics::new();
        assert!(diagnostics.is_empty());

        diagnostics.report(warning(DiagnosticKind::UnresolvedTarget, None));
        assert_eq!(diagnostics.len(), 1);
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_errors_detected() {
        let diagnostics = Diagnostics::new();
        diagnostics.report(Diagnostic {
            level: DiagnosticLevel::Error,
            kind: DiagnosticKind::MalformedInput,
            origin: Origin::Archive("input.jar".to_string()),
            method: None,
            min_api: None,
            message: "bad".to_string(),
        });
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn test_dedup_per_kind_keeps_min_api() {
        let diagnostics = Diagnostics::new();
        diagnostics.report_once_per_kind(warning(DiagnosticKind::UnsupportedFeature, Some(26)));
        diagnostics.report_once_per_kind(warning(DiagnosticKind::UnsupportedFeature, Some(21)));
        diagnostics.report_once_per_kind(warning(DiagnosticKind::UnsupportedFeature, Some(24)));

        assert_eq!(diagnostics.len(), 1, "one entry per kind");
        assert_eq!(diagnostics.snapshot()[0].min_api, Some(21));
    }

    #[test]
    fn test_dedup_distinct_kinds_kept() {
        let diagnostics = Diagnostics::new();
        diagnostics.report_once_per_kind(warning(DiagnosticKind::UnsupportedFeature, Some(26)));
        diagnostics.report_once_per_kind(warning(DiagnosticKind::StaticMismatch, None));
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_graph_node_identity() {
        let a = GraphNodeKind::Class(TypeId::new(3));
        let b = GraphNodeKind::Annotation(TypeId::new(3));
        assert_ne!(a.identity(), b.identity(), "tag distinguishes kinds");
        assert_eq!(a.identity().1, b.identity().1);
        assert_ne!(a, b);
        assert_eq!(a, GraphNodeKind::Class(TypeId::new(3)));
    }
}
