//! Clause-to-category lookup.
//!
//! Two hand-maintained prefix tables, one per profile family. The longest
//! matching prefix wins and anything unmapped lands in "Other", so the
//! lookup is total and purely cosmetic: it groups failures for report
//! readability and never affects the compliance verdict.

use crate::validate::profile::ProfileKind;

const OTHER: &str = "Other";

const ARCHIVAL_CATEGORIES: &[(&str, &str)] = &[
    ("6.1", "File structure"),
    ("6.2.11", "Fonts"),
    ("6.2", "Graphics"),
    ("6.3", "Annotations"),
    ("6.4", "Interactive forms"),
    ("6.5", "Actions"),
    ("6.6", "Metadata"),
    ("6.7", "Logical structure"),
    ("6.8", "Embedded files"),
];

const ACCESSIBILITY_CATEGORIES: &[(&str, &str)] = &[
    ("5", "Metadata and identification"),
    ("7.1", "Structure and tagging"),
    ("7.2", "Natural language"),
    ("7.3", "Figures and images"),
    ("7.4", "Headings"),
    ("7.5", "Tables"),
    ("7.6", "Lists"),
    ("7.16", "Embedded files"),
    ("7.18", "Annotations"),
    ("7.21", "Fonts"),
];

/// Map a clause identifier onto its display category. Total: unknown
/// clauses fall into "Other".
pub(crate) fn category_for(profile: ProfileKind, clause: &str) -> &'static str {
    let table = match profile {
        ProfileKind::Archival3a => ARCHIVAL_CATEGORIES,
        ProfileKind::AccessibilityUa1 => ACCESSIBILITY_CATEGORIES,
    };
    table
        .iter()
        .filter(|(prefix, _)| clause_matches(clause, prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, category)| *category)
        .unwrap_or(OTHER)
}

/// Prefix match on clause-number boundaries: "6.2" covers "6.2.11" but not
/// "6.21".
fn clause_matches(clause: &str, prefix: &str) -> bool {
    match clause.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}
