//! ISO conformance validation.
//!
//! [`ValidationEngine`] runs the fixed profile pair — archival (PDF/A-3a)
//! and accessibility (PDF/UA-1) — over PDF bytes and assembles a single
//! [`ComplianceReport`]: per-profile pass/fail counts, categorized
//! failures, document facts, and Info-dictionary metadata. A failing
//! conformance check is expected output; only unexpected conditions (an
//! unparsable document, a broken registry) surface as errors.

mod categories;
mod checks;
mod document;
mod profile;
pub mod report;

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::error::{ArkivError, Result};
use document::PdfUnderTest;
use profile::ProfileKind;
pub use report::{
    CategoryCount, ComplianceReport, DocumentInfo, FontInfo, PdfMetadata, ProfileResult,
    ValidationFailure, ValidationSummary,
};

/// Display cap for the failures list. Counts stay exact beyond it.
pub const MAX_REPORTED_FAILURES: usize = 100;

struct Registry {
    profiles: Vec<(ProfileKind, &'static [checks::Assertion])>,
}

/// Conformance checker with one-time, lazily initialized profile registry.
///
/// The first caller builds the registry; concurrent callers block until it
/// exists and share it read-only. A failed initialization is not cached —
/// the next request retries.
pub struct ValidationEngine {
    registry: OnceCell<Registry>,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self {
            registry: OnceCell::new(),
        }
    }

    /// Eagerly initialize the assertion registry. Idempotent.
    pub fn init(&self) -> Result<()> {
        self.registry().map(|_| ())
    }

    fn registry(&self) -> Result<&Registry> {
        self.registry.get_or_try_init(|| {
            let profiles: Vec<(ProfileKind, &'static [checks::Assertion])> = ProfileKind::ALL
                .iter()
                .map(|&kind| {
                    let assertions = match kind {
                        ProfileKind::Archival3a => checks::archival_assertions(),
                        ProfileKind::AccessibilityUa1 => checks::accessibility_assertions(),
                    };
                    (kind, assertions)
                })
                .collect();
            for (kind, assertions) in &profiles {
                if assertions.is_empty() {
                    return Err(ArkivError::Validation(format!(
                        "profile {} registered no assertions",
                        kind.name()
                    )));
                }
            }
            Ok(Registry { profiles })
        })
    }

    /// Validate PDF bytes against every target profile.
    pub fn validate(&self, pdf: &[u8]) -> Result<ComplianceReport> {
        let registry = self.registry()?;
        let parsed = PdfUnderTest::parse(pdf)?;

        let mut profiles = Vec::new();
        let mut failures: Vec<ValidationFailure> = Vec::new();
        let mut category_counts: HashMap<&'static str, u32> = HashMap::new();

        for (kind, assertions) in &registry.profiles {
            let mut passed = 0u32;
            let mut failed = 0u32;
            for assertion in *assertions {
                let violations = (assertion.check)(&parsed);
                if violations.is_empty() {
                    passed += 1;
                    continue;
                }
                failed += violations.len() as u32;
                let category = categories::category_for(*kind, assertion.clause);
                *category_counts.entry(category).or_insert(0) += violations.len() as u32;
                for violation in violations {
                    let detail = violation
                        .detail
                        .filter(|d| d != assertion.description);
                    failures.push(ValidationFailure {
                        profile: kind.name().to_string(),
                        clause: assertion.clause.to_string(),
                        test: assertion.test,
                        category: category.to_string(),
                        message: assertion.description.to_string(),
                        location: violation.location,
                        detail,
                    });
                }
            }
            profiles.push(ProfileResult {
                profile: kind.name().to_string(),
                specification: kind.specification().to_string(),
                is_compliant: failed == 0,
                passed_checks: passed,
                failed_checks: failed,
            });
        }

        let mut categories: Vec<CategoryCount> = category_counts
            .into_iter()
            .map(|(category, count)| CategoryCount {
                category: category.to_string(),
                count,
            })
            .collect();
        categories.sort_by(|a, b| b.count.cmp(&a.count).then(a.category.cmp(&b.category)));

        let summary = ValidationSummary {
            passed_checks: profiles.iter().map(|p| p.passed_checks).sum(),
            failed_checks: profiles.iter().map(|p| p.failed_checks).sum(),
            categories,
        };

        let document_info = DocumentInfo {
            pages: parsed.page_count(),
            tagged: parsed.is_tagged(),
            language: parsed.language(),
            structure_elements: parsed.struct_element_count(),
            fonts: parsed
                .fonts()
                .into_iter()
                .map(|f| FontInfo {
                    name: f.name,
                    embedded: f.embedded,
                    subtype: f.subtype,
                })
                .collect(),
            images: parsed.image_count(),
        };

        let metadata = parsed.metadata();
        let is_compliant = profiles.iter().all(|p| p.is_compliant);
        failures.truncate(MAX_REPORTED_FAILURES);

        debug!(
            compliant = is_compliant,
            failed = summary.failed_checks,
            pages = document_info.pages,
            "validation finished"
        );

        Ok(ComplianceReport {
            is_compliant,
            profiles,
            summary,
            document_info,
            failures,
            metadata,
        })
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::{validate_requests, AttachmentEmbedder, AttachmentRequest};
    use crate::fonts::FontCatalog;
    use crate::render::{PdfRenderer, RenderOptions};
    use base64::Engine;
    use lopdf::{dictionary, Document, Object, Stream};
    use std::sync::Arc;

    fn render(html: &str) -> Vec<u8> {
        let renderer = PdfRenderer::new(Arc::new(FontCatalog::new()));
        renderer
            .render(
                html,
                &RenderOptions {
                    producer: "arkiv test".to_string(),
                    base_url: None,
                    resolver: None,
                },
            )
            .unwrap()
    }

    const FULL_METADATA_HTML: &str = r#"<html lang="en-US">
        <head>
            <title>Annual Report</title>
            <meta name="author" content="Jordan Example">
            <meta name="subject" content="Figures for the year">
        </head>
        <body>
            <h1>Annual Report</h1>
            <p>All figures are preliminary.</p>
            <h2>Details</h2>
            <ul><li>First point</li><li>Second point</li></ul>
            <table>
                <thead><tr><th>Quarter</th><th>Revenue</th></tr></thead>
                <tbody><tr><td>Q1</td><td>118</td></tr></tbody>
            </table>
        </body></html>"#;

    /// A structurally valid PDF that satisfies neither profile: no XMP, no
    /// output intent, an unembedded standard font, no tagging.
    fn noncompliant_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content_id = doc.add_object(Stream::new(
            lopdf::Dictionary::new(),
            b"BT /F1 12 Tf 72 700 Td (hello) Tj ET".to_vec(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
            "Resources" => Object::Dictionary(dictionary! {
                "Font" => Object::Dictionary(dictionary! { "F1" => font_id }),
            }),
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_round_trip_full_metadata_is_compliant() {
        let engine = ValidationEngine::new();
        let report = engine.validate(&render(FULL_METADATA_HTML)).unwrap();

        assert!(report.is_compliant, "failures: {:?}", report.failures);
        assert_eq!(report.summary.failed_checks, 0);
        assert!(report.summary.categories.is_empty());
        assert_eq!(report.profiles.len(), 2);
        assert_eq!(report.profiles[0].profile, "archival-3a");
        assert_eq!(report.profiles[1].profile, "accessibility-1");
        for profile in &report.profiles {
            assert!(profile.is_compliant);
            assert_eq!(profile.failed_checks, 0);
            assert!(profile.passed_checks >= 10);
        }
    }

    #[test]
    fn test_round_trip_metadata_extraction() {
        let engine = ValidationEngine::new();
        let report = engine.validate(&render(FULL_METADATA_HTML)).unwrap();

        assert_eq!(report.metadata.title.as_deref(), Some("Annual Report"));
        assert_eq!(report.metadata.author.as_deref(), Some("Jordan Example"));
        assert_eq!(
            report.metadata.subject.as_deref(),
            Some("Figures for the year")
        );
        assert_eq!(report.metadata.producer.as_deref(), Some("arkiv test"));
        let created = report.metadata.creation_date.expect("creation date");
        assert!(created.contains('T') && created.ends_with('Z'), "{created}");
    }

    #[test]
    fn test_round_trip_document_info() {
        let engine = ValidationEngine::new();
        let report = engine.validate(&render(FULL_METADATA_HTML)).unwrap();
        let info = &report.document_info;

        assert_eq!(info.pages, 1);
        assert!(info.tagged);
        assert_eq!(info.language.as_deref(), Some("en-US"));
        assert!(info.structure_elements > 5);
        assert!(!info.fonts.is_empty());
        assert!(info.fonts.iter().all(|f| f.embedded));
        let names: Vec<&str> = info.fonts.iter().map(|f| f.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted, "font inventory must be sorted by name");
        assert_eq!(info.images, 0);
    }

    #[test]
    fn test_minimal_heading_document_validates_without_error() {
        let engine = ValidationEngine::new();
        let report = engine
            .validate(&render("<html><body><h1>Test</h1></body></html>"))
            .unwrap();
        assert_eq!(report.document_info.pages, 1);
    }

    #[test]
    fn test_noncompliant_pdf_fails_both_profiles() {
        let engine = ValidationEngine::new();
        let report = engine.validate(&noncompliant_pdf()).unwrap();

        assert!(!report.is_compliant);
        for profile in &report.profiles {
            assert!(!profile.is_compliant, "{} should fail", profile.profile);
            assert!(profile.failed_checks > 0);
        }
        assert!(report
            .failures
            .iter()
            .any(|f| f.clause == "6.2.11.4" && f.location.as_deref() == Some("font Helvetica")));
        assert!(report.failures.iter().any(|f| f.clause == "7.2"));
    }

    #[test]
    fn test_category_counts_sum_to_failed_checks() {
        let engine = ValidationEngine::new();
        let report = engine.validate(&noncompliant_pdf()).unwrap();

        let category_total: u32 = report.summary.categories.iter().map(|c| c.count).sum();
        assert_eq!(category_total, report.summary.failed_checks);

        // descending by count
        let counts: Vec<u32> = report.summary.categories.iter().map(|c| c.count).collect();
        let mut sorted = counts.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(counts, sorted);
    }

    #[test]
    fn test_failure_ordering_is_profile_then_assertion() {
        let engine = ValidationEngine::new();
        let report = engine.validate(&noncompliant_pdf()).unwrap();

        let first_accessibility = report
            .failures
            .iter()
            .position(|f| f.profile == "accessibility-1")
            .unwrap();
        assert!(report.failures[..first_accessibility]
            .iter()
            .all(|f| f.profile == "archival-3a"));
    }

    #[test]
    fn test_attachments_preserve_compliance() {
        let pdf = render(FULL_METADATA_HTML);
        let attachments = validate_requests(&[AttachmentRequest {
            name: "source.xml".to_string(),
            content: base64::engine::general_purpose::STANDARD.encode(b"<data/>"),
            mime_type: Some("application/xml".to_string()),
            description: None,
            relationship: Some("Source".to_string()),
        }])
        .unwrap();
        let with_attachment = AttachmentEmbedder::new().embed(&pdf, &attachments).unwrap();

        let engine = ValidationEngine::new();
        let report = engine.validate(&with_attachment).unwrap();
        assert!(report.is_compliant, "failures: {:?}", report.failures);
    }

    #[test]
    fn test_unparsable_bytes_are_a_validation_error() {
        let engine = ValidationEngine::new();
        let err = engine.validate(b"definitely not a pdf").unwrap_err();
        assert!(err.to_string().contains("Validation failed"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let engine = ValidationEngine::new();
        engine.init().unwrap();
        engine.init().unwrap();
    }
}
