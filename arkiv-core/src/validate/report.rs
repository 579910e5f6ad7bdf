//! Compliance report data model.
//!
//! These types are the service's output contract: the HTTP layer serializes
//! them verbatim, so field names and nesting are stable public API.

use serde::{Deserialize, Serialize};

/// Aggregate result of validating one PDF against every target profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    /// True iff every evaluated profile is compliant.
    pub is_compliant: bool,
    /// One entry per evaluated profile, in evaluation order.
    pub profiles: Vec<ProfileResult>,
    pub summary: ValidationSummary,
    pub document_info: DocumentInfo,
    /// Failures in evaluation order, capped at
    /// [`MAX_REPORTED_FAILURES`](crate::validate::MAX_REPORTED_FAILURES)
    /// entries. The counts in `summary` stay exact regardless of the cap.
    pub failures: Vec<ValidationFailure>,
    pub metadata: PdfMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResult {
    /// Stable profile identifier, e.g. `archival-3a`.
    pub profile: String,
    /// Specification the profile checks against, e.g. `ISO 19005-3:2012`.
    pub specification: String,
    pub is_compliant: bool,
    pub passed_checks: u32,
    pub failed_checks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub passed_checks: u32,
    pub failed_checks: u32,
    /// Failure counts grouped by category, sorted by descending count.
    /// Counts sum exactly to `failed_checks`.
    pub categories: Vec<CategoryCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: u32,
}

/// Document facts extracted independently of the conformance checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub pages: u32,
    pub tagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub structure_elements: u32,
    /// Distinct fonts used on any page, sorted by name.
    pub fonts: Vec<FontInfo>,
    pub images: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FontInfo {
    pub name: String,
    pub embedded: bool,
    pub subtype: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFailure {
    pub profile: String,
    /// Conformance clause that pinpoints the violated rule.
    pub clause: String,
    pub test: u32,
    /// Human-readable bucket derived from the clause; cosmetic grouping
    /// only, never part of the compliance determination.
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Info-dictionary metadata; blank fields are reported as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    /// ISO-8601 UTC timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_with_camel_case_contract() {
        let report = ComplianceReport {
            is_compliant: false,
            profiles: vec![ProfileResult {
                profile: "archival-3a".to_string(),
                specification: "ISO 19005-3:2012".to_string(),
                is_compliant: false,
                passed_checks: 11,
                failed_checks: 2,
            }],
            summary: ValidationSummary {
                passed_checks: 11,
                failed_checks: 2,
                categories: vec![CategoryCount {
                    category: "Fonts".to_string(),
                    count: 2,
                }],
            },
            document_info: DocumentInfo {
                pages: 3,
                tagged: true,
                language: Some("en-US".to_string()),
                structure_elements: 12,
                fonts: vec![],
                images: 0,
            },
            failures: vec![],
            metadata: PdfMetadata::default(),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["isCompliant"], false);
        assert_eq!(json["profiles"][0]["failedChecks"], 2);
        assert_eq!(json["summary"]["categories"][0]["category"], "Fonts");
        assert_eq!(json["documentInfo"]["structureElements"], 12);
        assert!(json["metadata"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_absent_optional_fields_are_omitted() {
        let failure = ValidationFailure {
            profile: "accessibility-1".to_string(),
            clause: "7.3".to_string(),
            test: 1,
            category: "Figures and images".to_string(),
            message: "Figure without alternative text".to_string(),
            location: None,
            detail: None,
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert!(json.get("location").is_none());
        assert!(json.get("detail").is_none());
    }
}
