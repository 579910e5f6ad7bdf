//! Read-only access to the PDF under validation.
//!
//! Wraps the parsed lopdf document with the tolerant accessors the
//! assertion checks and the document-facts extraction share. Everything
//! here degrades gracefully: malformed or absent structures read as empty,
//! never as a panic — a defective document is exactly what the validator
//! exists to describe.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::{ArkivError, Result};
use crate::validate::report::PdfMetadata;

const MAX_STRUCT_DEPTH: usize = 64;

/// One font dictionary as used by some page.
#[derive(Debug, Clone)]
pub(crate) struct FontUsage {
    pub name: String,
    pub subtype: String,
    pub embedded: bool,
    pub to_unicode: bool,
}

/// A snapshot of one logical-structure element.
#[derive(Debug)]
pub(crate) struct StructSnapshot {
    pub tag: String,
    pub alt: Option<String>,
    pub children: Vec<StructSnapshot>,
}

pub(crate) struct PdfUnderTest {
    doc: Document,
    header_ok: bool,
    xmp: Option<String>,
}

impl PdfUnderTest {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header_ok = bytes.starts_with(b"%PDF-");
        let doc = Document::load_mem(bytes)
            .map_err(|e| ArkivError::Validation(format!("PDF does not parse: {e}")))?;
        let mut parsed = Self {
            doc,
            header_ok,
            xmp: None,
        };
        parsed.xmp = parsed.read_xmp();
        Ok(parsed)
    }

    pub fn header_ok(&self) -> bool {
        self.header_ok
    }

    pub fn trailer_has_id(&self) -> bool {
        self.doc.trailer.has(b"ID")
    }

    pub fn is_encrypted(&self) -> bool {
        self.doc.trailer.has(b"Encrypt")
    }

    pub fn catalog(&self) -> Option<&Dictionary> {
        self.doc.catalog().ok()
    }

    pub fn xmp(&self) -> Option<&str> {
        self.xmp.as_deref()
    }

    /// Whether the XMP packet declares the given property with the given
    /// value, in either element or attribute form.
    pub fn xmp_declares(&self, property: &str, value: &str) -> bool {
        match self.xmp() {
            Some(xmp) => {
                xmp.contains(&format!("{property}>{value}<"))
                    || xmp.contains(&format!("{property}=\"{value}\""))
            }
            None => false,
        }
    }

    fn read_xmp(&self) -> Option<String> {
        let metadata = self.catalog()?.get(b"Metadata").ok()?;
        let stream = match self.resolve(metadata) {
            Object::Stream(s) => s,
            _ => return None,
        };
        let content = if stream.dict.has(b"Filter") {
            stream.decompressed_content().ok()?
        } else {
            stream.content.clone()
        };
        Some(String::from_utf8_lossy(&content).into_owned())
    }

    /// Follow references until a concrete object appears.
    fn resolve<'a>(&'a self, mut obj: &'a Object) -> &'a Object {
        let mut hops = 0;
        while let Object::Reference(id) = obj {
            match self.doc.get_object(*id) {
                Ok(next) if hops < 16 => {
                    obj = next;
                    hops += 1;
                }
                _ => break,
            }
        }
        obj
    }

    fn resolve_dict<'a>(&'a self, obj: &'a Object) -> Option<&'a Dictionary> {
        match self.resolve(obj) {
            Object::Dictionary(dict) => Some(dict),
            Object::Stream(stream) => Some(&stream.dict),
            _ => None,
        }
    }

    // ── Output intent ───────────────────────────────────────────────────

    pub fn archival_output_intent(&self) -> Option<&Dictionary> {
        let intents = self.catalog()?.get(b"OutputIntents").ok()?;
        let Object::Array(intents) = self.resolve(intents) else {
            return None;
        };
        intents
            .iter()
            .filter_map(|oi| self.resolve_dict(oi))
            .find(|oi| {
                oi.get(b"S")
                    .and_then(Object::as_name)
                    .map(|s| s == b"GTS_PDFA1")
                    .unwrap_or(false)
            })
    }

    pub fn dest_output_profile(&self) -> Option<Vec<u8>> {
        let intent = self.archival_output_intent()?;
        let profile = intent.get(b"DestOutputProfile").ok()?;
        match self.resolve(profile) {
            Object::Stream(stream) => {
                if stream.dict.has(b"Filter") {
                    stream.decompressed_content().ok()
                } else {
                    Some(stream.content.clone())
                }
            }
            _ => None,
        }
    }

    // ── Fonts ───────────────────────────────────────────────────────────

    /// Every font dictionary referenced from any page's resources,
    /// deduplicated by base name.
    pub fn fonts(&self) -> Vec<FontUsage> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut fonts = Vec::new();

        for (_, page_id) in self.doc.get_pages() {
            let Ok(page) = self.doc.get_dictionary(page_id) else {
                continue;
            };
            let Some(resources) = page.get(b"Resources").ok().and_then(|r| self.resolve_dict(r))
            else {
                continue;
            };
            let Some(font_dict) = resources.get(b"Font").ok().and_then(|f| self.resolve_dict(f))
            else {
                continue;
            };
            for (_, font_obj) in font_dict.iter() {
                let Some(font) = self.resolve_dict(font_obj) else {
                    continue;
                };
                let name = font
                    .get(b"BaseFont")
                    .and_then(Object::as_name)
                    .map(|n| String::from_utf8_lossy(n).into_owned())
                    .unwrap_or_else(|_| "(unnamed)".to_string());
                if !seen.insert(name.clone()) {
                    continue;
                }
                let subtype = font
                    .get(b"Subtype")
                    .and_then(Object::as_name)
                    .map(|n| String::from_utf8_lossy(n).into_owned())
                    .unwrap_or_else(|_| "Unknown".to_string());

                let descriptor = self.font_descriptor(font);
                let embedded = descriptor
                    .map(|d| {
                        d.has(b"FontFile") || d.has(b"FontFile2") || d.has(b"FontFile3")
                    })
                    .unwrap_or(false);

                fonts.push(FontUsage {
                    name,
                    subtype,
                    embedded,
                    to_unicode: font.has(b"ToUnicode"),
                });
            }
        }

        fonts.sort_by(|a, b| a.name.cmp(&b.name));
        fonts
    }

    fn font_descriptor<'a>(&'a self, font: &'a Dictionary) -> Option<&'a Dictionary> {
        if let Some(descriptor) = font
            .get(b"FontDescriptor")
            .ok()
            .and_then(|d| self.resolve_dict(d))
        {
            return Some(descriptor);
        }
        // Type0 fonts keep the descriptor on the descendant font.
        let descendants = font.get(b"DescendantFonts").ok()?;
        let Object::Array(descendants) = self.resolve(descendants) else {
            return None;
        };
        let descendant = self.resolve_dict(descendants.first()?)?;
        descendant
            .get(b"FontDescriptor")
            .ok()
            .and_then(|d| self.resolve_dict(d))
    }

    // ── Pages and images ────────────────────────────────────────────────

    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    /// Image XObject references across all pages (one count per page
    /// reference, not per distinct object).
    pub fn image_count(&self) -> u32 {
        let mut count = 0;
        for (_, page_id) in self.doc.get_pages() {
            let Ok(page) = self.doc.get_dictionary(page_id) else {
                continue;
            };
            let Some(resources) = page.get(b"Resources").ok().and_then(|r| self.resolve_dict(r))
            else {
                continue;
            };
            let Some(xobjects) = resources
                .get(b"XObject")
                .ok()
                .and_then(|x| self.resolve_dict(x))
            else {
                continue;
            };
            for (_, xobj) in xobjects.iter() {
                if let Some(dict) = self.resolve_dict(xobj) {
                    if dict
                        .get(b"Subtype")
                        .and_then(Object::as_name)
                        .map(|s| s == b"Image")
                        .unwrap_or(false)
                    {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    // ── Tagging ─────────────────────────────────────────────────────────

    pub fn mark_info(&self) -> Option<&Dictionary> {
        self.catalog()?
            .get(b"MarkInfo")
            .ok()
            .and_then(|m| self.resolve_dict(m))
    }

    pub fn is_tagged(&self) -> bool {
        self.mark_info()
            .and_then(|mi| mi.get(b"Marked").ok())
            .and_then(|m| m.as_bool().ok())
            .unwrap_or(false)
    }

    pub fn has_suspects(&self) -> bool {
        self.mark_info()
            .and_then(|mi| mi.get(b"Suspects").ok())
            .and_then(|m| m.as_bool().ok())
            .unwrap_or(false)
    }

    pub fn has_struct_tree(&self) -> bool {
        self.catalog()
            .map(|c| c.has(b"StructTreeRoot"))
            .unwrap_or(false)
    }

    pub fn language(&self) -> Option<String> {
        let lang = self.catalog()?.get(b"Lang").ok()?;
        match self.resolve(lang) {
            Object::String(bytes, _) => {
                let decoded = decode_pdf_string(bytes);
                let trimmed = decoded.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            _ => None,
        }
    }

    pub fn display_doc_title(&self) -> bool {
        self.catalog()
            .and_then(|c| c.get(b"ViewerPreferences").ok())
            .and_then(|vp| self.resolve_dict(vp))
            .and_then(|vp| vp.get(b"DisplayDocTitle").ok())
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(false)
    }

    /// Snapshot of the logical structure tree under StructTreeRoot.
    /// Malformed or cyclic trees yield whatever could be read safely.
    pub fn struct_tree(&self) -> Vec<StructSnapshot> {
        let Some(catalog) = self.catalog() else {
            return Vec::new();
        };
        let Some(root) = catalog
            .get(b"StructTreeRoot")
            .ok()
            .and_then(|r| self.resolve_dict(r))
        else {
            return Vec::new();
        };
        let Ok(kids) = root.get(b"K") else {
            return Vec::new();
        };
        let mut visited = HashSet::new();
        self.collect_elems(kids, &mut visited, 0)
    }

    pub fn struct_element_count(&self) -> u32 {
        fn count(nodes: &[StructSnapshot]) -> u32 {
            nodes
                .iter()
                .map(|n| 1 + count(&n.children))
                .sum()
        }
        count(&self.struct_tree())
    }

    fn collect_elems(
        &self,
        obj: &Object,
        visited: &mut HashSet<ObjectId>,
        depth: usize,
    ) -> Vec<StructSnapshot> {
        if depth > MAX_STRUCT_DEPTH {
            return Vec::new();
        }
        if let Object::Reference(id) = obj {
            if !visited.insert(*id) {
                return Vec::new();
            }
        }
        match self.resolve(obj) {
            Object::Array(items) => items
                .iter()
                .flat_map(|item| self.collect_elems(item, visited, depth + 1))
                .collect(),
            Object::Dictionary(dict) => {
                // Marked-content references and object references are leaves
                // of the tree, not structure elements.
                let is_elem = dict.has(b"S")
                    && dict
                        .get(b"Type")
                        .and_then(Object::as_name)
                        .map(|t| t == b"StructElem")
                        .unwrap_or(true);
                if !is_elem {
                    return Vec::new();
                }
                let tag = dict
                    .get(b"S")
                    .and_then(Object::as_name)
                    .map(|n| String::from_utf8_lossy(n).into_owned())
                    .unwrap_or_default();
                let alt = dict
                    .get(b"Alt")
                    .ok()
                    .and_then(|a| match self.resolve(a) {
                        Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
                        _ => None,
                    });
                let children = dict
                    .get(b"K")
                    .map(|k| self.collect_elems(k, visited, depth + 1))
                    .unwrap_or_default();
                vec![StructSnapshot { tag, alt, children }]
            }
            _ => Vec::new(),
        }
    }

    // ── Embedded files ──────────────────────────────────────────────────

    /// File specifications registered in the EmbeddedFiles name tree,
    /// paired with their object ids where indirect.
    pub fn embedded_filespecs(&self) -> Vec<(Option<ObjectId>, &Dictionary)> {
        let mut specs = Vec::new();
        let Some(catalog) = self.catalog() else {
            return specs;
        };
        let Some(names) = catalog.get(b"Names").ok().and_then(|n| self.resolve_dict(n)) else {
            return specs;
        };
        let Some(embedded) = names
            .get(b"EmbeddedFiles")
            .ok()
            .and_then(|e| self.resolve_dict(e))
        else {
            return specs;
        };
        let Some(pairs) = embedded.get(b"Names").ok().map(|p| self.resolve(p)) else {
            return specs;
        };
        let Object::Array(pairs) = pairs else {
            return specs;
        };
        for pair in pairs.chunks(2) {
            if pair.len() != 2 {
                continue;
            }
            let id = match &pair[1] {
                Object::Reference(id) => Some(*id),
                _ => None,
            };
            if let Some(dict) = self.resolve_dict(&pair[1]) {
                specs.push((id, dict));
            }
        }
        specs
    }

    /// Object ids listed in the catalog's associated-files array.
    pub fn af_ids(&self) -> HashSet<ObjectId> {
        let mut ids = HashSet::new();
        let Some(catalog) = self.catalog() else {
            return ids;
        };
        let Some(af) = catalog.get(b"AF").ok().map(|af| self.resolve(af)) else {
            return ids;
        };
        if let Object::Array(entries) = af {
            for entry in entries {
                if let Object::Reference(id) = entry {
                    ids.insert(*id);
                }
            }
        }
        ids
    }

    pub fn has_javascript(&self) -> bool {
        let Some(catalog) = self.catalog() else {
            return false;
        };
        if let Some(names) = catalog.get(b"Names").ok().and_then(|n| self.resolve_dict(n)) {
            if names.has(b"JavaScript") {
                return true;
            }
        }
        if let Some(action) = catalog
            .get(b"OpenAction")
            .ok()
            .and_then(|a| self.resolve_dict(a))
        {
            if action
                .get(b"S")
                .and_then(Object::as_name)
                .map(|s| s == b"JavaScript")
                .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    // ── Info dictionary metadata ────────────────────────────────────────

    pub fn metadata(&self) -> PdfMetadata {
        let Some(info) = self
            .doc
            .trailer
            .get(b"Info")
            .ok()
            .and_then(|i| self.resolve_dict(i))
        else {
            return PdfMetadata::default();
        };

        let field = |key: &[u8]| -> Option<String> {
            let value = info.get(key).ok()?;
            match self.resolve(value) {
                Object::String(bytes, _) => {
                    let decoded = decode_pdf_string(bytes);
                    let trimmed = decoded.trim().to_string();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed)
                    }
                }
                _ => None,
            }
        };

        PdfMetadata {
            title: field(b"Title"),
            author: field(b"Author"),
            subject: field(b"Subject"),
            creator: field(b"Creator"),
            producer: field(b"Producer"),
            creation_date: field(b"CreationDate").and_then(|raw| parse_pdf_date(&raw)),
        }
    }

    pub fn info_title(&self) -> Option<String> {
        self.metadata().title
    }
}

/// Decode a PDF text string: UTF-16BE when BOM-prefixed, a Latin-1 read
/// otherwise (close enough to PDFDocEncoding for report purposes).
pub(crate) fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Parse a PDF date (`D:YYYYMMDDHHmmSS` with optional offset) into an
/// ISO-8601 UTC timestamp. Unparsable dates read as absent.
pub(crate) fn parse_pdf_date(raw: &str) -> Option<String> {
    let s = raw.trim().strip_prefix("D:").unwrap_or(raw.trim());
    if s.len() < 4 {
        return None;
    }

    let digits = |range: std::ops::Range<usize>, default: u32| -> u32 {
        s.get(range)
            .and_then(|part| part.parse::<u32>().ok())
            .unwrap_or(default)
    };

    let year: i32 = s.get(0..4)?.parse().ok()?;
    let month = digits(4..6, 1).clamp(1, 12);
    let day = digits(6..8, 1).clamp(1, 31);
    let hour = digits(8..10, 0).min(23);
    let minute = digits(10..12, 0).min(59);
    let second = digits(12..14, 0).min(59);

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;

    // Offset suffix: Z, or +HH'mm' / -HH'mm'.
    let mut utc = naive;
    if let Some(rest) = s.get(14..) {
        let rest = rest.trim();
        if let Some(sign) = rest.chars().next() {
            if sign == '+' || sign == '-' {
                let cleaned: String = rest[1..].chars().filter(|c| c.is_ascii_digit()).collect();
                let oh: i64 = cleaned.get(0..2).and_then(|h| h.parse().ok()).unwrap_or(0);
                let om: i64 = cleaned.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
                let offset = Duration::minutes(oh * 60 + om);
                utc = if sign == '+' {
                    naive.checked_sub_signed(offset)?
                } else {
                    naive.checked_add_signed(offset)?
                };
            }
        }
    }

    Some(utc.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pdf_date_with_utc_offset() {
        assert_eq!(
            parse_pdf_date("D:20260203121530+00'00'"),
            Some("2026-02-03T12:15:30Z".to_string())
        );
    }

    #[test]
    fn test_parse_pdf_date_with_positive_offset() {
        assert_eq!(
            parse_pdf_date("D:20260203121530+02'00'"),
            Some("2026-02-03T10:15:30Z".to_string())
        );
    }

    #[test]
    fn test_parse_pdf_date_short_form() {
        assert_eq!(
            parse_pdf_date("D:2026"),
            Some("2026-01-01T00:00:00Z".to_string())
        );
    }

    #[test]
    fn test_parse_pdf_date_garbage() {
        assert_eq!(parse_pdf_date("yesterday"), None);
        assert_eq!(parse_pdf_date(""), None);
    }

    #[test]
    fn test_decode_pdf_string_utf16() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "Prüfung".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(decode_pdf_string(&bytes), "Prüfung");
    }

    #[test]
    fn test_decode_pdf_string_latin1() {
        assert_eq!(decode_pdf_string(b"plain"), "plain");
        assert_eq!(decode_pdf_string(&[0x4D, 0xFC, 0x6E]), "Mün");
    }
}
