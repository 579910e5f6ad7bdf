//! Embedded-file attachments.
//!
//! PDF/A-3 permits arbitrary embedded files as long as each one is declared
//! as an associated file with a relationship to the document. This module
//! validates attachment requests eagerly — all of them, before any byte of
//! the PDF is touched — and then mutates the document's object structure:
//! an embedded-file stream and file specification per attachment, the
//! `EmbeddedFiles` name tree, and the catalog's `/AF` array that archival
//! validators use to confirm every embedded file is declared.

use base64::Engine;
use chrono::Utc;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ArkivError, Result};

pub const MAX_ATTACHMENTS: usize = 10;
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_NAME_CHARS: usize = 255;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Relationship between an embedded file and the document, recorded on the
/// file specification's `AFRelationship` key. Exactly these five values are
/// accepted; anything else is rejected before any PDF mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfRelationship {
    Source,
    Data,
    Alternative,
    Supplement,
    Unspecified,
}

impl AfRelationship {
    pub fn pdf_name(&self) -> &'static str {
        match self {
            AfRelationship::Source => "Source",
            AfRelationship::Data => "Data",
            AfRelationship::Alternative => "Alternative",
            AfRelationship::Supplement => "Supplement",
            AfRelationship::Unspecified => "Unspecified",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "source" => Some(AfRelationship::Source),
            "data" => Some(AfRelationship::Data),
            "alternative" => Some(AfRelationship::Alternative),
            "supplement" => Some(AfRelationship::Supplement),
            "unspecified" => Some(AfRelationship::Unspecified),
            _ => None,
        }
    }
}

impl Default for AfRelationship {
    fn default() -> Self {
        AfRelationship::Alternative
    }
}

/// One attachment as received from the caller, content still base64.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRequest {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
}

/// A fully validated attachment, ready for embedding.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
    pub mime_type: String,
    pub description: Option<String>,
    pub relationship: AfRelationship,
}

/// Validate all attachment requests. All-or-nothing: the first invalid spec
/// fails the whole batch, and nothing is decoded into the PDF until every
/// spec has passed.
pub fn validate_requests(requests: &[AttachmentRequest]) -> Result<Vec<Attachment>> {
    if requests.len() > MAX_ATTACHMENTS {
        return Err(ArkivError::InvalidInput(format!(
            "too many attachments: {} (limit {MAX_ATTACHMENTS})",
            requests.len()
        )));
    }

    let mut validated = Vec::with_capacity(requests.len());
    for (idx, request) in requests.iter().enumerate() {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ArkivError::InvalidInput(format!(
                "attachment {idx}: name must not be blank"
            )));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(ArkivError::InvalidInput(format!(
                "attachment {idx}: name exceeds {MAX_NAME_CHARS} characters"
            )));
        }

        let data = base64::engine::general_purpose::STANDARD
            .decode(request.content.trim())
            .map_err(|e| {
                ArkivError::InvalidInput(format!("attachment '{name}': invalid base64: {e}"))
            })?;
        if data.len() > MAX_ATTACHMENT_BYTES {
            return Err(ArkivError::InvalidInput(format!(
                "attachment '{name}': decoded size {} exceeds limit {MAX_ATTACHMENT_BYTES}",
                data.len()
            )));
        }

        let relationship = match &request.relationship {
            Some(raw) => AfRelationship::parse(raw).ok_or_else(|| {
                ArkivError::InvalidInput(format!(
                    "attachment '{name}': unknown relationship '{raw}' \
                     (expected Source, Data, Alternative, Supplement or Unspecified)"
                ))
            })?,
            None => AfRelationship::default(),
        };

        validated.push(Attachment {
            name: name.to_string(),
            data,
            mime_type: request
                .mime_type
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_MIME_TYPE)
                .to_string(),
            description: request.description.clone(),
            relationship,
        });
    }
    Ok(validated)
}

/// Adds validated attachments to an already rendered PDF.
pub struct AttachmentEmbedder;

impl AttachmentEmbedder {
    pub fn new() -> Self {
        Self
    }

    /// Embed `attachments` into `pdf`, returning the re-serialized document.
    ///
    /// Attachments land in the `EmbeddedFiles` name tree keyed by name
    /// (later duplicates overwrite earlier tree entries) and every file
    /// specification is appended to the catalog `/AF` array in input order.
    /// Failures are atomic: either the returned bytes carry all
    /// attachments, or an error is returned and nothing was produced.
    pub fn embed(&self, pdf: &[u8], attachments: &[Attachment]) -> Result<Vec<u8>> {
        if attachments.is_empty() {
            return Ok(pdf.to_vec());
        }

        let mut doc = Document::load_mem(pdf)
            .map_err(|e| ArkivError::Embed(format!("PDF does not parse: {e}")))?;
        let root_id = doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|e| ArkivError::Embed(format!("PDF has no catalog: {e}")))?;

        // Existing name-tree entries survive; duplicates are overwritten by
        // the incoming attachment of the same name (last writer wins).
        let mut tree: std::collections::BTreeMap<String, ObjectId> =
            existing_embedded_files(&doc, root_id);
        let mut af_refs: Vec<Object> = existing_af_array(&doc, root_id);

        let stamp = Utc::now().format("D:%Y%m%d%H%M%S+00'00'").to_string();
        for attachment in attachments {
            let filespec_id = add_filespec(&mut doc, attachment, &stamp);
            tree.insert(attachment.name.clone(), filespec_id);
            af_refs.push(Object::Reference(filespec_id));
        }

        let mut names_pairs: Vec<Object> = Vec::with_capacity(tree.len() * 2);
        for (name, id) in &tree {
            names_pairs.push(Object::string_literal(name.clone()));
            names_pairs.push(Object::Reference(*id));
        }
        let embedded_files = dictionary! { "Names" => names_pairs };

        let catalog = doc
            .get_object_mut(root_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| ArkivError::Embed(format!("catalog is not a dictionary: {e}")))?;

        let mut names_dict = match catalog.get(b"Names") {
            Ok(Object::Dictionary(existing)) => existing.clone(),
            _ => Dictionary::new(),
        };
        names_dict.set("EmbeddedFiles", Object::Dictionary(embedded_files));
        catalog.set("Names", Object::Dictionary(names_dict));
        catalog.set("AF", Object::Array(af_refs));

        let mut out = Vec::new();
        doc.save_to(&mut out)
            .map_err(|e| ArkivError::Embed(format!("PDF re-serialization failed: {e}")))?;
        debug!(count = attachments.len(), "attachments embedded");
        Ok(out)
    }
}

impl Default for AttachmentEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn add_filespec(doc: &mut Document, attachment: &Attachment, stamp: &str) -> ObjectId {
    let checksum = md5::compute(&attachment.data).0.to_vec();
    let params = dictionary! {
        "Size" => Object::Integer(attachment.data.len() as i64),
        "CreationDate" => Object::string_literal(stamp),
        "ModDate" => Object::string_literal(stamp),
        "CheckSum" => Object::String(checksum, StringFormat::Hexadecimal),
    };
    let stream_dict = dictionary! {
        "Type" => "EmbeddedFile",
        "Subtype" => Object::Name(attachment.mime_type.clone().into_bytes()),
        "Params" => Object::Dictionary(params),
    };
    let stream_id = doc.add_object(Stream::new(stream_dict, attachment.data.clone()));

    let mut filespec = dictionary! {
        "Type" => "Filespec",
        "F" => Object::string_literal(attachment.name.clone()),
        "UF" => utf16_string(&attachment.name),
        "EF" => Object::Dictionary(dictionary! {
            "F" => stream_id,
            "UF" => stream_id,
        }),
        "AFRelationship" => attachment.relationship.pdf_name(),
    };
    if let Some(description) = &attachment.description {
        filespec.set("Desc", Object::string_literal(description.clone()));
    }
    doc.add_object(Object::Dictionary(filespec))
}

/// Read existing `EmbeddedFiles` name-tree entries, resolving one level of
/// indirection; malformed trees are treated as empty.
fn existing_embedded_files(
    doc: &Document,
    root_id: ObjectId,
) -> std::collections::BTreeMap<String, ObjectId> {
    let mut tree = std::collections::BTreeMap::new();
    let Ok(catalog) = doc.get_dictionary(root_id) else {
        return tree;
    };
    let Some(names) = resolve_dict(doc, catalog.get(b"Names").ok()) else {
        return tree;
    };
    let Some(embedded) = resolve_dict(doc, names.get(b"EmbeddedFiles").ok()) else {
        return tree;
    };
    let Ok(pairs) = embedded.get(b"Names").and_then(Object::as_array) else {
        return tree;
    };
    for pair in pairs.chunks(2) {
        if let [Object::String(name, _), Object::Reference(id)] = pair {
            tree.insert(String::from_utf8_lossy(name).into_owned(), *id);
        }
    }
    tree
}

fn existing_af_array(doc: &Document, root_id: ObjectId) -> Vec<Object> {
    doc.get_dictionary(root_id)
        .ok()
        .and_then(|catalog| catalog.get(b"AF").ok())
        .and_then(|af| match af {
            Object::Array(items) => Some(items.clone()),
            Object::Reference(id) => doc
                .get_object(*id)
                .ok()
                .and_then(|o| o.as_array().ok())
                .cloned(),
            _ => None,
        })
        .unwrap_or_default()
}

fn resolve_dict<'a>(doc: &'a Document, obj: Option<&'a Object>) -> Option<&'a Dictionary> {
    match obj? {
        Object::Dictionary(dict) => Some(dict),
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        _ => None,
    }
}

fn utf16_string(s: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}
