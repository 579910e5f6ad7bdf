//! PDF document assembly.
//!
//! Takes the laid-out pages and the structure tree and serializes a tagged,
//! archival-profile PDF through lopdf: embedded TrueType fonts with WinAnsi
//! widths and ToUnicode CMaps, image XObjects, marked-content streams,
//! `StructTreeRoot` with a parent tree, XMP identification for both target
//! profiles, an sRGB output intent and a populated Info dictionary.

use std::collections::HashMap;
use std::io::Write as _;

use chrono::Utc;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::error::{ArkivError, Result};
use crate::render::dom::{DocMeta, EmbedImage};
use crate::render::fontset::{FontSet, LoadedFont};
use crate::render::layout::{ContentItem, DrawOp, LayoutResult, PageLayout};
use crate::render::winansi;

const DEFAULT_TITLE: &str = "Untitled document";
const DEFAULT_LANGUAGE: &str = "en-US";

pub(crate) struct WriterInput<'a> {
    pub meta: &'a DocMeta,
    pub layout: &'a LayoutResult,
    pub fonts: &'a FontSet,
    pub images: &'a [EmbedImage],
    pub color_profile: &'a [u8],
    pub producer: &'a str,
}

pub(crate) fn write_document(input: WriterInput) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let title = input
        .meta
        .title
        .clone()
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let language = input
        .meta
        .language
        .clone()
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    let now = Utc::now();

    // Fonts used anywhere in the document, embedded once each.
    let mut font_ids: HashMap<usize, ObjectId> = HashMap::new();
    for &font_idx in &input.layout.used_fonts {
        let font = input.fonts.get(font_idx);
        font_ids.insert(font_idx, add_embedded_font(&mut doc, font)?);
    }

    let mut image_ids: Vec<ObjectId> = Vec::with_capacity(input.images.len());
    for image in input.images {
        image_ids.push(add_image_xobject(&mut doc, image)?);
    }

    // Pages with compressed, marked content streams.
    let mut page_ids: Vec<ObjectId> = Vec::with_capacity(input.layout.pages.len());
    for (idx, page) in input.layout.pages.iter().enumerate() {
        let content = page_content(page);
        let compressed = deflate(&content)?;
        let content_id = doc.add_object(Stream::new(
            dictionary! { "Filter" => "FlateDecode" },
            compressed,
        ));

        let mut font_res = Dictionary::new();
        for (&font_idx, &oid) in &font_ids {
            font_res.set(format!("F{font_idx}"), Object::Reference(oid));
        }
        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(font_res));
        if !image_ids.is_empty() {
            let mut xobjects = Dictionary::new();
            for (i, &oid) in image_ids.iter().enumerate() {
                xobjects.set(format!("Im{i}"), Object::Reference(oid));
            }
            resources.set("XObject", Object::Dictionary(xobjects));
        }

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
            "Resources" => Object::Dictionary(resources),
            "Contents" => content_id,
            "StructParents" => Object::Integer(idx as i64),
            "Tabs" => "S",
        });
        page_ids.push(page_id);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>(),
            "Count" => Object::Integer(page_ids.len() as i64),
        }),
    );

    // Logical structure tree plus the MCID parent tree.
    let mut parent_map: Vec<Vec<Option<ObjectId>>> = input
        .layout
        .pages
        .iter()
        .map(|p| {
            let marked = p
                .items
                .iter()
                .filter(|i| matches!(i, ContentItem::Marked { .. }))
                .count();
            vec![None; marked]
        })
        .collect();

    let struct_root_id = doc.new_object_id();
    let document_elem = write_struct_elem(
        &mut doc,
        &input.layout.root,
        struct_root_id,
        &page_ids,
        &mut parent_map,
    );

    let mut nums: Vec<Object> = Vec::new();
    for (page_idx, entries) in parent_map.iter().enumerate() {
        let arr: Vec<Object> = entries
            .iter()
            .map(|e| match e {
                Some(id) => Object::Reference(*id),
                None => Object::Null,
            })
            .collect();
        let arr_id = doc.add_object(Object::Array(arr));
        nums.push(Object::Integer(page_idx as i64));
        nums.push(Object::Reference(arr_id));
    }
    let parent_tree_id = doc.add_object(dictionary! { "Nums" => nums });

    doc.objects.insert(
        struct_root_id,
        Object::Dictionary(dictionary! {
            "Type" => "StructTreeRoot",
            "K" => vec![Object::Reference(document_elem)],
            "ParentTree" => parent_tree_id,
            "ParentTreeNextKey" => Object::Integer(page_ids.len() as i64),
        }),
    );

    // Output intent binding the document to the embedded sRGB profile.
    let icc_id = doc.add_object(Stream::new(
        dictionary! { "N" => Object::Integer(3) },
        input.color_profile.to_vec(),
    ));
    let output_intent = dictionary! {
        "Type" => "OutputIntent",
        "S" => "GTS_PDFA1",
        "OutputConditionIdentifier" => Object::string_literal("sRGB IEC61966-2.1"),
        "Info" => Object::string_literal("sRGB IEC61966-2.1"),
        "RegistryName" => Object::string_literal("http://www.color.org"),
        "DestOutputProfile" => icc_id,
    };

    // XMP metadata; the stream must stay uncompressed.
    let xmp = xmp_packet(&title, input.producer, &now.to_rfc3339());
    let metadata_id = doc.add_object(Stream::new(
        dictionary! { "Type" => "Metadata", "Subtype" => "XML" },
        xmp.into_bytes(),
    ));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "Lang" => Object::string_literal(language.clone()),
        "MarkInfo" => Object::Dictionary(dictionary! { "Marked" => true }),
        "StructTreeRoot" => struct_root_id,
        "ViewerPreferences" => Object::Dictionary(dictionary! { "DisplayDocTitle" => true }),
        "OutputIntents" => vec![Object::Dictionary(output_intent)],
        "Metadata" => metadata_id,
    });

    let mut info = Dictionary::new();
    info.set("Title", pdf_text_string(&title));
    if let Some(author) = &input.meta.author {
        info.set("Author", pdf_text_string(author));
    }
    if let Some(subject) = &input.meta.subject {
        info.set("Subject", pdf_text_string(subject));
    }
    info.set("Creator", pdf_text_string("arkiv"));
    info.set("Producer", pdf_text_string(input.producer));
    info.set(
        "CreationDate",
        Object::string_literal(now.format("D:%Y%m%d%H%M%S+00'00'").to_string()),
    );
    let info_id = doc.add_object(Object::Dictionary(info));

    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc.trailer.set("Info", Object::Reference(info_id));

    // PDF/A requires a permanent file identifier.
    let digest = md5::compute(format!("{title}|{}|{}", input.producer, now.to_rfc3339()));
    let file_id = Object::String(digest.0.to_vec(), StringFormat::Hexadecimal);
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            file_id.clone(),
            Object::String(digest.0.to_vec(), StringFormat::Hexadecimal),
        ]),
    );

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| ArkivError::Render(format!("PDF serialization failed: {e}")))?;
    Ok(out)
}

// ── Content streams ─────────────────────────────────────────────────────────

fn page_content(page: &PageLayout) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();
    for item in &page.items {
        match item {
            ContentItem::Marked { tag, mcid, ops } => {
                let _ = write!(buf, "/{tag} <</MCID {mcid}>> BDC\n");
                write_ops(&mut buf, ops);
                let _ = write!(buf, "EMC\n");
            }
            ContentItem::Artifact { ops } => {
                let _ = write!(buf, "/Artifact BMC\n");
                write_ops(&mut buf, ops);
                let _ = write!(buf, "EMC\n");
            }
        }
    }
    buf
}

fn write_ops(buf: &mut Vec<u8>, ops: &[DrawOp]) {
    for op in ops {
        match op {
            DrawOp::Text {
                x,
                y,
                font,
                size,
                text,
            } => {
                let _ = write!(buf, "BT /F{font} {size:.2} Tf {x:.2} {y:.2} Td (");
                buf.extend_from_slice(&escape_string_bytes(&winansi::encode_string(text)));
                let _ = write!(buf, ") Tj ET\n");
            }
            DrawOp::Image { image, x, y, w, h } => {
                let _ = write!(buf, "q {w:.2} 0 0 {h:.2} {x:.2} {y:.2} cm /Im{image} Do Q\n");
            }
            DrawOp::Line {
                x1,
                y1,
                x2,
                y2,
                width,
            } => {
                let _ = write!(
                    buf,
                    "q 0.6 G {width:.2} w {x1:.2} {y1:.2} m {x2:.2} {y2:.2} l S Q\n"
                );
            }
        }
    }
}

fn escape_string_bytes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for &b in raw {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\n' => out.extend_from_slice(b"\\n"),
            _ => out.push(b),
        }
    }
    out
}

// ── Structure tree ──────────────────────────────────────────────────────────

fn write_struct_elem(
    doc: &mut Document,
    node: &crate::render::layout::StructNode,
    parent: ObjectId,
    page_ids: &[ObjectId],
    parent_map: &mut [Vec<Option<ObjectId>>],
) -> ObjectId {
    let elem_id = doc.new_object_id();

    let kids: Vec<Object> = if node.children.is_empty() {
        node.marks
            .iter()
            .map(|&(page, mcid)| {
                parent_map[page][mcid as usize] = Some(elem_id);
                Object::Dictionary(dictionary! {
                    "Type" => "MCR",
                    "Pg" => page_ids[page],
                    "MCID" => Object::Integer(mcid as i64),
                })
            })
            .collect()
    } else {
        node.children
            .iter()
            .map(|child| {
                Object::Reference(write_struct_elem(doc, child, elem_id, page_ids, parent_map))
            })
            .collect()
    };

    let mut dict = dictionary! {
        "Type" => "StructElem",
        "S" => Object::Name(node.tag.clone().into_bytes()),
        "P" => parent,
        "K" => kids,
    };
    if let Some(&(page, _)) = node.marks.first() {
        dict.set("Pg", Object::Reference(page_ids[page]));
    }
    if let Some(alt) = &node.alt {
        dict.set("Alt", pdf_text_string(alt));
    }

    doc.objects.insert(elem_id, Object::Dictionary(dict));
    elem_id
}

// ── Fonts ───────────────────────────────────────────────────────────────────

fn add_embedded_font(doc: &mut Document, font: &LoadedFont) -> Result<ObjectId> {
    let scale = 1000.0 / font.units_per_em as f32;
    let widths: Vec<Object> = font
        .advances
        .iter()
        .map(|&adv| Object::Integer((adv as f32 * scale).round() as i64))
        .collect();

    let font_file = deflate(&font.bytes)?;
    let font_file_id = doc.add_object(Stream::new(
        dictionary! {
            "Filter" => "FlateDecode",
            "Length1" => Object::Integer(font.bytes.len() as i64),
        },
        font_file,
    ));

    let base_name = postscript_name(font);
    let flags = descriptor_flags(font);
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => Object::Name(base_name.clone().into_bytes()),
        "Flags" => Object::Integer(flags),
        "FontBBox" => vec![
            Object::Integer((font.bbox[0] as f32 * scale).round() as i64),
            Object::Integer((font.bbox[1] as f32 * scale).round() as i64),
            Object::Integer((font.bbox[2] as f32 * scale).round() as i64),
            Object::Integer((font.bbox[3] as f32 * scale).round() as i64),
        ],
        "ItalicAngle" => Object::Integer(if font.style == crate::fonts::FontStyle::Italic { -12 } else { 0 }),
        "Ascent" => Object::Integer((font.ascender as f32 * scale).round() as i64),
        "Descent" => Object::Integer((font.descender as f32 * scale).round() as i64),
        "CapHeight" => Object::Integer((font.cap_height as f32 * scale).round() as i64),
        "StemV" => Object::Integer(if font.weight == crate::fonts::FontWeight::Bold { 120 } else { 80 }),
        "FontFile2" => font_file_id,
    });

    let to_unicode_id = doc.add_object(Stream::new(
        Dictionary::new(),
        build_to_unicode_cmap().into_bytes(),
    ));

    Ok(doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "TrueType",
        "BaseFont" => Object::Name(base_name.into_bytes()),
        "FirstChar" => Object::Integer(32),
        "LastChar" => Object::Integer(255),
        "Widths" => widths,
        "Encoding" => "WinAnsiEncoding",
        "FontDescriptor" => descriptor_id,
        "ToUnicode" => to_unicode_id,
    }))
}

fn postscript_name(font: &LoadedFont) -> String {
    let family: String = font
        .family
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let suffix = match (font.weight, font.style) {
        (crate::fonts::FontWeight::Regular, crate::fonts::FontStyle::Normal) => "",
        (crate::fonts::FontWeight::Bold, crate::fonts::FontStyle::Normal) => "-Bold",
        (crate::fonts::FontWeight::Regular, crate::fonts::FontStyle::Italic) => "-Italic",
        (crate::fonts::FontWeight::Bold, crate::fonts::FontStyle::Italic) => "-BoldItalic",
    };
    format!("{family}{suffix}")
}

fn descriptor_flags(font: &LoadedFont) -> i64 {
    // Bit 1 fixed pitch, bit 2 serif, bit 6 nonsymbolic, bit 7 italic.
    let mut flags = 1 << 5;
    if font.family.contains("Mono") {
        flags |= 1;
    }
    if font.family.contains("Serif") {
        flags |= 1 << 1;
    }
    if font.style == crate::fonts::FontStyle::Italic {
        flags |= 1 << 6;
    }
    flags
}

/// CMap mapping WinAnsi codes back to Unicode, shared by every embedded
/// font. Required for text extraction under the accessibility profile.
fn build_to_unicode_cmap() -> String {
    let mut pairs: Vec<(u8, char)> = Vec::new();
    for code in 0x20u8..=0xFF {
        if let Some(c) = winansi::decode_byte(code) {
            pairs.push((code, c));
        }
    }

    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo <</Registry (Adobe) /Ordering (UCS) /Supplement 0>> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <20> <FF>\n\
         endcodespacerange\n",
    );
    for chunk in pairs.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (code, c) in chunk {
            cmap.push_str(&format!("<{code:02X}> <{:04X}>\n", *c as u32));
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap
}

// ── Images ──────────────────────────────────────────────────────────────────

fn add_image_xobject(doc: &mut Document, image: &EmbedImage) -> Result<ObjectId> {
    match image {
        EmbedImage::Jpeg {
            data,
            width,
            height,
            gray,
        } => {
            let color_space = if *gray { "DeviceGray" } else { "DeviceRGB" };
            Ok(doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => Object::Integer(*width as i64),
                    "Height" => Object::Integer(*height as i64),
                    "ColorSpace" => color_space,
                    "BitsPerComponent" => Object::Integer(8),
                    "Filter" => "DCTDecode",
                },
                data.clone(),
            )))
        }
        EmbedImage::Raw {
            rgb,
            alpha,
            width,
            height,
        } => {
            let smask_id = match alpha {
                Some(alpha_plane) => {
                    let compressed = deflate(alpha_plane)?;
                    Some(doc.add_object(Stream::new(
                        dictionary! {
                            "Type" => "XObject",
                            "Subtype" => "Image",
                            "Width" => Object::Integer(*width as i64),
                            "Height" => Object::Integer(*height as i64),
                            "ColorSpace" => "DeviceGray",
                            "BitsPerComponent" => Object::Integer(8),
                            "Filter" => "FlateDecode",
                        },
                        compressed,
                    )))
                }
                None => None,
            };

            let compressed = deflate(rgb)?;
            let mut dict = dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(*width as i64),
                "Height" => Object::Integer(*height as i64),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "FlateDecode",
            };
            if let Some(id) = smask_id {
                dict.set("SMask", Object::Reference(id));
            }
            Ok(doc.add_object(Stream::new(dict, compressed)))
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Encode a text string for dictionary values: literal for ASCII, UTF-16BE
/// with BOM otherwise.
fn pdf_text_string(s: &str) -> Object {
    if s.is_ascii() {
        Object::string_literal(s)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in s.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn xmp_packet(title: &str, producer: &str, created: &str) -> String {
    format!(
        r#"<?xpacket begin="{bom}" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="" xmlns:pdfaid="http://www.aiim.org/pdfa/ns/id/">
   <pdfaid:part>3</pdfaid:part>
   <pdfaid:conformance>A</pdfaid:conformance>
  </rdf:Description>
  <rdf:Description rdf:about="" xmlns:pdfuaid="http://www.aiim.org/pdfua/ns/id/">
   <pdfuaid:part>1</pdfuaid:part>
  </rdf:Description>
  <rdf:Description rdf:about="" xmlns:dc="http://purl.org/dc/elements/1.1/">
   <dc:title><rdf:Alt><rdf:li xml:lang="x-default">{title}</rdf:li></rdf:Alt></dc:title>
  </rdf:Description>
  <rdf:Description rdf:about="" xmlns:xmp="http://ns.adobe.com/xap/1.0/">
   <xmp:CreateDate>{created}</xmp:CreateDate>
   <xmp:CreatorTool>arkiv</xmp:CreatorTool>
  </rdf:Description>
  <rdf:Description rdf:about="" xmlns:pdf="http://ns.adobe.com/pdf/1.3/">
   <pdf:Producer>{producer}</pdf:Producer>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#,
        bom = '\u{FEFF}',
        title = xml_escape(title),
        producer = xml_escape(producer),
        created = created,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_string_bytes() {
        assert_eq!(escape_string_bytes(b"plain"), b"plain".to_vec());
        assert_eq!(escape_string_bytes(b"a(b)c"), b"a\\(b\\)c".to_vec());
        assert_eq!(escape_string_bytes(b"a\\b"), b"a\\\\b".to_vec());
    }

    #[test]
    fn test_to_unicode_cmap_shape() {
        let cmap = build_to_unicode_cmap();
        assert!(cmap.contains("begincmap"));
        assert!(cmap.contains("<20> <0020>"));
        assert!(cmap.contains("<80> <20AC>"));
        assert!(cmap.contains("endcmap"));
    }

    #[test]
    fn test_xmp_packet_declares_both_profiles() {
        let xmp = xmp_packet("My <Title>", "arkiv test", "2026-01-01T00:00:00Z");
        assert!(xmp.contains("<pdfaid:part>3</pdfaid:part>"));
        assert!(xmp.contains("<pdfaid:conformance>A</pdfaid:conformance>"));
        assert!(xmp.contains("<pdfuaid:part>1</pdfuaid:part>"));
        assert!(xmp.contains("My &lt;Title&gt;"));
    }

    #[test]
    fn test_pdf_text_string_ascii_and_unicode() {
        match pdf_text_string("plain") {
            Object::String(bytes, _) => assert_eq!(bytes, b"plain".to_vec()),
            _ => panic!("expected string"),
        }
        match pdf_text_string("Prüfbericht") {
            Object::String(bytes, StringFormat::Hexadecimal) => {
                assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
            }
            _ => panic!("expected UTF-16 string"),
        }
    }
}
