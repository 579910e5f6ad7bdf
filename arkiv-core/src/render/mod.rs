//! HTML to accessible/archival PDF rendering.
//!
//! [`PdfRenderer`] orchestrates one conversion: normalize the markup, parse
//! it into the block model, configure fonts / color profile / tagging /
//! producer metadata, then lay out and serialize the document. The output
//! targets PDF/A-3a and PDF/UA-1 simultaneously.

mod dom;
mod fontset;
mod layout;
mod winansi;
mod writer;

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::assets::AssetResolver;
use crate::error::{ArkivError, Result};
use crate::fonts::FontCatalog;

/// Style block injected into every document before parsing. The layout
/// engine paginates tables by these rules: without them long tables would
/// silently truncate at the first page boundary, so this is a correctness
/// fix, not a cosmetic preference.
const TABLE_PAGINATION_CSS: &str = "\
table { page-break-inside: auto; }\n\
thead { display: table-header-group; min-height: 1em; }\n\
tr, thead, tfoot { page-break-inside: avoid; }\n";

/// Per-call rendering options.
pub struct RenderOptions<'a> {
    /// Producer string recorded in the PDF's Info dictionary and XMP.
    pub producer: String,
    /// Base URL for resolving relative references in the document.
    pub base_url: Option<String>,
    /// Resolver for external assets. Without one, only `data:` URIs are
    /// honored — the renderer never performs unpoliced network access.
    pub resolver: Option<&'a AssetResolver>,
}

/// Renders HTML documents to tagged, archival-profile PDF bytes.
pub struct PdfRenderer {
    catalog: Arc<FontCatalog>,
}

impl PdfRenderer {
    pub fn new(catalog: Arc<FontCatalog>) -> Self {
        Self { catalog }
    }

    /// Convert one HTML document to PDF bytes.
    ///
    /// Fails with [`ArkivError::InvalidInput`] for blank input or a
    /// non-http(s) base URL; any downstream failure is wrapped as
    /// [`ArkivError::Render`] and no partial output escapes.
    pub fn render(&self, html: &str, opts: &RenderOptions) -> Result<Vec<u8>> {
        if html.trim().is_empty() {
            return Err(ArkivError::InvalidInput(
                "html must not be blank".to_string(),
            ));
        }

        let base_url = match &opts.base_url {
            Some(raw) => {
                let url = Url::parse(raw).map_err(|e| {
                    ArkivError::InvalidInput(format!("invalid base URL '{raw}': {e}"))
                })?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ArkivError::InvalidInput(format!(
                        "base URL scheme '{}' is not allowed",
                        url.scheme()
                    )));
                }
                Some(url)
            }
            None => None,
        };

        let normalized = normalize_html(html);
        let ctx = dom::FetchContext {
            resolver: opts.resolver,
            base_url,
        };
        let model = dom::build_model(&normalized, &ctx);

        let mut fonts = fontset::FontSet::from_catalog(self.catalog.fonts()?)
            .map_err(|e| ArkivError::Render(e.to_string()))?;
        for (family, bytes) in &model.web_fonts {
            if !fonts.register_web_font(family, bytes.clone()) {
                debug!(family, "web font rejected, catalog fallback applies");
            }
        }

        let layout = layout::lay_out(&model, &fonts);
        debug!(
            pages = layout.pages.len(),
            blocks = model.blocks.len(),
            images = model.images.len(),
            "document laid out"
        );

        writer::write_document(writer::WriterInput {
            meta: &model.meta,
            layout: &layout,
            fonts: &fonts,
            images: &model.images,
            color_profile: self.catalog.color_profile()?,
            producer: &opts.producer,
        })
    }
}

/// Inject the table-pagination style block. Always applied, unconditionally,
/// before parsing.
fn normalize_html(html: &str) -> String {
    let style_block = format!("<style>\n{TABLE_PAGINATION_CSS}</style>");
    let lower = html.to_ascii_lowercase();

    if let Some(pos) = lower.find("</head>") {
        let mut out = String::with_capacity(html.len() + style_block.len());
        out.push_str(&html[..pos]);
        out.push_str(&style_block);
        out.push_str(&html[pos..]);
        return out;
    }
    if let Some(pos) = lower.find("<head") {
        if let Some(end) = html[pos..].find('>') {
            let insert_at = pos + end + 1;
            let mut out = String::with_capacity(html.len() + style_block.len());
            out.push_str(&html[..insert_at]);
            out.push_str(&style_block);
            out.push_str(&html[insert_at..]);
            return out;
        }
    }
    format!("{style_block}{html}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> PdfRenderer {
        PdfRenderer::new(Arc::new(FontCatalog::new()))
    }

    fn options() -> RenderOptions<'static> {
        RenderOptions {
            producer: "arkiv test".to_string(),
            base_url: None,
            resolver: None,
        }
    }

    #[test]
    fn test_render_produces_pdf_signature() {
        let pdf = renderer()
            .render("<html><body><h1>Test</h1></body></html>", &options())
            .unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
    }

    #[test]
    fn test_blank_html_is_invalid_input() {
        for html in ["", "   ", "\n\t  \n"] {
            let err = renderer().render(html, &options()).unwrap_err();
            assert!(err.is_client_error(), "{html:?} should be InvalidInput");
        }
    }

    #[test]
    fn test_invalid_base_url_scheme_is_rejected() {
        let opts = RenderOptions {
            producer: "arkiv test".to_string(),
            base_url: Some("file:///srv/".to_string()),
            resolver: None,
        };
        let err = renderer().render("<p>x</p>", &opts).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_rendered_pdf_parses_and_has_one_page() {
        let pdf = renderer()
            .render("<html><body><h1>Test</h1></body></html>", &options())
            .unwrap();
        let doc = lopdf::Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_rendered_pdf_is_tagged_and_language_declared() {
        let pdf = renderer()
            .render(
                "<html lang=\"en-US\"><head><title>T</title></head><body><p>x</p></body></html>",
                &options(),
            )
            .unwrap();
        let doc = lopdf::Document::load_mem(&pdf).unwrap();
        let catalog = doc.catalog().unwrap();
        assert!(catalog.has(b"StructTreeRoot"));
        assert!(catalog.has(b"MarkInfo"));
        assert!(catalog.has(b"Lang"));
        assert!(catalog.has(b"OutputIntents"));
        assert!(catalog.has(b"Metadata"));
    }

    #[test]
    fn test_long_table_renders_multiple_pages() {
        let mut rows = String::new();
        for i in 0..150 {
            rows.push_str(&format!("<tr><td>item {i}</td><td>detail {i}</td></tr>"));
        }
        let html = format!(
            "<table><thead><tr><th>Item</th><th>Detail</th></tr></thead>{rows}</table>"
        );
        let pdf = renderer().render(&html, &options()).unwrap();
        let doc = lopdf::Document::load_mem(&pdf).unwrap();
        assert!(doc.get_pages().len() > 1);
    }

    #[test]
    fn test_unreachable_font_url_still_renders() {
        let html = r#"<html><head><style>
            @font-face { font-family: "Ghost"; src: url(https://nowhere.invalid/ghost.ttf); }
            </style></head>
            <body><p style="font-family: Ghost">fallback text</p></body></html>"#;
        let pdf = renderer().render(html, &options()).unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
    }

    #[test]
    fn test_normalize_injects_into_head() {
        let html = "<html><head><title>t</title></head><body></body></html>";
        let normalized = normalize_html(html);
        assert!(normalized.contains("page-break-inside"));
        let style_pos = normalized.find("<style>").unwrap();
        let head_close = normalized.find("</head>").unwrap();
        assert!(style_pos < head_close);
    }

    #[test]
    fn test_normalize_without_head_prepends() {
        let normalized = normalize_html("<p>bare</p>");
        assert!(normalized.starts_with("<style>"));
        assert!(normalized.contains("table-header-group"));
    }
}
