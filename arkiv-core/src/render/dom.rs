//! HTML to document-model conversion.
//!
//! The incoming markup is parsed tag-soup tolerantly (html5ever via
//! `scraper`) and reduced to a small block model the layout stage
//! understands: headings, paragraphs, lists, tables, figures, quotes,
//! preformatted text and rules. Inline markup becomes styled runs. External
//! images and `@font-face` sources are fetched here, through the caller's
//! [`AssetResolver`], so every network touch happens in one place.

use base64::Engine;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use crate::assets::optimizer::{sniff_format, ImageOptimizer, RasterFormat};
use crate::assets::AssetResolver;

/// Inline style state inherited down the DOM.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunStyle {
    pub bold: bool,
    pub italic: bool,
    pub mono: bool,
    pub family: Option<String>,
}

/// A span of text with one resolved style. A run whose text is `"\n"`
/// forces a line break (produced by `<br>`).
#[derive(Debug, Clone)]
pub(crate) struct TextRun {
    pub text: String,
    pub style: RunStyle,
}

pub(crate) type Inline = Vec<TextRun>;

/// Decoded image ready for embedding.
#[derive(Debug, Clone)]
pub(crate) enum EmbedImage {
    /// JPEG bytes pass through to a DCTDecode stream.
    Jpeg {
        data: Vec<u8>,
        width: u32,
        height: u32,
        gray: bool,
    },
    /// Decoded raster (PNG path): raw RGB triples plus an optional alpha
    /// plane that becomes an SMask.
    Raw {
        rgb: Vec<u8>,
        alpha: Option<Vec<u8>>,
        width: u32,
        height: u32,
    },
}

impl EmbedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            EmbedImage::Jpeg { width, height, .. } => (*width, *height),
            EmbedImage::Raw { width, height, .. } => (*width, *height),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Block {
    Heading { level: u8, runs: Inline },
    Paragraph { runs: Inline },
    Preformatted { text: String },
    Quote { runs: Inline },
    List { ordered: bool, items: Vec<Inline> },
    Table { head: Vec<Vec<Inline>>, body: Vec<Vec<Inline>> },
    Figure { image: usize, alt: String },
    Rule,
}

#[derive(Debug, Default)]
pub(crate) struct DocMeta {
    pub title: Option<String>,
    pub language: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
}

pub(crate) struct DocModel {
    pub meta: DocMeta,
    pub blocks: Vec<Block>,
    pub images: Vec<EmbedImage>,
    /// Web fonts fetched from `@font-face` rules: (declared family, bytes).
    pub web_fonts: Vec<(String, Vec<u8>)>,
}

/// Where the model builder gets remote bytes from.
pub(crate) struct FetchContext<'a> {
    pub resolver: Option<&'a AssetResolver>,
    pub base_url: Option<Url>,
}

impl FetchContext<'_> {
    /// Fetch a referenced resource. `data:` URIs are decoded locally; HTTP
    /// URLs are resolved against the base URL and routed through the
    /// resolver. Returns `None` on any failure — resources degrade, they
    /// never fail a render.
    fn fetch(&self, raw: &str) -> Option<Vec<u8>> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("data:") {
            let (_, payload) = rest.split_once(";base64,")?;
            return base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .ok();
        }

        let absolute = match Url::parse(raw) {
            Ok(url) => url,
            Err(_) => self.base_url.as_ref()?.join(raw).ok()?,
        };
        let resolver = self.resolver?;
        let bytes = resolver.resolve(absolute.as_str());
        if bytes.is_empty() {
            None
        } else {
            Some(bytes)
        }
    }
}

pub(crate) fn build_model(html_source: &str, ctx: &FetchContext) -> DocModel {
    let document = Html::parse_document(html_source);

    let meta = extract_meta(&document);
    let web_fonts = collect_web_fonts(&document, ctx);

    let mut builder = ModelBuilder {
        ctx,
        blocks: Vec::new(),
        images: Vec::new(),
        pending_inline: Vec::new(),
    };

    let body_sel = Selector::parse("body").expect("static selector");
    if let Some(body) = document.select(&body_sel).next() {
        builder.walk_container(body, &RunStyle::default());
    } else {
        builder.walk_container(document.root_element(), &RunStyle::default());
    }
    builder.flush_pending();

    DocModel {
        meta,
        blocks: builder.blocks,
        images: builder.images,
        web_fonts,
    }
}

fn extract_meta(document: &Html) -> DocMeta {
    let mut meta = DocMeta::default();

    if let Some(lang) = document.root_element().value().attr("lang") {
        let lang = lang.trim();
        if !lang.is_empty() {
            meta.language = Some(lang.to_string());
        }
    }

    let title_sel = Selector::parse("title").expect("static selector");
    if let Some(title) = document.select(&title_sel).next() {
        let text = title.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            meta.title = Some(text);
        }
    }

    let meta_sel = Selector::parse("meta[name][content]").expect("static selector");
    for el in document.select(&meta_sel) {
        let name = el.value().attr("name").unwrap_or_default().to_ascii_lowercase();
        let content = el.value().attr("content").unwrap_or_default().trim().to_string();
        if content.is_empty() {
            continue;
        }
        match name.as_str() {
            "author" => meta.author.get_or_insert(content),
            "subject" => {
                meta.subject = Some(content);
                continue;
            }
            "description" => meta.subject.get_or_insert(content),
            _ => continue,
        };
    }

    meta
}

struct ModelBuilder<'a, 'c> {
    ctx: &'a FetchContext<'c>,
    blocks: Vec<Block>,
    images: Vec<EmbedImage>,
    pending_inline: Inline,
}

impl ModelBuilder<'_, '_> {
    /// Walk a container element: block children become blocks, loose inline
    /// content accumulates into implicit paragraphs.
    fn walk_container(&mut self, el: ElementRef, inherited: &RunStyle) {
        let style = style_for(el, inherited);
        for child in el.children() {
            if let Some(text) = child.value().as_text() {
                push_text(&mut self.pending_inline, text, &style);
                continue;
            }
            let Some(child_el) = ElementRef::wrap(child) else {
                continue;
            };
            let name = child_el.value().name().to_ascii_lowercase();
            if is_inline_tag(&name) {
                collect_inline(child_el, &style, &mut self.pending_inline);
                continue;
            }
            self.flush_pending();
            self.walk_block(child_el, &name, &style);
        }
    }

    fn flush_pending(&mut self) {
        let runs = std::mem::take(&mut self.pending_inline);
        let runs = tidy_inline(runs);
        if !runs.is_empty() {
            self.blocks.push(Block::Paragraph { runs });
        }
    }

    fn walk_block(&mut self, el: ElementRef, name: &str, inherited: &RunStyle) {
        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name.as_bytes()[1] - b'0';
                let runs = inline_of(el, inherited);
                if !runs.is_empty() {
                    self.blocks.push(Block::Heading { level, runs });
                }
            }
            "p" => {
                let runs = inline_of(el, inherited);
                if !runs.is_empty() {
                    self.blocks.push(Block::Paragraph { runs });
                }
                self.extract_images(el);
            }
            "pre" => {
                let text: String = el.text().collect();
                let text = text.trim_end().to_string();
                if !text.trim().is_empty() {
                    self.blocks.push(Block::Preformatted { text });
                }
            }
            "blockquote" => {
                let runs = inline_of(el, inherited);
                if !runs.is_empty() {
                    self.blocks.push(Block::Quote { runs });
                }
            }
            "ul" | "ol" => {
                let ordered = name == "ol";
                let mut items = Vec::new();
                for child in el.children() {
                    let Some(li) = ElementRef::wrap(child) else { continue };
                    if li.value().name().eq_ignore_ascii_case("li") {
                        let runs = inline_of(li, inherited);
                        if !runs.is_empty() {
                            items.push(runs);
                        }
                    }
                }
                if !items.is_empty() {
                    self.blocks.push(Block::List { ordered, items });
                }
            }
            "table" => self.build_table(el, inherited),
            "img" => self.push_image(el),
            "figure" | "picture" => {
                self.extract_images(el);
                // figcaption text becomes a paragraph following the figure
                for child in el.children() {
                    let Some(cap) = ElementRef::wrap(child) else { continue };
                    if cap.value().name().eq_ignore_ascii_case("figcaption") {
                        let runs = inline_of(cap, inherited);
                        if !runs.is_empty() {
                            self.blocks.push(Block::Paragraph { runs });
                        }
                    }
                }
            }
            "hr" => self.blocks.push(Block::Rule),
            "script" | "style" | "noscript" | "template" | "head" | "iframe" | "object" => {}
            // Generic containers recurse; anything unknown is treated as one.
            _ => {
                self.walk_container(el, inherited);
                self.flush_pending();
            }
        }
    }

    fn build_table(&mut self, el: ElementRef, inherited: &RunStyle) {
        let mut head: Vec<Vec<Inline>> = Vec::new();
        let mut body: Vec<Vec<Inline>> = Vec::new();

        fn row_cells(row: ElementRef, inherited: &RunStyle) -> (Vec<Inline>, bool) {
            let mut cells = Vec::new();
            let mut all_header = true;
            for child in row.children() {
                let Some(cell) = ElementRef::wrap(child) else { continue };
                let cell_name = cell.value().name().to_ascii_lowercase();
                if cell_name == "td" || cell_name == "th" {
                    if cell_name != "th" {
                        all_header = false;
                    }
                    cells.push(inline_of(cell, inherited));
                }
            }
            (cells, all_header)
        }

        let visit_rows = |section: ElementRef, into_head: bool, head: &mut Vec<Vec<Inline>>, body: &mut Vec<Vec<Inline>>| {
            for child in section.children() {
                let Some(row) = ElementRef::wrap(child) else { continue };
                if !row.value().name().eq_ignore_ascii_case("tr") {
                    continue;
                }
                let (cells, all_header) = row_cells(row, inherited);
                if cells.is_empty() {
                    continue;
                }
                if into_head || (all_header && body.is_empty() && head.is_empty()) {
                    head.push(cells);
                } else {
                    body.push(cells);
                }
            }
        };

        for child in el.children() {
            let Some(section) = ElementRef::wrap(child) else { continue };
            match section.value().name().to_ascii_lowercase().as_str() {
                "thead" => visit_rows(section, true, &mut head, &mut body),
                "tbody" | "tfoot" => visit_rows(section, false, &mut head, &mut body),
                "tr" => {
                    let (cells, all_header) = row_cells(section, inherited);
                    if !cells.is_empty() {
                        if all_header && head.is_empty() && body.is_empty() {
                            head.push(cells);
                        } else {
                            body.push(cells);
                        }
                    }
                }
                _ => {}
            }
        }

        if !head.is_empty() || !body.is_empty() {
            self.blocks.push(Block::Table { head, body });
        }
    }

    /// Emit Figure blocks for every `img` descendant of `el`.
    fn extract_images(&mut self, el: ElementRef) {
        let img_sel = Selector::parse("img").expect("static selector");
        let imgs: Vec<ElementRef> = el.select(&img_sel).collect();
        for img in imgs {
            self.push_image(img);
        }
    }

    fn push_image(&mut self, el: ElementRef) {
        let Some(src) = el.value().attr("src") else {
            return;
        };
        let Some(bytes) = self.ctx.fetch(src) else {
            warn!(src, "image unavailable, rendering without it");
            return;
        };
        let optimized = ImageOptimizer::optimize(&bytes);
        let Some(image) = decode_embed_image(&optimized) else {
            warn!(src, "image undecodable, rendering without it");
            return;
        };

        let alt = el
            .value()
            .attr("alt")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| alt_from_src(src));

        self.images.push(image);
        self.blocks.push(Block::Figure {
            image: self.images.len() - 1,
            alt,
        });
    }
}

fn decode_embed_image(bytes: &[u8]) -> Option<EmbedImage> {
    match sniff_format(bytes) {
        Some(RasterFormat::Jpeg) => {
            let decoded = image::load_from_memory(bytes).ok()?;
            let gray = !decoded.color().has_color();
            Some(EmbedImage::Jpeg {
                data: bytes.to_vec(),
                width: decoded.width(),
                height: decoded.height(),
                gray,
            })
        }
        _ => {
            let decoded = image::load_from_memory(bytes).ok()?;
            let (width, height) = (decoded.width(), decoded.height());
            if decoded.color().has_alpha() {
                let rgba = decoded.to_rgba8();
                let mut rgb = Vec::with_capacity((width * height * 3) as usize);
                let mut alpha = Vec::with_capacity((width * height) as usize);
                for px in rgba.pixels() {
                    rgb.extend_from_slice(&px.0[..3]);
                    alpha.push(px.0[3]);
                }
                Some(EmbedImage::Raw {
                    rgb,
                    alpha: Some(alpha),
                    width,
                    height,
                })
            } else {
                Some(EmbedImage::Raw {
                    rgb: decoded.to_rgb8().into_raw(),
                    alpha: None,
                    width,
                    height,
                })
            }
        }
    }
}

fn alt_from_src(src: &str) -> String {
    src.rsplit('/')
        .next()
        .map(|name| name.split('?').next().unwrap_or(name))
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "Image".to_string())
}

// ── Inline content ──────────────────────────────────────────────────────────

fn is_inline_tag(name: &str) -> bool {
    matches!(
        name,
        "a" | "abbr"
            | "b"
            | "bdi"
            | "br"
            | "cite"
            | "code"
            | "del"
            | "em"
            | "i"
            | "ins"
            | "kbd"
            | "mark"
            | "q"
            | "s"
            | "samp"
            | "small"
            | "span"
            | "strong"
            | "sub"
            | "sup"
            | "tt"
            | "u"
            | "var"
    )
}

fn inline_of(el: ElementRef, inherited: &RunStyle) -> Inline {
    let mut runs = Vec::new();
    collect_inline(el, inherited, &mut runs);
    tidy_inline(runs)
}

fn collect_inline(el: ElementRef, inherited: &RunStyle, out: &mut Inline) {
    let mut style = style_for(el, inherited);
    match el.value().name().to_ascii_lowercase().as_str() {
        "b" | "strong" => style.bold = true,
        "i" | "em" | "cite" | "var" => style.italic = true,
        "code" | "kbd" | "samp" | "tt" => style.mono = true,
        "br" => {
            out.push(TextRun {
                text: "\n".to_string(),
                style,
            });
            return;
        }
        _ => {}
    }

    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            push_text(out, text, &style);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name().to_ascii_lowercase();
            if matches!(name.as_str(), "script" | "style" | "img") {
                continue;
            }
            collect_inline(child_el, &style, out);
        }
    }
}

fn push_text(out: &mut Inline, text: &str, style: &RunStyle) {
    if text.is_empty() {
        return;
    }
    out.push(TextRun {
        text: text.to_string(),
        style: style.clone(),
    });
}

/// Collapse whitespace across runs and drop runs that end up empty,
/// preserving forced breaks.
fn tidy_inline(runs: Inline) -> Inline {
    let mut tidied: Inline = Vec::new();
    let mut prev_ends_space = true;
    for run in runs {
        if run.text == "\n" {
            tidied.push(run);
            prev_ends_space = true;
            continue;
        }
        let mut collapsed = String::with_capacity(run.text.len());
        for c in run.text.chars() {
            if c.is_whitespace() {
                if !collapsed.ends_with(' ') && !(collapsed.is_empty() && prev_ends_space) {
                    collapsed.push(' ');
                }
            } else {
                collapsed.push(c);
            }
        }
        if collapsed.is_empty() {
            continue;
        }
        prev_ends_space = collapsed.ends_with(' ');
        tidied.push(TextRun {
            text: collapsed,
            style: run.style,
        });
    }
    // Trim a trailing space on the last textual run.
    if let Some(last) = tidied.last_mut() {
        let trimmed = last.text.trim_end().to_string();
        last.text = trimmed;
    }
    tidied.retain(|r| !r.text.is_empty());
    tidied
}

/// Parse the subset of inline CSS the renderer honors: font-family,
/// font-weight, font-style.
fn style_for(el: ElementRef, inherited: &RunStyle) -> RunStyle {
    let mut style = inherited.clone();
    let Some(css) = el.value().attr("style") else {
        return style;
    };
    for decl in css.split(';') {
        let Some((name, value)) = decl.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "font-family" => {
                let first = value.split(',').next().unwrap_or(value).trim();
                if !first.is_empty() {
                    style.family = Some(first.to_string());
                }
            }
            "font-weight" => {
                let lower = value.to_ascii_lowercase();
                style.bold = lower == "bold"
                    || lower == "bolder"
                    || lower.parse::<u16>().map(|w| w >= 600).unwrap_or(false);
            }
            "font-style" => {
                let lower = value.to_ascii_lowercase();
                style.italic = lower == "italic" || lower == "oblique";
            }
            _ => {}
        }
    }
    style
}

// ── Web fonts ───────────────────────────────────────────────────────────────

fn collect_web_fonts(document: &Html, ctx: &FetchContext) -> Vec<(String, Vec<u8>)> {
    let style_sel = Selector::parse("style").expect("static selector");
    let mut fonts = Vec::new();
    for style_el in document.select(&style_sel) {
        let css: String = style_el.text().collect();
        for (family, src) in scan_font_faces(&css) {
            match ctx.fetch(&src) {
                Some(bytes) => fonts.push((family, bytes)),
                None => warn!(family, src, "web font unavailable, falling back"),
            }
        }
    }
    fonts
}

/// Extract (font-family, first src url) pairs from `@font-face` rules.
/// Deliberately small: it understands the declaration subset the service
/// documents, nothing more.
fn scan_font_faces(css: &str) -> Vec<(String, String)> {
    let mut results = Vec::new();
    let mut rest = css;
    while let Some(at) = rest.find("@font-face") {
        rest = &rest[at..];
        let Some(open) = rest.find('{') else { break };
        let Some(close_rel) = rest[open..].find('}') else { break };
        let block = &rest[open + 1..open + close_rel];

        let family = find_declaration(block, "font-family")
            .map(|v| v.trim_matches(|c| c == '"' || c == '\'').trim().to_string());
        let src = find_declaration(block, "src").and_then(|v| {
            let start = v.find("url(")? + 4;
            let end = v[start..].find(')')? + start;
            Some(
                v[start..end]
                    .trim()
                    .trim_matches(|c| c == '"' || c == '\'')
                    .to_string(),
            )
        });

        if let (Some(family), Some(src)) = (family, src) {
            if !family.is_empty() && !src.is_empty() {
                results.push((family, src));
            }
        }
        rest = &rest[open + close_rel..];
    }
    results
}

fn find_declaration<'a>(block: &'a str, property: &str) -> Option<&'a str> {
    for decl in block.split(';') {
        if let Some((name, value)) = decl.split_once(':') {
            if name.trim().eq_ignore_ascii_case(property) {
                return Some(value.trim());
            }
        }
    }
    None
}
