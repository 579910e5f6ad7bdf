//! Block layout and pagination.
//!
//! Converts the document model into positioned draw operations, one page at
//! a time, while building the logical structure tree in parallel. Every
//! visible piece of real content is emitted inside a marked-content region
//! (tag + MCID) so the writer can wire up `StructTreeRoot`; purely visual
//! repetitions (repeated table headers, rules) are emitted as artifacts.

use std::collections::BTreeSet;

use crate::render::dom::{Block, DocModel, Inline};
use crate::render::fontset::FontSet;

pub(crate) const PAGE_WIDTH: f32 = 595.28;
pub(crate) const PAGE_HEIGHT: f32 = 841.89;
pub(crate) const MARGIN: f32 = 56.7;

const LINE_FACTOR: f32 = 1.45;
const BODY_SIZE: f32 = 11.0;
const PRE_SIZE: f32 = 9.5;
const TABLE_SIZE: f32 = 10.0;
const CELL_PAD: f32 = 4.0;
const LIST_INDENT: f32 = 18.0;
const QUOTE_INDENT: f32 = 20.0;

/// CSS pixels (96 dpi) to points (72 dpi).
const PX_TO_PT: f32 = 0.75;

#[derive(Debug)]
pub(crate) enum DrawOp {
    Text {
        x: f32,
        y: f32,
        font: usize,
        size: f32,
        text: String,
    },
    Image {
        image: usize,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
    },
    Line {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        width: f32,
    },
}

#[derive(Debug)]
pub(crate) enum ContentItem {
    Marked {
        tag: String,
        mcid: u32,
        ops: Vec<DrawOp>,
    },
    Artifact {
        ops: Vec<DrawOp>,
    },
}

#[derive(Debug, Default)]
pub(crate) struct PageLayout {
    pub items: Vec<ContentItem>,
}

/// A node of the logical structure tree. Leaves carry the marked-content
/// regions ((page, MCID) pairs) that render their content.
#[derive(Debug)]
pub(crate) struct StructNode {
    pub tag: String,
    pub alt: Option<String>,
    pub children: Vec<StructNode>,
    pub marks: Vec<(usize, u32)>,
}

impl StructNode {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            alt: None,
            children: Vec::new(),
            marks: Vec::new(),
        }
    }
}

pub(crate) struct LayoutResult {
    pub pages: Vec<PageLayout>,
    pub root: StructNode,
    pub used_fonts: Vec<usize>,
}

/// One wrapped fragment: text in a single font at a single size.
struct Frag {
    font: usize,
    text: String,
    width: f32,
}

type Line = Vec<Frag>;

pub(crate) fn lay_out(model: &DocModel, fonts: &FontSet) -> LayoutResult {
    let mut engine = LayoutEngine {
        model,
        fonts,
        pages: vec![PageLayout::default()],
        y: PAGE_HEIGHT - MARGIN,
        used_fonts: BTreeSet::new(),
    };

    let mut root = StructNode::new("Document");
    for block in &model.blocks {
        if let Some(node) = engine.lay_out_block(block) {
            root.children.push(node);
        }
    }

    // A document always renders with the default font available, even when
    // it contains no text at all.
    if engine.used_fonts.is_empty() {
        engine.used_fonts.insert(engine.fonts.select(None, false, false, false));
    }

    LayoutResult {
        pages: engine.pages,
        root,
        used_fonts: engine.used_fonts.into_iter().collect(),
    }
}

struct LayoutEngine<'a> {
    model: &'a DocModel,
    fonts: &'a FontSet,
    pages: Vec<PageLayout>,
    /// Top of the next line box, in PDF coordinates (origin bottom-left).
    y: f32,
    used_fonts: BTreeSet<usize>,
}

impl LayoutEngine<'_> {
    fn content_width(&self) -> f32 {
        PAGE_WIDTH - 2.0 * MARGIN
    }

    fn page(&self) -> usize {
        self.pages.len() - 1
    }

    fn new_page(&mut self) {
        self.pages.push(PageLayout::default());
        self.y = PAGE_HEIGHT - MARGIN;
    }

    /// Break to a new page unless `needed` points still fit on this one.
    fn ensure(&mut self, needed: f32) -> bool {
        if self.y - needed < MARGIN && self.y < PAGE_HEIGHT - MARGIN - 0.01 {
            self.new_page();
            true
        } else {
            false
        }
    }

    fn marked_count(&self, page: usize) -> u32 {
        self.pages[page]
            .items
            .iter()
            .filter(|i| matches!(i, ContentItem::Marked { .. }))
            .count() as u32
    }

    /// Append a draw op to `node`'s marked region on the current page,
    /// opening a fresh region (new MCID) when the node has none here yet.
    fn push_op(&mut self, node: &mut StructNode, op: DrawOp) {
        let page = self.page();
        let reusable = matches!(
            (node.marks.last(), self.pages[page].items.last()),
            (Some(&(p, m)), Some(ContentItem::Marked { mcid, .. })) if p == page && *mcid == m
        );
        if !reusable {
            let mcid = self.marked_count(page);
            node.marks.push((page, mcid));
            self.pages[page].items.push(ContentItem::Marked {
                tag: node.tag.clone(),
                mcid,
                ops: Vec::new(),
            });
        }
        if let Some(ContentItem::Marked { ops, .. }) = self.pages[page].items.last_mut() {
            ops.push(op);
        }
    }

    fn push_artifact(&mut self, op: DrawOp) {
        let page = self.page();
        if !matches!(self.pages[page].items.last(), Some(ContentItem::Artifact { .. })) {
            self.pages[page]
                .items
                .push(ContentItem::Artifact { ops: Vec::new() });
        }
        if let Some(ContentItem::Artifact { ops }) = self.pages[page].items.last_mut() {
            ops.push(op);
        }
    }

    // ── Text wrapping ───────────────────────────────────────────────────

    fn resolve_font(&mut self, style: &crate::render::dom::RunStyle, force: &RunForce) -> usize {
        let id = self.fonts.select(
            style.family.as_deref(),
            style.mono || force.mono,
            style.bold || force.bold,
            style.italic || force.italic,
        );
        self.used_fonts.insert(id);
        id
    }

    fn wrap(&mut self, runs: &Inline, size: f32, width: f32, force: &RunForce) -> Vec<Line> {
        let mut lines: Vec<Line> = Vec::new();
        let mut current: Line = Vec::new();
        let mut current_w = 0.0f32;

        let mut flush = |current: &mut Line, lines: &mut Vec<Line>| {
            if !current.is_empty() {
                lines.push(std::mem::take(current));
            }
        };

        for run in runs {
            if run.text == "\n" {
                flush(&mut current, &mut lines);
                current_w = 0.0;
                continue;
            }
            let font_id = self.resolve_font(&run.style, force);
            let font = self.fonts.get(font_id);
            let space_w = font.measure(" ", size);

            for word in run.text.split_whitespace() {
                let mut word_w = font.measure(word, size);

                // A word wider than the column is split hard so layout
                // always terminates.
                let mut word = word.to_string();
                while word_w > width && word.chars().count() > 1 {
                    let mut cut = word.chars().count() - 1;
                    loop {
                        let prefix: String = word.chars().take(cut).collect();
                        let w = font.measure(&prefix, size);
                        if w <= width || cut <= 1 {
                            let lead = if current.is_empty() { 0.0 } else { current_w + space_w };
                            if lead + w > width {
                                flush(&mut current, &mut lines);
                                current_w = 0.0;
                            }
                            append_frag(&mut current, font_id, &prefix, w);
                            current_w += w;
                            flush(&mut current, &mut lines);
                            current_w = 0.0;
                            word = word.chars().skip(cut).collect();
                            word_w = font.measure(&word, size);
                            break;
                        }
                        cut -= 1;
                    }
                }

                let sep = if current.is_empty() { 0.0 } else { space_w };
                if current_w + sep + word_w > width && !current.is_empty() {
                    flush(&mut current, &mut lines);
                    current_w = 0.0;
                }
                if !current.is_empty() {
                    append_frag(&mut current, font_id, " ", space_w);
                    current_w += space_w;
                }
                append_frag(&mut current, font_id, &word, word_w);
                current_w += word_w;
            }
        }
        flush(&mut current, &mut lines);
        lines
    }

    /// Emit wrapped lines into `node`, breaking pages as needed.
    fn emit_lines(&mut self, node: &mut StructNode, lines: &[Line], x: f32, size: f32) {
        let lh = size * LINE_FACTOR;
        for line in lines {
            self.ensure(lh);
            let baseline = self.y - size * 0.82;
            let mut cursor_x = x;
            for frag in line {
                if frag.text != " " {
                    self.push_op(
                        node,
                        DrawOp::Text {
                            x: cursor_x,
                            y: baseline,
                            font: frag.font,
                            size,
                            text: frag.text.clone(),
                        },
                    );
                }
                cursor_x += frag.width;
            }
            self.y -= lh;
        }
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    fn lay_out_block(&mut self, block: &Block) -> Option<StructNode> {
        match block {
            Block::Heading { level, runs } => {
                let size = heading_size(*level);
                self.y -= size * 0.8;
                let force = RunForce {
                    bold: true,
                    ..RunForce::default()
                };
                let lines = self.wrap(runs, size, self.content_width(), &force);
                let mut node = StructNode::new(&format!("H{level}"));
                self.ensure(size * LINE_FACTOR * lines.len().min(2) as f32);
                self.emit_lines(&mut node, &lines, MARGIN, size);
                self.y -= size * 0.4;
                Some(node)
            }
            Block::Paragraph { runs } => {
                let force = RunForce::default();
                let lines = self.wrap(runs, BODY_SIZE, self.content_width(), &force);
                if lines.is_empty() {
                    return None;
                }
                let mut node = StructNode::new("P");
                self.emit_lines(&mut node, &lines, MARGIN, BODY_SIZE);
                self.y -= 6.0;
                Some(node)
            }
            Block::Quote { runs } => {
                let force = RunForce {
                    italic: true,
                    ..RunForce::default()
                };
                let width = self.content_width() - 2.0 * QUOTE_INDENT;
                let lines = self.wrap(runs, BODY_SIZE, width, &force);
                if lines.is_empty() {
                    return None;
                }
                let mut node = StructNode::new("BlockQuote");
                self.emit_lines(&mut node, &lines, MARGIN + QUOTE_INDENT, BODY_SIZE);
                self.y -= 6.0;
                Some(node)
            }
            Block::Preformatted { text } => {
                let mut node = StructNode::new("Code");
                let force = RunForce {
                    mono: true,
                    ..RunForce::default()
                };
                let runs_of = |line: &str| {
                    vec![crate::render::dom::TextRun {
                        text: line.to_string(),
                        style: Default::default(),
                    }]
                };
                self.y -= 4.0;
                for raw_line in text.lines() {
                    if raw_line.trim().is_empty() {
                        self.y -= PRE_SIZE * 1.3;
                        continue;
                    }
                    let lines = self.wrap(&runs_of(raw_line), PRE_SIZE, self.content_width(), &force);
                    for line in &lines {
                        self.ensure(PRE_SIZE * 1.3);
                        let baseline = self.y - PRE_SIZE * 0.82;
                        let mut cursor_x = MARGIN;
                        for frag in line {
                            if frag.text != " " {
                                self.push_op(
                                    &mut node,
                                    DrawOp::Text {
                                        x: cursor_x,
                                        y: baseline,
                                        font: frag.font,
                                        size: PRE_SIZE,
                                        text: frag.text.clone(),
                                    },
                                );
                            }
                            cursor_x += frag.width;
                        }
                        self.y -= PRE_SIZE * 1.3;
                    }
                }
                self.y -= 6.0;
                if node.marks.is_empty() {
                    None
                } else {
                    Some(node)
                }
            }
            Block::List { ordered, items } => {
                let mut list_node = StructNode::new("L");
                let width = self.content_width() - LIST_INDENT;
                for (i, item) in items.iter().enumerate() {
                    let force = RunForce::default();
                    let lines = self.wrap(item, BODY_SIZE, width, &force);
                    if lines.is_empty() {
                        continue;
                    }
                    let mut li = StructNode::new("LI");
                    let label = if *ordered {
                        format!("{}.", i + 1)
                    } else {
                        "\u{2022}".to_string()
                    };
                    let label_font = self.resolve_font(&Default::default(), &force);
                    self.ensure(BODY_SIZE * LINE_FACTOR);
                    self.push_op(
                        &mut li,
                        DrawOp::Text {
                            x: MARGIN + 2.0,
                            y: self.y - BODY_SIZE * 0.82,
                            font: label_font,
                            size: BODY_SIZE,
                            text: label,
                        },
                    );
                    self.emit_lines(&mut li, &lines, MARGIN + LIST_INDENT, BODY_SIZE);
                    self.y -= 2.0;
                    list_node.children.push(li);
                }
                self.y -= 4.0;
                if list_node.children.is_empty() {
                    None
                } else {
                    Some(list_node)
                }
            }
            Block::Table { head, body } => self.lay_out_table(head, body),
            Block::Figure { image, alt } => {
                let (px_w, px_h) = self.model.images[*image].dimensions();
                let mut w = (px_w as f32 * PX_TO_PT).min(self.content_width());
                let mut h = w * px_h as f32 / px_w.max(1) as f32;
                let max_h = PAGE_HEIGHT - 2.0 * MARGIN - 4.0;
                if h > max_h {
                    let scale = max_h / h;
                    h = max_h;
                    w *= scale;
                }
                self.ensure(h + 8.0);
                let mut node = StructNode::new("Figure");
                node.alt = Some(alt.clone());
                self.push_op(
                    &mut node,
                    DrawOp::Image {
                        image: *image,
                        x: MARGIN,
                        y: self.y - h,
                        w,
                        h,
                    },
                );
                self.y -= h + 8.0;
                Some(node)
            }
            Block::Rule => {
                self.ensure(12.0);
                self.push_artifact(DrawOp::Line {
                    x1: MARGIN,
                    y1: self.y - 6.0,
                    x2: PAGE_WIDTH - MARGIN,
                    y2: self.y - 6.0,
                    width: 0.7,
                });
                self.y -= 12.0;
                None
            }
        }
    }

    fn lay_out_table(
        &mut self,
        head: &[Vec<Inline>],
        body: &[Vec<Inline>],
    ) -> Option<StructNode> {
        let ncols = head
            .iter()
            .chain(body.iter())
            .map(|row| row.len())
            .max()
            .unwrap_or(0);
        if ncols == 0 {
            return None;
        }
        let col_w = self.content_width() / ncols as f32;
        let cell_w = col_w - 2.0 * CELL_PAD;
        let lh = TABLE_SIZE * 1.35;
        // Header rows repeated after a break keep at least one full line of
        // height so they stay legible.
        let min_row_h = lh + 2.0 * CELL_PAD;

        let mut table_node = StructNode::new("Table");
        self.y -= 4.0;

        // Pre-wrap the header so it can be replayed after page breaks.
        let header_force = RunForce {
            bold: true,
            ..RunForce::default()
        };
        let wrapped_head: Vec<Vec<Vec<Line>>> = head
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| self.wrap(cell, TABLE_SIZE, cell_w, &header_force))
                    .collect()
            })
            .collect();

        let row_height = |cells: &[Vec<Line>]| -> f32 {
            cells
                .iter()
                .map(|lines| lines.len().max(1) as f32 * lh + 2.0 * CELL_PAD)
                .fold(min_row_h, f32::max)
        };

        // Emits one row's text. `kind` decides whether cells are logical
        // content (fresh TH/TD nodes) or an artifact replay of the header.
        enum RowKind<'n> {
            Logical(&'n mut StructNode, &'static str),
            Artifact,
        }
        fn emit_row(
            engine: &mut LayoutEngine,
            cells: &[Vec<Line>],
            col_w: f32,
            lh: f32,
            kind: RowKind,
        ) {
            let row_top = engine.y;
            match kind {
                RowKind::Logical(row_node, tag) => {
                    for (ci, lines) in cells.iter().enumerate() {
                        let mut cell_node = StructNode::new(tag);
                        let x = MARGIN + ci as f32 * col_w + CELL_PAD;
                        let mut y = row_top - CELL_PAD;
                        for line in lines {
                            let baseline = y - TABLE_SIZE * 0.82;
                            let mut cursor_x = x;
                            for frag in line {
                                if frag.text != " " {
                                    engine.push_op(
                                        &mut cell_node,
                                        DrawOp::Text {
                                            x: cursor_x,
                                            y: baseline,
                                            font: frag.font,
                                            size: TABLE_SIZE,
                                            text: frag.text.clone(),
                                        },
                                    );
                                }
                                cursor_x += frag.width;
                            }
                            y -= lh;
                        }
                        if cell_node.marks.is_empty() {
                            // Keep empty cells in the structure so rows stay
                            // rectangular for assistive tech.
                            let anchor_font = engine.fonts.select(None, false, false, false);
                            engine.used_fonts.insert(anchor_font);
                            let mcid_anchor = DrawOp::Text {
                                x,
                                y: row_top - CELL_PAD - TABLE_SIZE * 0.82,
                                font: anchor_font,
                                size: TABLE_SIZE,
                                text: String::new(),
                            };
                            engine.push_op(&mut cell_node, mcid_anchor);
                        }
                        row_node.children.push(cell_node);
                    }
                }
                RowKind::Artifact => {
                    for (ci, lines) in cells.iter().enumerate() {
                        let x = MARGIN + ci as f32 * col_w + CELL_PAD;
                        let mut y = row_top - CELL_PAD;
                        for line in lines {
                            let baseline = y - TABLE_SIZE * 0.82;
                            let mut cursor_x = x;
                            for frag in line {
                                if frag.text != " " {
                                    engine.push_artifact(DrawOp::Text {
                                        x: cursor_x,
                                        y: baseline,
                                        font: frag.font,
                                        size: TABLE_SIZE,
                                        text: frag.text.clone(),
                                    });
                                }
                                cursor_x += frag.width;
                            }
                            y -= lh;
                        }
                    }
                }
            }
        }

        let emit_header_rule = |engine: &mut LayoutEngine, ncols: usize, col_w: f32| {
            let x2 = MARGIN + ncols as f32 * col_w;
            engine.push_artifact(DrawOp::Line {
                x1: MARGIN,
                y1: engine.y,
                x2,
                y2: engine.y,
                width: 0.7,
            });
        };

        // Logical header rows.
        for (ri, row) in wrapped_head.iter().enumerate() {
            let h = row_height(row);
            self.ensure(h);
            let mut tr = StructNode::new("TR");
            emit_row(self, row, col_w, lh, RowKind::Logical(&mut tr, "TH"));
            self.y -= h;
            if ri == wrapped_head.len() - 1 {
                emit_header_rule(self, ncols, col_w);
            }
            table_node.children.push(tr);
        }

        // Body rows, repeating the header (as an artifact) after breaks.
        for row in body {
            let wrapped: Vec<Vec<Line>> = row
                .iter()
                .map(|cell| self.wrap(cell, TABLE_SIZE, cell_w, &RunForce::default()))
                .collect();
            let h = row_height(&wrapped);
            if self.ensure(h) && !wrapped_head.is_empty() {
                for head_row in &wrapped_head {
                    let hh = row_height(head_row);
                    emit_row(self, head_row, col_w, lh, RowKind::Artifact);
                    self.y -= hh;
                }
                emit_header_rule(self, ncols, col_w);
            }
            let mut tr = StructNode::new("TR");
            emit_row(self, &wrapped, col_w, lh, RowKind::Logical(&mut tr, "TD"));
            self.y -= h;
            table_node.children.push(tr);
        }

        self.y -= 8.0;
        if table_node.children.is_empty() {
            None
        } else {
            Some(table_node)
        }
    }
}

/// Style overrides a block imposes on all of its runs.
#[derive(Default)]
struct RunForce {
    bold: bool,
    italic: bool,
    mono: bool,
}

fn heading_size(level: u8) -> f32 {
    match level {
        1 => 22.0,
        2 => 17.0,
        3 => 14.0,
        4 => 12.5,
        5 => 11.0,
        _ => 10.0,
    }
}

fn append_frag(line: &mut Line, font: usize, text: &str, width: f32) {
    if let Some(last) = line.last_mut() {
        if last.font == font {
            last.text.push_str(text);
            last.width += width;
            return;
        }
    }
    line.push(Frag {
        font,
        text: text.to_string(),
        width,
    });
}
