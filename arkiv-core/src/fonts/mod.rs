//! Embedded font and color-profile resources.
//!
//! Archival PDFs must embed every font they use and declare a
//! device-independent color space, so the crate ships a fixed set of twelve
//! DejaVu variants (three families, four styles each) and an sRGB ICC
//! profile, compiled into the binary. The set is loaded and verified once
//! per process; afterwards the bytes are immutable and shared read-only
//! across all conversions.

use once_cell::sync::OnceCell;
use rust_embed::RustEmbed;
use tracing::info;

use crate::error::{ArkivError, Result};

#[derive(RustEmbed)]
#[folder = "assets/"]
struct EmbeddedResources;

const COLOR_PROFILE_PATH: &str = "sRGB.icc";

/// The fixed catalog, in registration order. The renderer uses this order as
/// the tie-break among fallback candidates.
const FONT_FILES: &[(&str, &str)] = &[
    ("fonts/DejaVuSans.ttf", "DejaVu Sans"),
    ("fonts/DejaVuSans-Bold.ttf", "DejaVu Sans"),
    ("fonts/DejaVuSans-Oblique.ttf", "DejaVu Sans"),
    ("fonts/DejaVuSans-BoldOblique.ttf", "DejaVu Sans"),
    ("fonts/DejaVuSerif.ttf", "DejaVu Serif"),
    ("fonts/DejaVuSerif-Bold.ttf", "DejaVu Serif"),
    ("fonts/DejaVuSerif-Italic.ttf", "DejaVu Serif"),
    ("fonts/DejaVuSerif-BoldItalic.ttf", "DejaVu Serif"),
    ("fonts/DejaVuSansMono.ttf", "DejaVu Sans Mono"),
    ("fonts/DejaVuSansMono-Bold.ttf", "DejaVu Sans Mono"),
    ("fonts/DejaVuSansMono-Oblique.ttf", "DejaVu Sans Mono"),
    ("fonts/DejaVuSansMono-BoldOblique.ttf", "DejaVu Sans Mono"),
];

/// Weight class of a catalog font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Regular,
    Bold,
}

impl FontWeight {
    /// Numeric OS/2-style weight class.
    pub fn class(&self) -> u16 {
        match self {
            FontWeight::Regular => 400,
            FontWeight::Bold => 700,
        }
    }
}

/// Style class of a catalog font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Normal,
    Italic,
}

/// One embeddable font variant.
///
/// Weight and style are derived from the file name, not from font tables.
/// That is acceptable only because the set is fixed at build time; fonts
/// registered at runtime (web fonts) are matched by declared family name
/// and never rely on this classification.
#[derive(Debug, Clone)]
pub struct FontEntry {
    pub family: String,
    pub weight: FontWeight,
    pub style: FontStyle,
    pub bytes: Vec<u8>,
    /// Whether this entry participates in fallback selection when CSS does
    /// not request a family. Catalog fonts do; web fonts do not.
    pub fallback: bool,
}

struct CatalogData {
    fonts: Vec<FontEntry>,
    color_profile: Vec<u8>,
}

/// Process-wide cache of embeddable fonts and the sRGB profile.
///
/// The first caller (normally `warmup()` at startup) triggers the load;
/// concurrent callers block until it completes and then share the immutable
/// result.
pub struct FontCatalog {
    loaded: OnceCell<CatalogData>,
}

impl FontCatalog {
    pub fn new() -> Self {
        Self {
            loaded: OnceCell::new(),
        }
    }

    /// Eagerly load and verify all resources. Intended to run once at
    /// process start; a missing or unparsable resource is a deployment
    /// defect and aborts startup.
    pub fn warmup(&self) -> Result<()> {
        self.data().map(|_| ())
    }

    /// The cached font set, in catalog order.
    pub fn fonts(&self) -> Result<&[FontEntry]> {
        Ok(&self.data()?.fonts)
    }

    /// The cached sRGB ICC profile bytes.
    pub fn color_profile(&self) -> Result<&[u8]> {
        Ok(&self.data()?.color_profile)
    }

    fn data(&self) -> Result<&CatalogData> {
        self.loaded.get_or_try_init(load_resources)
    }
}

impl Default for FontCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn load_resources() -> Result<CatalogData> {
    let mut fonts = Vec::with_capacity(FONT_FILES.len());
    for (path, family) in FONT_FILES {
        let file = EmbeddedResources::get(path)
            .ok_or_else(|| ArkivError::ResourceLoad(format!("embedded font missing: {path}")))?;
        let bytes = file.data.into_owned();
        ttf_parser::Face::parse(&bytes, 0)
            .map_err(|e| ArkivError::ResourceLoad(format!("font {path} is unparsable: {e}")))?;
        fonts.push(FontEntry {
            family: family.to_string(),
            weight: classify_weight(path),
            style: classify_style(path),
            bytes,
            fallback: true,
        });
    }

    let profile = EmbeddedResources::get(COLOR_PROFILE_PATH)
        .ok_or_else(|| {
            ArkivError::ResourceLoad(format!("embedded color profile missing: {COLOR_PROFILE_PATH}"))
        })?
        .data
        .into_owned();
    if profile.len() < 132 || &profile[36..40] != b"acsp" {
        return Err(ArkivError::ResourceLoad(
            "embedded color profile is not an ICC profile".to_string(),
        ));
    }

    info!(
        fonts = fonts.len(),
        profile_bytes = profile.len(),
        "font catalog loaded"
    );
    Ok(CatalogData {
        fonts,
        color_profile: profile,
    })
}

fn classify_weight(path: &str) -> FontWeight {
    if path.contains("Bold") {
        FontWeight::Bold
    } else {
        FontWeight::Regular
    }
}

fn classify_style(path: &str) -> FontStyle {
    if path.contains("Oblique") || path.contains("Italic") {
        FontStyle::Italic
    } else {
        FontStyle::Normal
    }
}
