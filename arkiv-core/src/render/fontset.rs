//! Per-render font selection and measurement.
//!
//! A `FontSet` combines the process-wide catalog (fallback-final fonts) with
//! any web fonts a document registered through `@font-face`. Faces are
//! parsed once per render and reduced to the metrics the layout and writer
//! stages need, so no borrowed `ttf_parser::Face` escapes this module.

use crate::error::{ArkivError, Result};
use crate::fonts::{FontEntry, FontStyle, FontWeight};
use crate::render::winansi;

/// A parsed, measurable font variant.
pub(crate) struct LoadedFont {
    pub family: String,
    pub weight: FontWeight,
    pub style: FontStyle,
    pub fallback: bool,
    pub bytes: Vec<u8>,
    pub units_per_em: u16,
    pub ascender: i16,
    pub descender: i16,
    pub cap_height: i16,
    /// [x_min, y_min, x_max, y_max] in font units.
    pub bbox: [i16; 4],
    /// Advance widths in font units for WinAnsi codes 32..=255; zero for
    /// unmapped codes and missing glyphs.
    pub advances: Vec<u16>,
}

impl LoadedFont {
    fn from_entry(entry: &FontEntry) -> Result<Self> {
        let face = ttf_parser::Face::parse(&entry.bytes, 0)
            .map_err(|e| ArkivError::Render(format!("font '{}' unparsable: {e}", entry.family)))?;

        // Simple TrueType embedding needs a glyf table; CFF-flavored fonts
        // are rejected here and the caller falls back to the catalog.
        if face.tables().glyf.is_none() {
            return Err(ArkivError::Render(format!(
                "font '{}' has no glyf table",
                entry.family
            )));
        }

        let mut advances = vec![0u16; 224];
        for (i, advance) in advances.iter_mut().enumerate() {
            let code = (i + 32) as u8;
            if let Some(c) = winansi::decode_byte(code) {
                if let Some(glyph) = face.glyph_index(c) {
                    *advance = face.glyph_hor_advance(glyph).unwrap_or(0);
                }
            }
        }

        let bbox = face.global_bounding_box();
        Ok(Self {
            family: entry.family.clone(),
            weight: entry.weight,
            style: entry.style,
            fallback: entry.fallback,
            bytes: entry.bytes.clone(),
            units_per_em: face.units_per_em(),
            ascender: face.ascender(),
            descender: face.descender(),
            cap_height: face.capital_height().unwrap_or(face.ascender()),
            bbox: [bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max],
            advances,
        })
    }

    /// Width of `text` at `size` points, in points.
    pub fn measure(&self, text: &str, size: f32) -> f32 {
        let total: u32 = text
            .chars()
            .map(|c| {
                let code = winansi::encode_char(c).unwrap_or(b'?');
                self.advances[(code - 32) as usize] as u32
            })
            .sum();
        total as f32 * size / self.units_per_em as f32
    }
}

/// The fonts available to one render, catalog entries first.
pub(crate) struct FontSet {
    fonts: Vec<LoadedFont>,
}

impl FontSet {
    pub fn from_catalog(entries: &[FontEntry]) -> Result<Self> {
        let fonts = entries
            .iter()
            .map(LoadedFont::from_entry)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fonts })
    }

    /// Register a web font declared via `@font-face`. Unparsable data is
    /// ignored; the document falls back to the catalog.
    pub fn register_web_font(&mut self, family: &str, bytes: Vec<u8>) -> bool {
        let entry = FontEntry {
            family: family.to_string(),
            weight: FontWeight::Regular,
            style: FontStyle::Normal,
            bytes,
            fallback: false,
        };
        match LoadedFont::from_entry(&entry) {
            Ok(font) => {
                self.fonts.push(font);
                true
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, id: usize) -> &LoadedFont {
        &self.fonts[id]
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    /// Pick the best variant for a style request.
    ///
    /// An explicitly requested family is matched by name (web fonts take
    /// precedence over catalog families, generic CSS names map onto the
    /// catalog). Without a family, fallback-capable fonts apply in catalog
    /// order — the fallback-final contract.
    pub fn select(
        &self,
        family: Option<&str>,
        mono: bool,
        bold: bool,
        italic: bool,
    ) -> usize {
        let target_family: Option<String> = match family {
            Some(name) => {
                let name = name.trim().trim_matches('"').trim_matches('\'');
                match name.to_ascii_lowercase().as_str() {
                    "serif" => Some("DejaVu Serif".to_string()),
                    "sans-serif" => Some("DejaVu Sans".to_string()),
                    "monospace" => Some("DejaVu Sans Mono".to_string()),
                    lower => {
                        // Exact (case-insensitive) family match, web fonts first.
                        self.fonts
                            .iter()
                            .rev()
                            .find(|f| f.family.to_ascii_lowercase() == lower)
                            .map(|f| f.family.clone())
                    }
                }
            }
            None => None,
        };

        let target_family = target_family.unwrap_or_else(|| {
            if mono {
                "DejaVu Sans Mono".to_string()
            } else {
                "DejaVu Sans".to_string()
            }
        });

        let candidates: Vec<usize> = (0..self.fonts.len())
            .filter(|&i| self.fonts[i].family == target_family)
            .collect();
        if candidates.is_empty() {
            // Family vanished (never for catalog names); final fallback is
            // the first catalog font.
            return 0;
        }

        let want_weight = if bold {
            FontWeight::Bold
        } else {
            FontWeight::Regular
        };
        let want_style = if italic {
            FontStyle::Italic
        } else {
            FontStyle::Normal
        };

        candidates
            .iter()
            .copied()
            .find(|&i| self.fonts[i].weight == want_weight && self.fonts[i].style == want_style)
            .or_else(|| {
                candidates
                    .iter()
                    .copied()
                    .find(|&i| self.fonts[i].weight == want_weight)
            })
            .unwrap_or(candidates[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::FontCatalog;

    fn test_set() -> FontSet {
        let catalog = FontCatalog::new();
        FontSet::from_catalog(catalog.fonts().unwrap()).unwrap()
    }

    #[test]
    fn test_default_selection_is_sans_regular() {
        let set = test_set();
        let id = set.select(None, false, false, false);
        let font = set.get(id);
        assert_eq!(font.family, "DejaVu Sans");
        assert_eq!(font.weight, FontWeight::Regular);
        assert_eq!(font.style, FontStyle::Normal);
    }

    #[test]
    fn test_bold_italic_variants_resolve() {
        let set = test_set();
        let bold = set.get(set.select(None, false, true, false));
        assert_eq!(bold.weight, FontWeight::Bold);
        let italic = set.get(set.select(None, false, false, true));
        assert_eq!(italic.style, FontStyle::Italic);
        let both = set.get(set.select(None, false, true, true));
        assert_eq!((both.weight, both.style), (FontWeight::Bold, FontStyle::Italic));
    }

    #[test]
    fn test_generic_family_names() {
        let set = test_set();
        assert_eq!(set.get(set.select(Some("serif"), false, false, false)).family, "DejaVu Serif");
        assert_eq!(
            set.get(set.select(Some("monospace"), false, false, false)).family,
            "DejaVu Sans Mono"
        );
        assert_eq!(set.get(set.select(None, true, false, false)).family, "DejaVu Sans Mono");
    }

    #[test]
    fn test_unknown_family_falls_back_to_sans() {
        let set = test_set();
        assert_eq!(
            set.get(set.select(Some("Comic Sans MS"), false, false, false)).family,
            "DejaVu Sans"
        );
    }

    #[test]
    fn test_measure_is_monotonic_in_length() {
        let set = test_set();
        let font = set.get(0);
        let short = font.measure("hi", 12.0);
        let long = font.measure("hello world", 12.0);
        assert!(short > 0.0);
        assert!(long > short);
    }

    #[test]
    fn test_measure_scales_with_size() {
        let set = test_set();
        let font = set.get(0);
        let at_10 = font.measure("sample", 10.0);
        let at_20 = font.measure("sample", 20.0);
        assert!((at_20 - 2.0 * at_10).abs() < 0.001);
    }

    #[test]
    fn test_web_font_registration_rejects_garbage() {
        let mut set = test_set();
        let before = set.len();
        assert!(!set.register_web_font("Broken", vec![0u8; 16]));
        assert_eq!(set.len(), before);
    }

    #[test]
    fn test_web_font_registration_accepts_truetype() {
        let mut set = test_set();
        // Reuse a catalog face as the "downloaded" web font payload.
        let bytes = set.get(0).bytes.clone();
        assert!(set.register_web_font("Custom Web", bytes));
        let id = set.select(Some("Custom Web"), false, false, false);
        assert_eq!(set.get(id).family, "Custom Web");
        assert!(!set.get(id).fallback);
    }
}
