//! Text rasterizer - renders labels using tiny-skia.
//!
//! Glyph outlines come from a system sans-serif face found through `fontdb`
//! and parsed with `ttf-parser`. When no usable face exists (headless hosts,
//! minimal containers) text is drawn as block glyphs with fixed advances so
//! layout stays stable.

use std::sync::Arc;

use lazy_static::lazy_static;
use tiny_skia::{FillRule, Mask, Path, PathBuilder, Pixmap, Transform};

use super::path_rasterizer::solid_paint;
use crate::raster::Rgba;

/// Advance of a block glyph relative to the font size.
const BLOCK_ADVANCE: f32 = 0.6;

lazy_static! {
    static ref SYSTEM_SANS: Option<FontData> = FontData::system_sans_serif();
}

/// Width measurement used for wrapping and alignment.
pub trait TextMeasure {
    /// Advance width of `text` at `font_size`.
    fn advance(&self, text: &str, font_size: f32) -> f32;
}

/// Fixed-advance measure matching the block glyph fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockMeasure;

impl TextMeasure for BlockMeasure {
    fn advance(&self, text: &str, font_size: f32) -> f32 {
        text.chars().count() as f32 * font_size * BLOCK_ADVANCE
    }
}

/// Raw font file plus face index.
#[derive(Clone)]
pub struct FontData {
    data: Arc<Vec<u8>>,
    index: u32,
}

impl std::fmt::Debug for FontData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontData")
            .field("bytes", &self.data.len())
            .field("index", &self.index)
            .finish()
    }
}

impl FontData {
    /// Wrap font file bytes; `None` if they do not parse as a face.
    pub fn from_bytes(data: Vec<u8>, index: u32) -> Option<Self> {
        ttf_parser::Face::parse(&data, index).ok()?;
        Some(Self {
            data: Arc::new(data),
            index,
        })
    }

    fn system_sans_serif() -> Option<Self> {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        let query = fontdb::Query {
            families: &[fontdb::Family::SansSerif],
            ..fontdb::Query::default()
        };
        let id = db.query(&query).or_else(|| db.faces().next().map(|f| f.id))?;
        let (data, index) = db.with_face_data(id, |data, index| (data.to_vec(), index))?;
        let font = Self::from_bytes(data, index);
        match &font {
            Some(_) => log::debug!("using system font face {:?}", id),
            None => log::warn!("system font face {:?} failed to parse", id),
        }
        font
    }

    fn face(&self) -> Option<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(&self.data, self.index).ok()
    }
}

/// Collects glyph outlines into one path, flipping the font's y-up space.
struct GlyphSink<'a> {
    builder: &'a mut PathBuilder,
    x: f32,
    y: f32,
    scale: f32,
}

impl GlyphSink<'_> {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.x + x * self.scale, self.y - y * self.scale)
    }
}

impl ttf_parser::OutlineBuilder for GlyphSink<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

/// Rasterizer for single-line labels.
#[derive(Debug, Clone)]
pub struct TextRasterizer {
    font: Option<FontData>,
}

impl TextRasterizer {
    /// Create a text rasterizer backed by the system sans-serif face.
    pub fn new() -> Self {
        Self {
            font: SYSTEM_SANS.clone(),
        }
    }

    /// Use a specific font.
    pub fn with_font(font: FontData) -> Self {
        Self { font: Some(font) }
    }

    /// Block glyphs only; output does not depend on installed fonts.
    pub fn block_glyphs() -> Self {
        Self { font: None }
    }

    /// Whether real glyph outlines are available.
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw `text` with its baseline starting at `(x, baseline)` in path units.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_text(
        &self,
        pixmap: &mut Pixmap,
        text: &str,
        x: f32,
        baseline: f32,
        font_size: f32,
        color: Rgba,
        transform: Transform,
        mask: Option<&Mask>,
    ) {
        if text.is_empty() || color.a == 0 || font_size <= 0.0 {
            return;
        }
        let path = match self.font.as_ref().and_then(FontData::face) {
            Some(face) => outline_path(&face, text, x, baseline, font_size),
            None => block_path(text, x, baseline, font_size),
        };
        if let Some(path) = path {
            pixmap.fill_path(&path, &solid_paint(color), FillRule::Winding, transform, mask);
        }
    }

    /// Draw `text` so it ends at `right`.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_text_right(
        &self,
        pixmap: &mut Pixmap,
        text: &str,
        right: f32,
        baseline: f32,
        font_size: f32,
        color: Rgba,
        transform: Transform,
        mask: Option<&Mask>,
    ) {
        let x = right - self.advance(text, font_size);
        self.draw_text(pixmap, text, x, baseline, font_size, color, transform, mask);
    }
}

impl Default for TextRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextMeasure for TextRasterizer {
    fn advance(&self, text: &str, font_size: f32) -> f32 {
        let Some(face) = self.font.as_ref().and_then(FontData::face) else {
            return BlockMeasure.advance(text, font_size);
        };
        let scale = font_size / face.units_per_em() as f32;
        text.chars()
            .map(|c| {
                face.glyph_index(c)
                    .and_then(|g| face.glyph_hor_advance(g))
                    .map(|a| a as f32 * scale)
                    .unwrap_or(font_size * BLOCK_ADVANCE)
            })
            .sum()
    }
}

fn outline_path(
    face: &ttf_parser::Face<'_>,
    text: &str,
    x: f32,
    baseline: f32,
    size: f32,
) -> Option<Path> {
    let scale = size / face.units_per_em() as f32;
    let mut builder = PathBuilder::new();
    let mut pen = x;
    for c in text.chars() {
        let Some(glyph) = face.glyph_index(c) else {
            pen += size * BLOCK_ADVANCE;
            continue;
        };
        let mut sink = GlyphSink {
            builder: &mut builder,
            x: pen,
            y: baseline,
            scale,
        };
        face.outline_glyph(glyph, &mut sink);
        pen += face.glyph_hor_advance(glyph).unwrap_or(0) as f32 * scale;
    }
    builder.finish()
}

fn block_path(text: &str, x: f32, baseline: f32, size: f32) -> Option<Path> {
    let advance = size * BLOCK_ADVANCE;
    let mut builder = PathBuilder::new();
    for (i, c) in text.chars().enumerate() {
        if c.is_whitespace() {
            continue;
        }
        let left = x + i as f32 * advance + advance * 0.15;
        let top = baseline - size * 0.7;
        if let Some(r) = tiny_skia::Rect::from_xywh(left, top, advance * 0.7, size * 0.7) {
            builder.push_rect(r);
        }
    }
    builder.finish()
}

/// Greedy word wrap.
///
/// Explicit newlines always break. A word wider than `max_width` on its own is
/// broken between characters.
pub fn wrap_text(
    measure: &dyn TextMeasure,
    text: &str,
    font_size: f32,
    max_width: f32,
) -> Vec<String> {
    if max_width.is_nan() || max_width <= 0.0 {
        return text.split('\n').map(str::to_string).collect();
    }
    let fits = |s: &str| measure.advance(s, font_size) <= max_width;
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", line, word)
            };
            if fits(&candidate) {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if fits(word) {
                line = word.to_string();
                continue;
            }
            for c in word.chars() {
                line.push(c);
                if !fits(&line) && line.chars().count() > 1 {
                    line.pop();
                    lines.push(std::mem::take(&mut line));
                    line.push(c);
                }
            }
        }
        lines.push(line);
    }
    lines
}

/// `text` shortened with an ellipsis so it fits `max_width`.
pub fn fit_text(measure: &dyn TextMeasure, text: &str, font_size: f32, max_width: f32) -> String {
    if measure.advance(text, font_size) <= max_width {
        return text.to_string();
    }
    let mut out: String = String::new();
    for c in text.chars() {
        out.push(c);
        if measure.advance(&format!("{}…", out), font_size) > max_width {
            out.pop();
            break;
        }
    }
    if out.is_empty() {
        return String::new();
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_measure() {
        assert_eq!(BlockMeasure.advance("abcd", 10.0), 24.0);
        assert_eq!(TextRasterizer::block_glyphs().advance("abcd", 10.0), 24.0);
    }

    #[test]
    fn test_wrap_greedy() {
        // 6 units per char at size 10; 60 units fit ten chars
        let lines = wrap_text(&BlockMeasure, "the quick brown fox jumps", 10.0, 60.0);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
    }

    #[test]
    fn test_wrap_hard_breaks_long_words() {
        let lines = wrap_text(&BlockMeasure, "abcdefghijklmnopqrstuvwxy", 10.0, 60.0);
        assert_eq!(lines, vec!["abcdefghij", "klmnopqrst", "uvwxy"]);
    }

    #[test]
    fn test_wrap_keeps_newlines() {
        let lines = wrap_text(&BlockMeasure, "a\n\nb", 10.0, 60.0);
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    #[test]
    fn test_fit_text() {
        assert_eq!(fit_text(&BlockMeasure, "short", 10.0, 60.0), "short");
        let fitted = fit_text(&BlockMeasure, "a much longer label", 10.0, 60.0);
        assert!(fitted.ends_with('…'));
        assert!(BlockMeasure.advance(&fitted, 10.0) <= 60.0);
    }

    #[test]
    fn test_block_glyphs_draw() {
        let mut pixmap = Pixmap::new(60, 20).unwrap();
        TextRasterizer::block_glyphs().draw_text(
            &mut pixmap,
            "AB",
            0.0,
            15.0,
            12.0,
            Rgba::WHITE,
            Transform::identity(),
            None,
        );
        assert!(pixmap.pixels().iter().any(|p| p.alpha() > 0));
    }

    #[test]
    fn test_invalid_font_bytes() {
        assert!(FontData::from_bytes(vec![0, 1, 2, 3], 0).is_none());
    }
}
