//! Painting overlays onto rendered tiles.

use std::time::Duration;

use tiny_skia::{FillRule, FilterQuality, Mask, Paint, Pattern, Pixmap, SpreadMode, Transform};

use super::media::{Frame, MediaCapture, MediaResolver};
use super::{
    FitMode, MediaSource, OverlayContent, OverlayElement, OverlayKind, TextStyle,
};
use crate::error::Result;
use crate::geometry::{Camera, Point, Rect};
use crate::raster::PixelBuffer;
use crate::rendering::{rect_path, wrap_text, PathRasterizer, TextRasterizer};
use crate::scene::{Node, Scene, NODE_WIDGET_HEIGHT};

/// Images larger than the export by more than this factor are page backgrounds,
/// not node content.
const OVERSIZE_FACTOR: f32 = 1.05;

/// Draws overlay elements onto tiles, one tile at a time.
pub struct OverlayCompositor<'r> {
    capture: MediaCapture<'r>,
    text: TextRasterizer,
    paths: PathRasterizer,
    export_bounds: Option<Rect>,
}

impl<'r> OverlayCompositor<'r> {
    /// Compositor capturing media through `resolver`.
    pub fn new(resolver: &'r dyn MediaResolver, text: TextRasterizer) -> Self {
        Self {
            capture: MediaCapture::new(resolver),
            text,
            paths: PathRasterizer::new(),
            export_bounds: None,
        }
    }

    /// Per-capture timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.capture = self.capture.with_timeout(timeout);
        self
    }

    /// Graph rectangle of the whole export, used to reject oversized images.
    pub fn with_export_bounds(mut self, bounds: Rect) -> Self {
        self.export_bounds = Some(bounds);
        self
    }

    /// Paint `elements` onto `tile`.
    ///
    /// Returns the number of overlays drawn. Individual failures are logged
    /// and skipped; only a surface allocation failure is an error. Media
    /// captures run under `tokio::time::timeout` and need a tokio runtime.
    pub async fn composite(
        &mut self,
        tile: &mut PixelBuffer,
        camera: &Camera,
        elements: &[OverlayElement],
    ) -> Result<usize> {
        let top_left = camera.screen_to_world(Point::new(0.0, 0.0));
        let view = Rect::new(
            top_left.x,
            top_left.y,
            tile.width() as f32 / camera.scale,
            tile.height() as f32 / camera.scale,
        );

        let visible: Vec<&OverlayElement> = elements
            .iter()
            .filter(|e| e.graph_rect.is_valid() && e.graph_rect.intersects(&view))
            .collect();
        if visible.is_empty() {
            return Ok(0);
        }

        let mut pixmap = tile.to_pixmap()?;
        let transform = camera.to_transform();
        let mut drawn = 0;

        for element in visible.iter().filter(|e| e.kind() != OverlayKind::Text) {
            if self.is_oversized(element) {
                log::debug!("skipping oversized image overlay {:?}", element.graph_rect);
                continue;
            }
            let (frame, fit) = match &element.content {
                OverlayContent::Image { source, fit } => (self.capture.capture(source).await, *fit),
                OverlayContent::Video { frame, poster, fit } => (
                    self.capture
                        .capture_video(frame.as_ref(), poster.as_ref())
                        .await,
                    *fit,
                ),
                OverlayContent::Text { .. } => continue,
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    log::debug!("no frame for overlay on node {:?}: {}", element.node_id, e);
                    continue;
                },
            };
            match draw_frame(&mut pixmap, &frame, &element.graph_rect, fit, transform) {
                Ok(()) => drawn += 1,
                Err(reason) => log::warn!("image overlay skipped: {}", reason),
            }
        }

        for element in &visible {
            if let OverlayContent::Text { text, style } = &element.content {
                match self.draw_text(&mut pixmap, text, style, &element.graph_rect, transform) {
                    Ok(()) => drawn += 1,
                    Err(reason) => log::warn!("text overlay skipped: {}", reason),
                }
            }
        }

        *tile = PixelBuffer::from_pixmap(&pixmap);
        Ok(drawn)
    }

    fn is_oversized(&self, element: &OverlayElement) -> bool {
        let Some(bounds) = self.export_bounds else {
            return false;
        };
        element.kind() == OverlayKind::Image
            && (element.graph_rect.width > bounds.width * OVERSIZE_FACTOR
                || element.graph_rect.height > bounds.height * OVERSIZE_FACTOR)
    }

    fn draw_text(
        &self,
        pixmap: &mut Pixmap,
        text: &str,
        style: &TextStyle,
        rect: &Rect,
        transform: Transform,
    ) -> std::result::Result<(), String> {
        let clip = rect_path(rect).ok_or("empty text rectangle")?;
        let mut mask =
            Mask::new(pixmap.width(), pixmap.height()).ok_or("clip mask allocation failed")?;
        mask.fill_path(&clip, FillRule::Winding, true, transform);

        if let Some(background) = style.background {
            self.paths.fill_path(pixmap, &clip, background, transform, None);
        }

        let max_width = rect.width - style.padding * 2.0;
        let line_height = style.font_size * style.line_height;
        let mut baseline = rect.y + style.padding + style.font_size * 0.8;
        for line in wrap_text(&self.text, text, style.font_size, max_width) {
            if baseline - style.font_size > rect.bottom() {
                break;
            }
            self.text.draw_text(
                pixmap,
                &line,
                rect.x + style.padding,
                baseline,
                style.font_size,
                style.color,
                transform,
                Some(&mask),
            );
            baseline += line_height;
        }
        Ok(())
    }
}

/// Largest rectangle with aspect `width:height` centred in `rect`.
pub fn contain_rect(rect: &Rect, width: u32, height: u32) -> Rect {
    if width == 0 || height == 0 {
        return Rect::new(rect.x, rect.y, 0.0, 0.0);
    }
    let scale = (rect.width / width as f32).min(rect.height / height as f32);
    let w = width as f32 * scale;
    let h = height as f32 * scale;
    Rect::new(
        rect.x + (rect.width - w) / 2.0,
        rect.y + (rect.height - h) / 2.0,
        w,
        h,
    )
}

fn draw_frame(
    pixmap: &mut Pixmap,
    frame: &Frame,
    rect: &Rect,
    fit: FitMode,
    transform: Transform,
) -> std::result::Result<(), String> {
    let dest = match fit {
        FitMode::Fill => *rect,
        FitMode::Contain => contain_rect(rect, frame.width(), frame.height()),
    };
    let target = tiny_skia::Rect::from_xywh(dest.x, dest.y, dest.width, dest.height)
        .ok_or_else(|| format!("empty destination {:?}", dest))?;
    let image = frame.pixels().to_pixmap().map_err(|e| e.to_string())?;

    let image_to_graph = Transform::from_translate(dest.x, dest.y).pre_scale(
        dest.width / frame.width() as f32,
        dest.height / frame.height() as f32,
    );
    let paint = Paint {
        shader: Pattern::new(
            image.as_ref(),
            SpreadMode::Pad,
            FilterQuality::Bilinear,
            1.0,
            image_to_graph,
        ),
        anti_alias: true,
        ..Paint::default()
    };
    pixmap.fill_rect(target, &paint, transform, None);
    Ok(())
}

/// Rectangle a multi-line widget's editor occupies.
fn widget_text_rect(node: &Node, index: usize) -> Option<Rect> {
    let body = node.geometry?;
    let mut rect = node.widget_rect(index)?;
    if node.widgets.get(index)?.height.is_none() {
        rect.height = (body.bottom() - rect.y - 6.0).max(NODE_WIDGET_HEIGHT);
    }
    rect.is_valid().then_some(rect)
}

/// Stand-ins for content the host would show but no overlay covers:
/// stored multi-line widget text and node preview thumbnails.
pub fn fallback_overlays(scene: &Scene, elements: &[OverlayElement]) -> Vec<OverlayElement> {
    let covered = |node: &Node, rect: &Rect, media: bool| {
        elements.iter().any(|e| {
            (e.kind() != OverlayKind::Text) == media
                && (e.node_id == Some(node.id) || e.graph_rect.intersects(rect))
        })
    };

    let mut out = Vec::new();
    for node in scene.nodes.iter().filter(|n| !n.collapsed) {
        for (i, widget) in node.widgets.iter().enumerate() {
            let Some(text) = widget.text().filter(|t| widget.multiline && !t.is_empty()) else {
                continue;
            };
            let Some(rect) = widget_text_rect(node, i) else { continue };
            if !covered(node, &rect, false) {
                out.push(
                    OverlayElement::text(rect, text)
                        .with_node(node.id)
                        .with_style(TextStyle::widget_fallback()),
                );
            }
        }

        if let (Some(media), Some(rect)) = (&node.media, node.preview_rect()) {
            if !covered(node, &rect, true) {
                out.push(
                    OverlayElement::image(rect, MediaSource::Media(media.clone()))
                        .with_node(node.id)
                        .with_fit(FitMode::Contain),
                );
            }
        }
    }
    out
}
