//! Tile renderer - draws one output tile of the scene onto a reusable pixmap.

use std::borrow::Cow;
use std::collections::HashSet;

use tiny_skia::{Pixmap, Transform};

use super::path_rasterizer::{circle, link_bounds, link_curve, rounded_rect, PathRasterizer};
use super::style;
use super::text_rasterizer::{fit_text, TextRasterizer};
use crate::config::{BackgroundMode, ExportRequest, RenderFilter};
use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, Camera, Point, Rect, TileSpec, MAX_SURFACE_EDGE};
use crate::raster::{PixelBuffer, Rgba};
use crate::scene::{Group, Link, Node, NodeId, NodeMode, Scene, NODE_TITLE_HEIGHT};

/// What a renderer can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererCapabilities {
    /// Can clear to a transparent background
    pub true_alpha: bool,
    /// Largest surface edge in pixels
    pub max_surface_edge: u32,
}

/// Options for one render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Background mode
    pub background: BackgroundMode,
    /// Solid colour (applied by the pipeline after overlays)
    pub solid_color: Rgba,
    /// Editor background colour
    pub ui_background: Rgba,
    /// Opaque clear colour overriding the background mode
    pub backdrop: Option<Rgba>,
    /// Draw the grid
    pub include_grid: bool,
    /// Node box opacity, 0-100
    pub node_opacity: u8,
    /// Which nodes to draw
    pub node_filter: RenderFilter,
    /// Which links to draw
    pub link_filter: RenderFilter,
    /// Current selection
    pub selected: HashSet<NodeId>,
    /// Output pixels per graph unit
    pub scale: f32,
    /// Overlap rendered around each tile
    pub tile_bleed: u32,
    /// Compression level passed through to the encoder
    pub compression: u8,
    /// Composite overlays and preview media
    pub include_media: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            background: BackgroundMode::Ui,
            solid_color: crate::config::DEFAULT_SETTINGS_SOLID_COLOR,
            ui_background: crate::config::DEFAULT_SOLID_COLOR,
            backdrop: None,
            include_grid: true,
            node_opacity: 100,
            node_filter: RenderFilter::All,
            link_filter: RenderFilter::All,
            selected: HashSet::new(),
            scale: 1.0,
            tile_bleed: crate::config::DEFAULT_TILE_BLEED,
            compression: 7,
            include_media: true,
        }
    }
}

impl RenderOptions {
    /// Options for a request rendered at `scale`.
    pub fn from_request(request: &ExportRequest, scale: f32) -> Self {
        Self {
            background: request.background,
            solid_color: request.solid_color,
            ui_background: request.ui_background,
            backdrop: None,
            include_grid: request.include_grid && request.background == BackgroundMode::Ui,
            node_opacity: request.node_opacity.min(100),
            node_filter: RenderFilter::All,
            link_filter: RenderFilter::All,
            selected: request.selected_node_ids.iter().copied().collect(),
            scale,
            tile_bleed: request.tile_bleed,
            compression: request.png_compression,
            include_media: request.include_overlays,
        }
    }

    /// Clear with an opaque colour instead of the background mode.
    pub fn with_backdrop(mut self, color: Rgba) -> Self {
        self.backdrop = Some(color);
        self
    }

    /// Transparent background, no grid, no backdrop.
    pub fn transparent(mut self) -> Self {
        self.background = BackgroundMode::Transparent;
        self.backdrop = None;
        self.include_grid = false;
        self
    }

    /// Restrict drawn nodes and links.
    pub fn with_filters(mut self, nodes: RenderFilter, links: RenderFilter) -> Self {
        self.node_filter = nodes;
        self.link_filter = links;
        self
    }

    /// Enable or disable the grid.
    pub fn with_grid(mut self, include: bool) -> Self {
        self.include_grid = include;
        self
    }
}

/// Renders rectangular regions of a scene.
pub trait TileRenderer {
    /// Capabilities of this renderer.
    fn capabilities(&self) -> RendererCapabilities;

    /// Render `tile` (output pixels) of `scene` framed by `bbox`.
    fn render(
        &mut self,
        scene: &Scene,
        bbox: &BoundingBox,
        tile: TileSpec,
        options: &RenderOptions,
    ) -> Result<PixelBuffer>;
}

/// tiny-skia renderer owning one reusable offscreen surface.
pub struct SkiaTileRenderer {
    surface: Option<Pixmap>,
    paths: PathRasterizer,
    text: TextRasterizer,
    true_alpha: bool,
}

impl SkiaTileRenderer {
    /// Create a renderer using the system font.
    pub fn new() -> Self {
        Self::with_text(TextRasterizer::new())
    }

    /// Create a renderer with a specific text rasterizer.
    pub fn with_text(text: TextRasterizer) -> Self {
        Self {
            surface: None,
            paths: PathRasterizer::new(),
            text,
            true_alpha: true,
        }
    }

    /// Behave like a host surface that cannot hold alpha: transparent
    /// backgrounds are cleared to the editor colour instead.
    pub fn without_alpha(mut self) -> Self {
        self.true_alpha = false;
        self
    }

    /// Text rasterizer used for labels.
    pub fn text(&self) -> &TextRasterizer {
        &self.text
    }

    fn take_surface(&mut self, width: u32, height: u32) -> Result<Pixmap> {
        if width == 0 || height == 0 || width > MAX_SURFACE_EDGE || height > MAX_SURFACE_EDGE {
            return Err(Error::SurfaceUnavailable { width, height });
        }
        match self.surface.take() {
            Some(p) if p.width() == width && p.height() == height => Ok(p),
            _ => {
                log::debug!("allocating {}x{} render surface", width, height);
                Pixmap::new(width, height).ok_or(Error::SurfaceUnavailable { width, height })
            },
        }
    }

    fn clear_color(&self, options: &RenderOptions) -> Rgba {
        match (options.backdrop, options.background) {
            (Some(backdrop), _) => backdrop,
            (None, BackgroundMode::Ui) => options.ui_background,
            (None, _) if !self.true_alpha => options.ui_background,
            _ => Rgba::TRANSPARENT,
        }
    }
}

impl Default for SkiaTileRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TileRenderer for SkiaTileRenderer {
    fn capabilities(&self) -> RendererCapabilities {
        RendererCapabilities {
            true_alpha: self.true_alpha,
            max_surface_edge: MAX_SURFACE_EDGE,
        }
    }

    fn render(
        &mut self,
        scene: &Scene,
        bbox: &BoundingBox,
        tile: TileSpec,
        options: &RenderOptions,
    ) -> Result<PixelBuffer> {
        if !(options.scale.is_finite() && options.scale > 0.0) {
            return Err(Error::InvalidOptions(format!("render scale {}", options.scale)));
        }
        let mut pixmap = self.take_surface(tile.width, tile.height)?;
        pixmap.fill(self.clear_color(options).to_skia());

        let camera = Camera::for_tile(bbox, options.scale, tile.x, tile.y);
        let top_left = camera.screen_to_world(Point::new(0.0, 0.0));
        let view = Rect::new(
            top_left.x,
            top_left.y,
            tile.width as f32 / options.scale,
            tile.height as f32 / options.scale,
        );

        let working: Cow<'_, Scene> = if options.selected.is_empty()
            || (options.node_filter == RenderFilter::All && options.link_filter == RenderFilter::All)
        {
            Cow::Borrowed(scene)
        } else {
            Cow::Owned(scene.filtered(&options.selected, options.node_filter, options.link_filter))
        };

        let mut frame = Frame {
            pixmap: &mut pixmap,
            transform: camera.to_transform(),
            view,
            scale: options.scale,
            options,
            paths: &self.paths,
            text: &self.text,
        };
        if options.include_grid {
            frame.grid();
        }
        for group in &working.groups {
            frame.group(group);
        }
        for link in &working.links {
            frame.link(&working, link);
        }
        for node in &working.nodes {
            frame.node(node);
        }

        let buffer = PixelBuffer::from_pixmap(&pixmap);
        self.surface = Some(pixmap);
        Ok(buffer)
    }
}

/// Per-tile drawing context.
struct Frame<'a> {
    pixmap: &'a mut Pixmap,
    transform: Transform,
    view: Rect,
    scale: f32,
    options: &'a RenderOptions,
    paths: &'a PathRasterizer,
    text: &'a TextRasterizer,
}

impl Frame<'_> {
    fn visible(&self, rect: &Rect, margin: f32) -> bool {
        rect.inflate(margin).intersects(&self.view)
    }

    fn fill(&mut self, path: Option<tiny_skia::Path>, color: Rgba) {
        if let Some(path) = path {
            self.paths.fill_path(self.pixmap, &path, color, self.transform, None);
        }
    }

    fn stroke(&mut self, path: Option<tiny_skia::Path>, color: Rgba, width: f32) {
        if let Some(path) = path {
            self.paths
                .stroke_path(self.pixmap, &path, color, width, self.transform, None);
        }
    }

    fn label(&mut self, text: &str, x: f32, baseline: f32, size: f32, color: Rgba) {
        self.text
            .draw_text(self.pixmap, text, x, baseline, size, color, self.transform, None);
    }

    fn title(&mut self, text: &str, x: f32, baseline: f32) {
        self.label(text, x, baseline, style::TITLE_FONT_SIZE, style::NODE_TITLE_TEXT);
    }

    fn label_right(&mut self, text: &str, right: f32, baseline: f32, size: f32, color: Rgba) {
        self.text.draw_text_right(
            self.pixmap,
            text,
            right,
            baseline,
            size,
            color,
            self.transform,
            None,
        );
    }

    /// Grid lines at fixed graph positions, one device pixel wide.
    fn grid(&mut self) {
        let spacing = style::GRID_SPACING;
        let line = 1.0 / self.scale;
        let first_x = (self.view.left() / spacing).floor() as i64;
        let last_x = (self.view.right() / spacing).ceil() as i64;
        let first_y = (self.view.top() / spacing).floor() as i64;
        let last_y = (self.view.bottom() / spacing).ceil() as i64;

        for k in first_x..=last_x {
            let color = grid_color(k);
            let x = k as f32 * spacing;
            let rect = Rect::new(x, self.view.top(), line, self.view.height);
            self.paths.fill_rect(self.pixmap, &rect, color, self.transform);
        }
        for k in first_y..=last_y {
            let color = grid_color(k);
            let y = k as f32 * spacing;
            let rect = Rect::new(self.view.left(), y, self.view.width, line);
            self.paths.fill_rect(self.pixmap, &rect, color, self.transform);
        }
    }

    fn group(&mut self, group: &Group) {
        if !self.visible(&group.rect, 4.0) {
            return;
        }
        let color = group.color.unwrap_or(style::GROUP_DEFAULT);
        let title_height = group.font_size * 1.4;

        self.fill(rounded_rect(&group.rect, [4.0; 4]), color.with_alpha_factor(0.25));
        let band = Rect::new(group.rect.x, group.rect.y, group.rect.width, title_height);
        self.fill(rounded_rect(&band, [4.0, 4.0, 0.0, 0.0]), color.with_alpha_factor(0.5));
        self.stroke(rounded_rect(&group.rect, [4.0; 4]), color, 1.0);

        let title = fit_text(self.text, &group.title, group.font_size, group.rect.width - 8.0);
        self.label(
            &title,
            group.rect.x + 4.0,
            group.rect.y + group.font_size,
            group.font_size,
            style::NODE_TITLE_TEXT,
        );
    }

    fn link(&mut self, scene: &Scene, link: &Link) {
        let Some(from) = scene
            .node(link.origin_id)
            .and_then(|n| n.output_pos(link.origin_slot))
        else {
            return;
        };
        let Some(to) = scene
            .node(link.target_id)
            .and_then(|n| n.input_pos(link.target_slot))
        else {
            return;
        };
        if !self.visible(&link_bounds(from, to), style::LINK_WIDTH) {
            return;
        }
        self.stroke(link_curve(from, to), style::type_color(&link.kind), style::LINK_WIDTH);
    }

    fn node(&mut self, node: &Node) {
        let Some(bounds) = node.bounding() else {
            return;
        };
        if !self.visible(&bounds, 8.0) {
            return;
        }
        let box_alpha = self.options.node_opacity as f32 / 100.0;
        let title_bg = node.color.unwrap_or(style::NODE_TITLE_BG).with_alpha_factor(box_alpha);
        let body_bg = node.bgcolor.unwrap_or(style::NODE_BODY_BG).with_alpha_factor(box_alpha);
        let shadow = Rect::new(bounds.x + 3.0, bounds.y + 3.0, bounds.width, bounds.height);
        self.fill(
            rounded_rect(&shadow, [style::NODE_RADIUS; 4]),
            style::NODE_SHADOW.with_alpha_factor(box_alpha),
        );

        let title_baseline = bounds.y + NODE_TITLE_HEIGHT * 0.7;
        let dot = Point::new(
            bounds.x + NODE_TITLE_HEIGHT * 0.5,
            bounds.y + NODE_TITLE_HEIGHT * 0.5,
        );

        if node.collapsed {
            self.fill(rounded_rect(&bounds, [NODE_TITLE_HEIGHT * 0.5; 4]), title_bg);
            self.tint(node, &bounds, box_alpha);
            self.fill(circle(dot, 5.0), style::NODE_TEXT);
            let title = fit_text(
                self.text,
                &node.title,
                style::TITLE_FONT_SIZE,
                bounds.width - NODE_TITLE_HEIGHT - 8.0,
            );
            self.title(&title, bounds.x + NODE_TITLE_HEIGHT, title_baseline);
            return;
        }

        self.fill(rounded_rect(&bounds, [style::NODE_RADIUS; 4]), body_bg);
        let band = Rect::new(bounds.x, bounds.y, bounds.width, NODE_TITLE_HEIGHT);
        self.fill(
            rounded_rect(&band, [style::NODE_RADIUS, style::NODE_RADIUS, 0.0, 0.0]),
            title_bg,
        );
        self.tint(node, &bounds, box_alpha);
        self.fill(circle(dot, 5.0), style::NODE_TEXT);

        let title = fit_text(
            self.text,
            &node.title,
            style::TITLE_FONT_SIZE,
            bounds.width - NODE_TITLE_HEIGHT - 8.0,
        );
        self.title(&title, bounds.x + NODE_TITLE_HEIGHT, title_baseline);

        self.slots(node);
        self.widgets(node, box_alpha);
    }

    fn tint(&mut self, node: &Node, bounds: &Rect, box_alpha: f32) {
        let tint = match node.mode {
            NodeMode::Always => return,
            NodeMode::Bypassed => style::BYPASS_TINT,
            NodeMode::Muted => style::MUTED_TINT,
        };
        self.fill(
            rounded_rect(bounds, [style::NODE_RADIUS; 4]),
            tint.with_alpha_factor(box_alpha),
        );
    }

    fn slots(&mut self, node: &Node) {
        let size = style::BODY_FONT_SIZE;
        for (i, slot) in node.inputs.iter().enumerate() {
            let Some(pos) = node.input_pos(i) else { continue };
            self.fill(circle(pos, style::SLOT_RADIUS), style::type_color(&slot.kind));
            self.label(&slot.name, pos.x + 10.0, pos.y + size * 0.35, size, style::NODE_TEXT);
        }
        for (i, slot) in node.outputs.iter().enumerate() {
            let Some(pos) = node.output_pos(i) else { continue };
            self.fill(circle(pos, style::SLOT_RADIUS), style::type_color(&slot.kind));
            self.label_right(&slot.name, pos.x - 10.0, pos.y + size * 0.35, size, style::NODE_TEXT);
        }
    }

    /// Single-line widget rows. Multi-line text widgets belong to the overlay pass.
    fn widgets(&mut self, node: &Node, box_alpha: f32) {
        let size = style::BODY_FONT_SIZE;
        for (i, widget) in node.widgets.iter().enumerate() {
            if widget.multiline {
                continue;
            }
            let Some(rect) = node.widget_rect(i) else { continue };
            if rect.width <= 0.0 {
                continue;
            }
            let radius = rect.height * 0.5;
            self.fill(
                rounded_rect(&rect, [radius; 4]),
                style::WIDGET_BG.with_alpha_factor(box_alpha),
            );
            self.stroke(rounded_rect(&rect, [radius; 4]), style::WIDGET_OUTLINE, 1.0);

            let baseline = rect.y + rect.height * 0.7;
            let inner = rect.width - 20.0;
            let value = widget.display_value();
            let name_width = if widget.name.is_empty() {
                0.0
            } else {
                let name = fit_text(self.text, &widget.name, size, inner * 0.5);
                self.label(&name, rect.x + 10.0, baseline, size, style::WIDGET_SECONDARY_TEXT);
                inner * 0.5
            };
            let value = fit_text(self.text, &value, size, inner - name_width);
            self.label_right(&value, rect.right() - 10.0, baseline, size, style::WIDGET_TEXT);
        }
    }
}

fn grid_color(k: i64) -> Rgba {
    if k.rem_euclid(style::GRID_MAJOR_EVERY) == 0 {
        style::GRID_MAJOR
    } else {
        style::GRID_MINOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::compute_bbox;
    use crate::scene::{Slot, Widget};

    fn scene() -> Scene {
        let node = Node {
            id: 1,
            title: "Load".to_string(),
            kind: "Test".to_string(),
            geometry: Some(Rect::new(0.0, 30.0, 200.0, 100.0)),
            collapsed: false,
            color: None,
            bgcolor: None,
            mode: NodeMode::Always,
            inputs: vec![Slot {
                name: "in".to_string(),
                kind: "IMAGE".to_string(),
            }],
            outputs: Vec::new(),
            widgets: vec![Widget {
                name: "seed".to_string(),
                value: serde_json::json!(42),
                multiline: false,
                y: None,
                height: None,
            }],
            widgets_start_y: None,
            media: None,
        };
        Scene {
            nodes: vec![node],
            groups: Vec::new(),
            links: Vec::new(),
        }
    }

    fn renderer() -> SkiaTileRenderer {
        SkiaTileRenderer::with_text(TextRasterizer::block_glyphs())
    }

    fn full_tile(bbox: &BoundingBox) -> TileSpec {
        TileSpec::new(0, 0, bbox.padded_width() as u32, bbox.padded_height() as u32)
    }

    #[test]
    fn test_ui_background_and_body() {
        let scene = scene();
        let bbox = compute_bbox(scene.entity_rects(None), 10.0);
        let options = RenderOptions::default().with_grid(false);
        let out = renderer().render(&scene, &bbox, full_tile(&bbox), &options).unwrap();

        assert_eq!((out.width(), out.height()), (220, 150));
        assert_eq!(out.pixel(2, 2), Some(options.ui_background));
        assert_eq!(out.pixel(110, 120), Some(style::NODE_BODY_BG));
    }

    #[test]
    fn test_transparent_background() {
        let scene = scene();
        let bbox = compute_bbox(scene.entity_rects(None), 10.0);
        let options = RenderOptions::default().transparent();
        let out = renderer().render(&scene, &bbox, full_tile(&bbox), &options).unwrap();
        assert_eq!(out.pixel(2, 2).unwrap().a, 0);
        assert_eq!(out.pixel(110, 120).unwrap().a, 255);
    }

    #[test]
    fn test_node_opacity_only_affects_boxes() {
        let scene = scene();
        let bbox = compute_bbox(scene.entity_rects(None), 10.0);
        let mut options = RenderOptions::default().transparent();
        options.node_opacity = 0;
        let out = renderer().render(&scene, &bbox, full_tile(&bbox), &options).unwrap();
        assert_eq!(out.pixel(110, 120).unwrap().a, 0);
        // title text is still drawn
        let title_row_has_ink = (0..out.width()).any(|x| out.pixel(x, 30).is_some_and(|p| p.a > 0));
        assert!(title_row_has_ink);
    }

    #[test]
    fn test_without_alpha_is_opaque() {
        let scene = scene();
        let bbox = compute_bbox(scene.entity_rects(None), 10.0);
        let mut r = renderer().without_alpha();
        assert!(!r.capabilities().true_alpha);
        let options = RenderOptions::default().transparent();
        let out = r.render(&scene, &bbox, full_tile(&bbox), &options).unwrap();
        assert!(out.is_opaque());

        let backdrop = Rgba::rgb(255, 0, 255);
        let out = r
            .render(&scene, &bbox, full_tile(&bbox), &options.with_backdrop(backdrop))
            .unwrap();
        assert_eq!(out.pixel(2, 2), Some(backdrop));
    }

    #[test]
    fn test_transparent_drops_backdrop() {
        let options = RenderOptions::default()
            .with_backdrop(Rgba::rgb(0, 0, 255))
            .transparent();
        assert_eq!(options.backdrop, None);
        assert_eq!(options.background, BackgroundMode::Transparent);

        let scene = scene();
        let bbox = compute_bbox(scene.entity_rects(None), 10.0);
        let out = renderer().render(&scene, &bbox, full_tile(&bbox), &options).unwrap();
        assert_eq!(out.pixel(2, 2).unwrap().a, 0);
    }

    #[test]
    fn test_tile_matches_full_render() {
        let scene = scene();
        let bbox = compute_bbox(scene.entity_rects(None), 10.0);
        let options = RenderOptions::default();
        let mut r = renderer();
        let full = r.render(&scene, &bbox, full_tile(&bbox), &options).unwrap();
        let tile = r
            .render(&scene, &bbox, TileSpec::new(100, 50, 60, 40), &options)
            .unwrap();
        let expected = full.crop(100, 50, 60, 40);

        let differing = expected
            .data()
            .chunks(4)
            .zip(tile.data().chunks(4))
            .filter(|(a, b)| a.iter().zip(b.iter()).any(|(x, y)| x.abs_diff(*y) > 2))
            .count();
        assert!(differing <= 24, "{} pixels differ", differing);
    }

    #[test]
    fn test_oversized_surface_is_rejected() {
        let scene = scene();
        let bbox = compute_bbox(scene.entity_rects(None), 10.0);
        let err = renderer()
            .render(&scene, &bbox, TileSpec::new(0, 0, MAX_SURFACE_EDGE + 1, 10), &RenderOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::SurfaceUnavailable { .. }));
    }

    #[test]
    fn test_filters_remove_unselected_nodes() {
        let scene = scene();
        let bbox = compute_bbox(scene.entity_rects(None), 10.0);
        let mut options = RenderOptions::default()
            .transparent()
            .with_filters(RenderFilter::Unselected, RenderFilter::All);
        options.selected.insert(1);
        let out = renderer().render(&scene, &bbox, full_tile(&bbox), &options).unwrap();
        assert!(out.data().chunks(4).all(|p| p[3] == 0));
    }
}
