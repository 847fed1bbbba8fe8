//! Per-tile render stack fed to the encoder: layers, overlays, background.

use std::collections::HashSet;

use futures::future::{FutureExt, LocalBoxFuture};

use crate::config::{BackgroundMode, RenderFilter};
use crate::encoding::TileSource;
use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, Camera, Rect, TileSpec};
use crate::overlay::{OverlayCompositor, OverlayElement};
use crate::raster::{PixelBuffer, Rgba};
use crate::rendering::{RenderOptions, TileRenderer};
use crate::scene::{NodeId, Scene};
use crate::transparency::{recover_alpha, RecoveryError, TransparencyConfig};

/// Renders scene layers, recovering alpha when the renderer has none.
pub(crate) struct LayerRenderer<'a> {
    renderer: &'a mut dyn TileRenderer,
    scene: &'a Scene,
    bbox: BoundingBox,
    true_alpha: bool,
    transparency: TransparencyConfig,
    recovery_error: Option<RecoveryError>,
}

impl<'a> LayerRenderer<'a> {
    pub(crate) fn new(
        renderer: &'a mut dyn TileRenderer,
        scene: &'a Scene,
        bbox: BoundingBox,
        transparency: TransparencyConfig,
    ) -> Self {
        let true_alpha = renderer.capabilities().true_alpha;
        Self {
            renderer,
            scene,
            bbox,
            true_alpha,
            transparency,
            recovery_error: None,
        }
    }

    fn needs_recovery(&self, options: &RenderOptions) -> bool {
        !self.true_alpha
            && options.backdrop.is_none()
            && options.background == BackgroundMode::Transparent
    }

    /// Render one layer of `tile`.
    pub(crate) fn render(
        &mut self,
        tile: TileSpec,
        options: &RenderOptions,
    ) -> Result<PixelBuffer> {
        if !self.needs_recovery(options) {
            return self.renderer.render(self.scene, &self.bbox, tile, options);
        }

        let over_a = self.renderer.render(
            self.scene,
            &self.bbox,
            tile,
            &options.clone().with_backdrop(self.transparency.background_a),
        )?;
        let over_b = self.renderer.render(
            self.scene,
            &self.bbox,
            tile,
            &options.clone().with_backdrop(self.transparency.background_b),
        )?;
        recover_alpha(&over_a, &over_b, &self.transparency).map_err(|e| {
            let reason = e.to_string();
            self.recovery_error = Some(e);
            Error::TileRender {
                x: tile.x,
                y: tile.y,
                reason,
            }
        })
    }

    /// Render a layer whose alpha must survive a solid pass.
    ///
    /// If recovery fails with the configured backdrops, it is retried once
    /// with the default pair.
    pub(crate) fn render_keeping_alpha(
        &mut self,
        tile: TileSpec,
        options: &RenderOptions,
    ) -> Result<PixelBuffer> {
        let fallback = TransparencyConfig::default();
        match self.render(tile, options) {
            Err(e) if self.recovery_error.is_some() && self.transparency != fallback => {
                log::debug!("retrying layer recovery with default backdrops: {}", e);
                self.recovery_error = None;
                let configured = std::mem::replace(&mut self.transparency, fallback);
                let retried = self.render(tile, options);
                self.transparency = configured;
                retried
            },
            other => other,
        }
    }

    /// The recovery failure that aborted a render, if any.
    pub(crate) fn take_recovery_error(&mut self) -> Option<RecoveryError> {
        self.recovery_error.take()
    }
}

/// Selected-only layer drawn at full strength over the dimmed full layer.
struct Spotlight {
    options: RenderOptions,
    /// Opacity of the full layer beneath, 0..1
    opacity: f32,
    /// Overlays redrawn on the selected layer
    overlays: Vec<OverlayElement>,
}

/// Everything needed to produce final tile pixels.
pub(crate) struct ExportTileSource<'a> {
    layers: LayerRenderer<'a>,
    options: RenderOptions,
    spotlight: Option<Spotlight>,
    compositor: Option<OverlayCompositor<'a>>,
    overlays: &'a [OverlayElement],
    flatten: Option<Rgba>,
    raster: (u32, u32),
}

impl<'a> ExportTileSource<'a> {
    pub(crate) fn new(
        layers: LayerRenderer<'a>,
        options: RenderOptions,
        raster: (u32, u32),
    ) -> Self {
        let flatten = (options.background == BackgroundMode::Solid).then_some(options.solid_color);
        Self {
            layers,
            options,
            spotlight: None,
            compositor: None,
            overlays: &[],
            flatten,
            raster,
        }
    }

    /// Dim everything to `opacity` (0..1) and draw the selection, with
    /// `overlays` on top of it, at full strength.
    pub(crate) fn with_spotlight(mut self, opacity: f32, overlays: Vec<OverlayElement>) -> Self {
        let options = self
            .options
            .clone()
            .transparent()
            .with_filters(RenderFilter::Selected, RenderFilter::Selected);
        self.spotlight = Some(Spotlight {
            options,
            opacity: opacity.clamp(0.0, 1.0),
            overlays,
        });
        self
    }

    pub(crate) fn with_overlays(
        mut self,
        compositor: OverlayCompositor<'a>,
        overlays: &'a [OverlayElement],
    ) -> Self {
        self.compositor = Some(compositor);
        self.overlays = overlays;
        self
    }

    pub(crate) fn take_recovery_error(&mut self) -> Option<RecoveryError> {
        self.layers.take_recovery_error()
    }

    async fn produce(&mut self, tile: TileSpec) -> Result<PixelBuffer> {
        let Self {
            layers,
            options,
            spotlight,
            compositor,
            overlays,
            flatten,
            raster,
        } = self;
        let expanded = tile.expand(options.tile_bleed, raster.0, raster.1);
        let camera = Camera::for_tile(&layers.bbox, options.scale, expanded.x, expanded.y);

        let mut layer = layers.render(expanded, options)?;
        composite_overlays(compositor, &mut layer, &camera, *overlays).await?;

        if let Some(spot) = spotlight.as_ref() {
            let mut selected = layers.render_keeping_alpha(expanded, &spot.options)?;
            composite_overlays(compositor, &mut selected, &camera, &spot.overlays).await?;
            let mut combined = PixelBuffer::new(expanded.width, expanded.height);
            combined.draw_over(&layer, 0, 0, spot.opacity);
            combined.draw_over(&selected, 0, 0, 1.0);
            layer = combined;
        }

        let (ox, oy) = tile.offset_within(&expanded);
        let mut pixels = layer.crop(ox, oy, tile.width, tile.height);
        if let Some(color) = *flatten {
            pixels.flatten_onto(color);
        }
        Ok(pixels)
    }
}

async fn composite_overlays(
    compositor: &mut Option<OverlayCompositor<'_>>,
    layer: &mut PixelBuffer,
    camera: &Camera,
    overlays: &[OverlayElement],
) -> Result<()> {
    let Some(compositor) = compositor.as_mut() else {
        return Ok(());
    };
    let drawn = compositor.composite(layer, camera, overlays).await?;
    if drawn > 0 {
        log::debug!("{} overlay(s) drawn", drawn);
    }
    Ok(())
}

/// Overlays belonging to the selection: owned by a selected node, or
/// unowned and touching one.
pub(crate) fn selection_overlays(
    scene: &Scene,
    overlays: &[OverlayElement],
    selection: &HashSet<NodeId>,
) -> Vec<OverlayElement> {
    let selected_rects: Vec<Rect> = scene
        .nodes
        .iter()
        .filter(|n| selection.contains(&n.id))
        .filter_map(|n| n.bounding())
        .collect();
    overlays
        .iter()
        .filter(|e| match e.node_id {
            Some(id) => selection.contains(&id),
            None => selected_rects.iter().any(|r| r.intersects(&e.graph_rect)),
        })
        .cloned()
        .collect()
}

impl TileSource for ExportTileSource<'_> {
    fn render_tile(&mut self, tile: TileSpec) -> LocalBoxFuture<'_, Result<PixelBuffer>> {
        self.produce(tile).boxed_local()
    }
}

/// Copy `src` into `dst` with its top-left corner at `(x, y)`.
pub(crate) fn paste(dst: &mut PixelBuffer, src: &PixelBuffer, x: u32, y: u32) {
    let dst_width = dst.width() as usize;
    let copy_w = src.width().min(dst.width().saturating_sub(x)) as usize;
    let rows = src.height().min(dst.height().saturating_sub(y));
    for row in 0..rows {
        let start = ((y + row) as usize * dst_width + x as usize) * 4;
        dst.data_mut()[start..start + copy_w * 4].copy_from_slice(&src.row(row)[..copy_w * 4]);
    }
}
