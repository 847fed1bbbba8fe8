//! Export pipeline.
//!
//! [`Exporter::export`] turns a scene snapshot and an [`ExportRequest`] into
//! encoded image bytes:
//!
//! 1. Normalize the request and reject unsupported targets.
//! 2. Normalize the snapshot into a [`Scene`] and compute the bounding box.
//! 3. Plan the output size (downscale or tile when the long edge is exceeded).
//! 4. For every tile: render and composite overlays, dim everything and
//!    redraw the selection with its overlays, flatten solid backgrounds.
//! 5. Stream tiles into the PNG encoder and embed the workflow.
//!
//! Degradations (tiling, transparency recovery, embedding) are reported as
//! [`Warning`]s on the output rather than as errors.

mod tiles;
mod warning;

use std::collections::HashSet;
use std::time::Duration;

use crate::config::{BackgroundMode, CaptureBackend, ExportFormat, ExportRequest};
use crate::encoding::{
    text_chunk, CancelToken, ChunkRecord, Progress, TileSource, TiledPngEncoder, WORKFLOW_KEYWORD,
};
use crate::error::{Error, Result};
use crate::geometry::{compute_bbox, plan_output, BoundingBox, OutputPlan};
use crate::overlay::media::DEFAULT_CAPTURE_TIMEOUT;
use crate::overlay::{
    fallback_overlays, resolve_overlays, DecodingResolver, MediaResolver, OverlayCompositor,
    OverlayElement,
};
use crate::raster::PixelBuffer;
use crate::rendering::{RenderOptions, SkiaTileRenderer, TextRasterizer, TileRenderer};
use crate::scene::{normalize, sanitize_workflow, NodeId, Scene, SceneSnapshot};
use crate::transparency::RecoveryError;

pub use warning::{Warning, Warnings};

use tiles::{paste, selection_overlays, ExportTileSource, LayerRenderer};

/// Host encoder for formats the crate does not write itself.
pub trait NativeEncoder {
    /// Encode a complete straight-alpha image as WebP.
    fn encode_webp(&self, pixels: &PixelBuffer) -> Result<Vec<u8>>;
}

/// Result of a successful export.
#[derive(Debug, Clone)]
pub struct ExportOutput {
    /// Encoded image
    pub bytes: Vec<u8>,
    /// Format actually written
    pub format: ExportFormat,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Degradations, in the order they happened
    pub warnings: Vec<Warning>,
}

impl ExportOutput {
    /// MIME type of [`ExportOutput::bytes`].
    pub fn mime(&self) -> &'static str {
        self.format.mime()
    }

    /// Warning codes as reported to the host.
    pub fn warning_codes(&self) -> Vec<&'static str> {
        self.warnings.iter().map(Warning::code).collect()
    }

    /// Whether `warning` was recorded.
    pub fn has_warning(&self, warning: Warning) -> bool {
        self.warnings.contains(&warning)
    }
}

/// Outcome of one render pass.
enum Pass {
    Done(Vec<u8>),
    RecoveryFailed(RecoveryError),
}

/// Renders and encodes workflow images.
pub struct Exporter {
    renderer: Box<dyn TileRenderer>,
    resolver: Box<dyn MediaResolver>,
    text: TextRasterizer,
    native: Option<Box<dyn NativeEncoder>>,
    capture_timeout: Duration,
    cancel: Option<CancelToken>,
    progress: Option<Box<dyn FnMut(Progress)>>,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Exporter {
    /// Exporter using the tiny-skia renderer and file/data-URI media.
    pub fn new() -> Self {
        Self {
            renderer: Box::new(SkiaTileRenderer::new()),
            resolver: Box::new(DecodingResolver::new()),
            text: TextRasterizer::new(),
            native: None,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            cancel: None,
            progress: None,
        }
    }

    /// Replace the tile renderer.
    pub fn with_renderer(mut self, renderer: impl TileRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    /// Replace the media resolver used by the overlay compositor.
    pub fn with_resolver(mut self, resolver: impl MediaResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Text rasterizer for overlay text.
    pub fn with_text(mut self, text: TextRasterizer) -> Self {
        self.text = text;
        self
    }

    /// Enable WebP output through a host encoder.
    pub fn with_native_encoder(mut self, encoder: impl NativeEncoder + 'static) -> Self {
        self.native = Some(Box::new(encoder));
        self
    }

    /// Per-capture timeout for media overlays.
    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Cancel token checked between tiles.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Called after every completed tile.
    pub fn with_progress(mut self, callback: impl FnMut(Progress) + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Export `snapshot` according to `request`.
    ///
    /// `overlays` are the host's DOM overlays in graph space; they are
    /// deduplicated before compositing.
    ///
    /// Capturing media overlays and node previews uses tokio timers and file
    /// reads, so the future must be driven inside a tokio runtime with time
    /// enabled. Exports without media can run on any executor.
    pub async fn export(
        &mut self,
        request: &ExportRequest,
        snapshot: &SceneSnapshot,
        overlays: Vec<OverlayElement>,
    ) -> Result<ExportOutput> {
        let mut request = request.clone().normalized();
        let mut warnings = Warnings::default();

        if request.backend == CaptureBackend::Node2 {
            return Err(Error::unsupported("node2"));
        }
        match request.format {
            ExportFormat::Svg => return Err(Error::unsupported("svg")),
            ExportFormat::Webp => {
                if request.embed_workflow {
                    warnings.push(Warning::EmbedFailed);
                    request.embed_workflow = false;
                }
                if self.native.is_none() {
                    warnings.push(Warning::FormatForcePng);
                    request.format = ExportFormat::Png;
                }
            },
            ExportFormat::Png => {},
        }

        let scene = normalize(snapshot)?;
        let bbox = export_bbox(&scene, &request)?;
        let plan = plan_output(&bbox, &request.sizing_policy());
        log::info!(
            "exporting {} node(s) as {}x{} {} (scale {:.3})",
            scene.nodes.len(),
            plan.width,
            plan.height,
            request.format.as_str(),
            plan.scale
        );
        if plan.downscaled {
            warnings.push(Warning::RenderDownscaled);
        }
        if plan.tiled {
            warnings.push(Warning::RenderTiled);
        }

        if request.background == BackgroundMode::Transparent
            && !self.renderer.capabilities().true_alpha
        {
            warnings.push(Warning::TransparentFailed);
        }

        let metadata = if request.embed_workflow && request.format == ExportFormat::Png {
            match sanitize_workflow(&snapshot.workflow)
                .and_then(|json| text_chunk(WORKFLOW_KEYWORD, &json))
            {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    log::warn!("workflow not embedded: {}", e);
                    warnings.push(Warning::EmbedFailed);
                    None
                },
            }
        } else {
            None
        };

        let overlays = if request.include_overlays {
            let mut resolved = resolve_overlays(overlays);
            let fallbacks = fallback_overlays(&scene, &resolved);
            resolved.extend(fallbacks);
            resolved
        } else {
            Vec::new()
        };

        let bytes = match self
            .render_pass(&request, &scene, &bbox, &plan, &overlays, metadata.as_ref())
            .await?
        {
            Pass::Done(bytes) => bytes,
            Pass::RecoveryFailed(reason) => {
                log::warn!("transparency recovery failed: {}", reason);
                warnings.push(Warning::TransparentRecoveryFailed);
                warnings.push(Warning::TransparentDegradedToSolid);
                request.background = BackgroundMode::Solid;
                match self
                    .render_pass(&request, &scene, &bbox, &plan, &overlays, metadata.as_ref())
                    .await?
                {
                    Pass::Done(bytes) => bytes,
                    Pass::RecoveryFailed(reason) => {
                        return Err(Error::Encode(format!("solid fallback failed: {}", reason)));
                    },
                }
            },
        };

        Ok(ExportOutput {
            bytes,
            format: request.format,
            width: plan.width,
            height: plan.height,
            warnings: warnings.into_vec(),
        })
    }

    async fn render_pass(
        &mut self,
        request: &ExportRequest,
        scene: &Scene,
        bbox: &BoundingBox,
        plan: &OutputPlan,
        overlays: &[OverlayElement],
        metadata: Option<&ChunkRecord>,
    ) -> Result<Pass> {
        let Exporter {
            renderer,
            resolver,
            text,
            native,
            capture_timeout,
            cancel,
            progress,
        } = self;

        let true_alpha = renderer.capabilities().true_alpha;
        let mut options = RenderOptions::from_request(request, plan.scale);
        if options.background == BackgroundMode::Solid && !true_alpha {
            options = options.with_backdrop(request.solid_color);
        }

        let layers = LayerRenderer::new(renderer.as_mut(), scene, *bbox, request.transparency);
        let mut source = ExportTileSource::new(layers, options, (plan.width, plan.height));
        if request.is_scoped() && request.scope_opacity < 100 {
            let selection: HashSet<NodeId> = request.selected_node_ids.iter().copied().collect();
            let selected_overlays = selection_overlays(scene, overlays, &selection);
            let opacity = request.scope_opacity as f32 / 100.0;
            source = source.with_spotlight(opacity, selected_overlays);
        }
        if request.include_overlays {
            let compositor = OverlayCompositor::new(resolver.as_ref(), text.clone())
                .with_timeout(*capture_timeout)
                .with_export_bounds(bbox.padded_rect());
            source = source.with_overlays(compositor, overlays);
        }

        let encoded = match (request.format, native.as_ref()) {
            (ExportFormat::Webp, Some(encoder)) => {
                let pixels = assemble(&mut source, plan, cancel.as_ref(), progress).await;
                pixels.and_then(|p| encoder.encode_webp(&p))
            },
            _ => {
                let tile_size = if plan.tiled {
                    plan.tile_size
                } else {
                    plan.width.max(plan.height)
                };
                let mut encoder = TiledPngEncoder::new(plan.width, plan.height)
                    .with_tile_size(tile_size)
                    .with_compression(request.png_compression);
                if let Some(chunk) = metadata {
                    encoder = encoder.with_metadata(chunk.clone());
                }
                if let Some(token) = cancel.as_ref() {
                    encoder = encoder.with_cancel(token.clone());
                }
                if let Some(callback) = progress.as_mut() {
                    encoder = encoder.with_progress(move |p| callback(p));
                }
                encoder.encode(&mut source).await
            },
        };

        match encoded {
            Ok(bytes) => Ok(Pass::Done(bytes)),
            Err(e) => match source.take_recovery_error() {
                Some(reason) => Ok(Pass::RecoveryFailed(reason)),
                None => Err(e),
            },
        }
    }
}

/// Bounding box of the exported content: the selection when scoped.
fn export_bbox(scene: &Scene, request: &ExportRequest) -> Result<BoundingBox> {
    let rects = if request.is_scoped() {
        let selection: HashSet<NodeId> = request.selected_node_ids.iter().copied().collect();
        let rects = scene.entity_rects(Some(&selection));
        if rects.iter().all(Option::is_none) {
            return Err(Error::NoBoundingBox(format!(
                "none of the {} selected node(s) has geometry",
                selection.len()
            )));
        }
        rects
    } else {
        scene.entity_rects(None)
    };
    Ok(compute_bbox(rects, request.padding as f32))
}

/// Render every tile into one buffer, for encoders that need the whole image.
async fn assemble(
    source: &mut ExportTileSource<'_>,
    plan: &OutputPlan,
    cancel: Option<&CancelToken>,
    progress: &mut Option<Box<dyn FnMut(Progress)>>,
) -> Result<PixelBuffer> {
    let rows = plan.tile_rows();
    let total: usize = rows.iter().map(Vec::len).sum();
    let mut out = PixelBuffer::new(plan.width, plan.height);
    let mut completed = 0;
    for tile in rows.iter().flatten() {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        let pixels = source.render_tile(*tile).await?;
        paste(&mut out, &pixels, tile.x, tile.y);
        completed += 1;
        if let Some(callback) = progress.as_mut() {
            callback(Progress { completed, total });
        }
    }
    Ok(out)
}

/// Install state owned by the host integration.
///
/// Installing is idempotent: a second [`ExporterHandle::install`] keeps the
/// first exporter.
#[derive(Default)]
pub struct ExporterHandle {
    exporter: Option<Exporter>,
}

impl ExporterHandle {
    /// An uninstalled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `exporter`. Returns `false` if one was already installed.
    pub fn install(&mut self, exporter: Exporter) -> bool {
        if self.exporter.is_some() {
            log::debug!("exporter already installed");
            return false;
        }
        self.exporter = Some(exporter);
        log::info!("exporter installed");
        true
    }

    /// Whether an exporter is installed.
    pub fn is_installed(&self) -> bool {
        self.exporter.is_some()
    }

    /// Remove and return the installed exporter.
    pub fn uninstall(&mut self) -> Option<Exporter> {
        self.exporter.take()
    }

    /// Export through the installed exporter.
    pub async fn export(
        &mut self,
        request: &ExportRequest,
        snapshot: &SceneSnapshot,
        overlays: Vec<OverlayElement>,
    ) -> Result<ExportOutput> {
        let exporter = self.exporter.as_mut().ok_or(Error::NotInstalled)?;
        exporter.export(request, snapshot, overlays).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> SceneSnapshot {
        SceneSnapshot::new(json!({
            "last_node_id": 2,
            "nodes": [
                {"id": 1, "type": "A", "pos": [0, 0], "size": [100, 60]},
                {"id": 2, "type": "B", "pos": [200, 0], "size": [100, 60]}
            ],
            "links": []
        }))
    }

    fn exporter() -> Exporter {
        Exporter::new()
            .with_renderer(SkiaTileRenderer::with_text(TextRasterizer::block_glyphs()))
            .with_text(TextRasterizer::block_glyphs())
    }

    #[tokio::test]
    async fn test_handle_requires_install() {
        let mut handle = ExporterHandle::new();
        assert!(!handle.is_installed());
        let err = handle
            .export(&ExportRequest::new(), &snapshot(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotInstalled));

        assert!(handle.install(exporter()));
        assert!(!handle.install(exporter()));
        assert!(handle.is_installed());
        assert!(handle.uninstall().is_some());
        assert!(!handle.is_installed());
    }

    #[tokio::test]
    async fn test_unsupported_targets() {
        let mut exporter = exporter();
        let svg = ExportRequest::new().with_format(ExportFormat::Svg);
        let err = exporter.export(&svg, &snapshot(), Vec::new()).await.unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_TARGET");

        let mut node2 = ExportRequest::new();
        node2.backend = CaptureBackend::Node2;
        let err = exporter.export(&node2, &snapshot(), Vec::new()).await.unwrap_err();
        assert!(format!("{}", err).contains("node2"));
    }

    #[tokio::test]
    async fn test_scoped_selection_without_geometry() {
        let mut exporter = exporter();
        let request = ExportRequest::new().with_selection(vec![99], 30);
        let err = exporter.export(&request, &snapshot(), Vec::new()).await.unwrap_err();
        assert_eq!(err.code(), "NO_BOUNDING_BOX");
    }

    #[tokio::test]
    async fn test_scoped_selection_crops_to_selected() {
        let mut exporter = exporter();
        let request = ExportRequest::new()
            .with_selection(vec![2], 30)
            .with_padding(10)
            .with_embed_workflow(false);
        let out = exporter.export(&request, &snapshot(), Vec::new()).await.unwrap();
        // node 2 is 100 wide and 60 + 30 (title) tall
        assert_eq!((out.width, out.height), (120, 110));
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_webp_without_native_encoder_falls_back() {
        let mut exporter = exporter();
        let request = ExportRequest::new().with_format(ExportFormat::Webp);
        let out = exporter.export(&request, &snapshot(), Vec::new()).await.unwrap();
        assert_eq!(out.format, ExportFormat::Png);
        assert_eq!(out.warning_codes(), vec!["embed:failed", "format:force-png"]);
        assert_eq!(&out.bytes[..4], &[0x89, b'P', b'N', b'G']);
    }

    struct RawEncoder;

    impl NativeEncoder for RawEncoder {
        fn encode_webp(&self, pixels: &PixelBuffer) -> Result<Vec<u8>> {
            Ok(pixels.data().to_vec())
        }
    }

    #[tokio::test]
    async fn test_webp_with_native_encoder_gets_full_image() {
        let mut exporter = exporter().with_native_encoder(RawEncoder);
        let request = ExportRequest::new()
            .with_format(ExportFormat::Webp)
            .with_embed_workflow(false)
            .with_padding(0)
            .with_tiling(64, 8)
            .with_max_long_edge(64, crate::config::ExceedMode::Tile);
        let out = exporter.export(&request, &snapshot(), Vec::new()).await.unwrap();
        assert_eq!(out.format, ExportFormat::Webp);
        assert_eq!(out.mime(), "image/webp");
        assert!(out.has_warning(Warning::RenderTiled));
        assert_eq!(out.bytes.len(), (out.width * out.height * 4) as usize);
    }
}
