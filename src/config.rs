//! Export settings and per-export request options.
//!
//! [`ExportSettings`] mirrors the user-facing preferences the host persists and
//! is parsed leniently: unknown or malformed values fall back to their defaults
//! instead of failing. [`ExportRequest`] is the fully resolved option set for a
//! single export.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geometry::SizingPolicy;
use crate::raster::Rgba;
use crate::transparency::TransparencyConfig;

/// Fallback colour for solid backgrounds and the host UI background.
pub const DEFAULT_SOLID_COLOR: Rgba = Rgba::rgb(0x1e, 0x1e, 0x1e);

/// Default solid colour offered in settings.
pub const DEFAULT_SETTINGS_SOLID_COLOR: Rgba = Rgba::rgb(0x1f, 0x1f, 0x1f);

/// Default edge of a render tile.
pub const DEFAULT_TILE_SIZE: u32 = 2048;

/// Default overlap rendered around each tile.
pub const DEFAULT_TILE_BLEED: u32 = 64;

/// Default dimming of unselected content when exporting a selection.
pub const DEFAULT_SCOPE_OPACITY: u8 = 30;

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// PNG through the tiled streaming encoder
    #[default]
    Png,
    /// WebP through the host's native encoder
    Webp,
    /// Vector output (always rejected)
    Svg,
}

impl ExportFormat {
    /// Lowercase name, also used as a file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Webp => "webp",
            ExportFormat::Svg => "svg",
        }
    }

    /// MIME type of the encoded output.
    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Webp => "image/webp",
            ExportFormat::Svg => "image/svg+xml",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "webp" => Some(ExportFormat::Webp),
            "svg" => Some(ExportFormat::Svg),
            _ => None,
        }
    }
}

/// How the canvas background is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMode {
    /// The editor's own background colour, with grid
    #[default]
    Ui,
    /// Fully transparent background
    Transparent,
    /// A flat user-chosen colour
    Solid,
}

impl BackgroundMode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ui" => Some(BackgroundMode::Ui),
            "transparent" => Some(BackgroundMode::Transparent),
            "solid" => Some(BackgroundMode::Solid),
            _ => None,
        }
    }
}

/// Output resolution preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputResolution {
    /// Same as 100%
    #[default]
    #[serde(rename = "auto")]
    Auto,
    /// One output pixel per graph unit
    #[serde(rename = "100%")]
    Full,
    /// Two output pixels per graph unit; never downscaled
    #[serde(rename = "200%")]
    Double,
}

impl OutputResolution {
    /// Multiplier applied to graph units.
    pub fn factor(self) -> f32 {
        match self {
            OutputResolution::Double => 2.0,
            OutputResolution::Auto | OutputResolution::Full => 1.0,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(OutputResolution::Auto),
            "100%" => Some(OutputResolution::Full),
            "200%" => Some(OutputResolution::Double),
            _ => None,
        }
    }
}

/// Behaviour when the output exceeds the long-edge limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceedMode {
    /// Reduce the scale until the long edge fits
    Downscale,
    /// Keep the scale and render in tiles
    #[default]
    Tile,
}

impl ExceedMode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "downscale" => Some(ExceedMode::Downscale),
            "tile" => Some(ExceedMode::Tile),
            _ => None,
        }
    }
}

/// Which nodes (or links) a render pass draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFilter {
    /// Everything
    #[default]
    All,
    /// Only selected entities
    Selected,
    /// Only unselected entities
    Unselected,
    /// Nothing
    None,
}

/// Host capture backend the export was requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Classic canvas editor
    #[default]
    Legacy,
    /// DOM-based editor (unsupported)
    Node2,
}

/// Persisted user preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportSettings {
    /// Default output format
    pub format: ExportFormat,
    /// Embed the workflow JSON into PNG output
    pub embed_workflow: bool,
    /// Background mode
    pub background: BackgroundMode,
    /// Colour used by [`BackgroundMode::Solid`]
    pub solid_color: Rgba,
    /// Node body opacity, 0-100
    pub node_opacity: u8,
    /// Padding around the content in graph units
    pub padding: u32,
    /// Resolution preset
    pub output_resolution: OutputResolution,
    /// Long-edge limit in pixels; 0 disables it
    pub max_long_edge: u32,
    /// What to do when the limit is exceeded
    pub exceed_mode: ExceedMode,
    /// PNG compression level, 0-9
    pub png_compression: u8,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportSettings {
    /// Settings with the stock defaults.
    pub fn new() -> Self {
        Self {
            format: ExportFormat::Png,
            embed_workflow: true,
            background: BackgroundMode::Ui,
            solid_color: DEFAULT_SETTINGS_SOLID_COLOR,
            node_opacity: 100,
            padding: 100,
            output_resolution: OutputResolution::Auto,
            max_long_edge: 4096,
            exceed_mode: ExceedMode::Tile,
            png_compression: 7,
        }
    }

    /// Parse settings from loosely typed JSON.
    ///
    /// Each field is read independently; anything missing or malformed keeps its
    /// default. Numbers may be given as strings.
    pub fn from_value(raw: &Value) -> Self {
        let mut settings = Self::new();
        let get = |key: &str| raw.get(key);

        if let Some(v) = get("format").and_then(Value::as_str).and_then(ExportFormat::parse) {
            settings.format = v;
        }
        if let Some(v) = get("embedWorkflow") {
            settings.embed_workflow = truthy(v);
        }
        if let Some(v) = get("background").and_then(Value::as_str).and_then(BackgroundMode::parse)
        {
            settings.background = v;
        }
        if let Some(v) = get("solidColor").and_then(Value::as_str).and_then(Rgba::parse) {
            settings.solid_color = v;
        }
        if let Some(v) = get("nodeOpacity").and_then(non_negative_int) {
            settings.node_opacity = v.min(100) as u8;
        }
        if let Some(v) = get("padding").and_then(non_negative_int) {
            settings.padding = v.min(u32::MAX as u64) as u32;
        }
        if let Some(v) = get("outputResolution")
            .and_then(Value::as_str)
            .and_then(OutputResolution::parse)
        {
            settings.output_resolution = v;
        }
        if let Some(v) = get("maxLongEdge").and_then(non_negative_int) {
            settings.max_long_edge = v.min(u32::MAX as u64) as u32;
        }
        if let Some(v) = get("exceedMode").and_then(Value::as_str).and_then(ExceedMode::parse) {
            settings.exceed_mode = v;
        }
        if let Some(v) = get("pngCompression").and_then(any_int) {
            settings.png_compression = v.clamp(0, 9) as u8;
        }
        settings
    }

    /// Build a request from these settings.
    pub fn to_request(&self) -> ExportRequest {
        ExportRequest {
            format: self.format,
            embed_workflow: self.embed_workflow,
            background: self.background,
            solid_color: self.solid_color,
            node_opacity: self.node_opacity,
            padding: self.padding,
            output_resolution: self.output_resolution,
            max_long_edge: self.max_long_edge,
            exceed_mode: self.exceed_mode,
            png_compression: self.png_compression,
            ..ExportRequest::default()
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn any_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .enumerate()
                .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
                .map(|(_, c)| c)
                .collect();
            digits.parse().ok()
        },
        _ => None,
    }
}

fn non_negative_int(v: &Value) -> Option<u64> {
    any_int(v).filter(|n| *n >= 0).map(|n| n as u64)
}

/// Fully resolved options for one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportRequest {
    /// Output format
    pub format: ExportFormat,
    /// Embed the workflow JSON (PNG only)
    pub embed_workflow: bool,
    /// Background mode
    pub background: BackgroundMode,
    /// Colour used by [`BackgroundMode::Solid`] and when transparency degrades
    pub solid_color: Rgba,
    /// Editor background colour used by [`BackgroundMode::Ui`]
    pub ui_background: Rgba,
    /// Node body opacity, 0-100
    pub node_opacity: u8,
    /// Padding around the content in graph units
    pub padding: u32,
    /// Resolution preset
    pub output_resolution: OutputResolution,
    /// Device-pixel ratio of the host display
    pub device_pixel_ratio: f32,
    /// Long-edge limit in pixels; 0 disables it
    pub max_long_edge: u32,
    /// What to do when the limit is exceeded
    pub exceed_mode: ExceedMode,
    /// PNG compression level, 0-9 (0 writes stored blocks)
    pub png_compression: u8,
    /// Crop to the selection and dim everything else
    pub scope_selected: bool,
    /// Opacity of unselected content when scoped, 0-100
    pub scope_opacity: u8,
    /// Selected node ids
    pub selected_node_ids: Vec<i64>,
    /// Draw the background grid
    pub include_grid: bool,
    /// Composite DOM overlays (text editors, images, videos)
    pub include_overlays: bool,
    /// Edge of a render tile
    pub tile_size: u32,
    /// Overlap rendered around each tile
    pub tile_bleed: u32,
    /// Backend the request came from
    pub backend: CaptureBackend,
    /// Opaque backgrounds used to recover transparency
    pub transparency: TransparencyConfig,
}

impl Default for ExportRequest {
    fn default() -> Self {
        Self {
            format: ExportFormat::Png,
            embed_workflow: true,
            background: BackgroundMode::Ui,
            solid_color: DEFAULT_SETTINGS_SOLID_COLOR,
            ui_background: DEFAULT_SOLID_COLOR,
            node_opacity: 100,
            padding: 100,
            output_resolution: OutputResolution::Auto,
            device_pixel_ratio: 1.0,
            max_long_edge: 4096,
            exceed_mode: ExceedMode::Tile,
            png_compression: 7,
            scope_selected: false,
            scope_opacity: DEFAULT_SCOPE_OPACITY,
            selected_node_ids: Vec::new(),
            include_grid: true,
            include_overlays: true,
            tile_size: DEFAULT_TILE_SIZE,
            tile_bleed: DEFAULT_TILE_BLEED,
            backend: CaptureBackend::Legacy,
            transparency: TransparencyConfig::default(),
        }
    }
}

impl ExportRequest {
    /// Request with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output format.
    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the background mode.
    pub fn with_background(mut self, background: BackgroundMode) -> Self {
        self.background = background;
        self
    }

    /// Use a solid background of the given colour.
    pub fn with_solid_background(mut self, color: Rgba) -> Self {
        self.background = BackgroundMode::Solid;
        self.solid_color = color;
        self
    }

    /// Set the padding in graph units.
    pub fn with_padding(mut self, padding: u32) -> Self {
        self.padding = padding;
        self
    }

    /// Set the PNG compression level (clamped to 0-9).
    pub fn with_compression(mut self, level: u8) -> Self {
        self.png_compression = level.min(9);
        self
    }

    /// Enable or disable workflow embedding.
    pub fn with_embed_workflow(mut self, embed: bool) -> Self {
        self.embed_workflow = embed;
        self
    }

    /// Set the long-edge limit and the behaviour when it is exceeded.
    pub fn with_max_long_edge(mut self, limit: u32, mode: ExceedMode) -> Self {
        self.max_long_edge = limit;
        self.exceed_mode = mode;
        self
    }

    /// Set the tile size and bleed.
    pub fn with_tiling(mut self, tile_size: u32, bleed: u32) -> Self {
        self.tile_size = tile_size;
        self.tile_bleed = bleed;
        self
    }

    /// Export only the given nodes, dimming the rest to `opacity` percent.
    pub fn with_selection(mut self, ids: Vec<i64>, opacity: u8) -> Self {
        self.scope_selected = true;
        self.selected_node_ids = ids;
        self.scope_opacity = opacity.min(100);
        self
    }

    /// Set node body opacity (clamped to 0-100).
    pub fn with_node_opacity(mut self, opacity: u8) -> Self {
        self.node_opacity = opacity.min(100);
        self
    }

    /// Enable or disable the background grid.
    pub fn with_grid(mut self, include: bool) -> Self {
        self.include_grid = include;
        self
    }

    /// Clamp out-of-range values.
    pub fn normalized(mut self) -> Self {
        self.png_compression = self.png_compression.min(9);
        self.node_opacity = self.node_opacity.min(100);
        self.scope_opacity = self.scope_opacity.min(100);
        self.tile_size = self.tile_size.clamp(1, crate::geometry::MAX_SURFACE_EDGE);
        if !(self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0) {
            self.device_pixel_ratio = 1.0;
        }
        self
    }

    /// Whether selection scoping applies (requested and something is selected).
    pub fn is_scoped(&self) -> bool {
        self.scope_selected && !self.selected_node_ids.is_empty()
    }

    /// Output sizing derived from the resolution, limit and tiling options.
    pub fn sizing_policy(&self) -> SizingPolicy {
        SizingPolicy {
            scale: self.output_resolution.factor() * self.device_pixel_ratio,
            max_long_edge: (self.max_long_edge > 0).then_some(self.max_long_edge),
            exceed_mode: self.exceed_mode,
            downscale_exempt: self.output_resolution == OutputResolution::Double,
            tile_size: self.tile_size,
        }
    }
}
