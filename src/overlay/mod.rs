//! DOM overlay model and compositing.
//!
//! The host editor draws some content outside its canvas: text editors,
//! rendered markdown, image and video previews. Those elements are captured
//! as [`OverlayElement`]s in graph coordinates and painted onto each tile
//! after the canvas render.

mod compositor;
pub mod media;

use std::path::PathBuf;
use std::sync::Arc;

use crate::geometry::Rect;
use crate::raster::Rgba;
use crate::scene::{MediaRef, NodeId};

pub use compositor::{fallback_overlays, OverlayCompositor};
pub use media::{CaptureError, DecodingResolver, Frame, MediaCapture, MediaResolver};

/// What an overlay shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    /// Text editor or rendered text
    Text,
    /// Image or canvas
    Image,
    /// Video
    Video,
}

/// Where an overlay came from, in increasing authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OverlaySource {
    /// Any other element
    #[default]
    Plain,
    /// Rendered preview (markdown output and similar)
    RenderedPreview,
    /// The raw editor
    Editor,
}

/// Where media pixels come from.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// Encoded image bytes
    Bytes(Arc<Vec<u8>>),
    /// `data:` URI
    DataUri(String),
    /// File path, relative paths resolved against the media root
    File(PathBuf),
    /// A node's preview reference
    Media(MediaRef),
}

impl MediaSource {
    /// Cache key identifying the media.
    pub fn key(&self) -> String {
        use std::hash::{Hash, Hasher};

        match self {
            MediaSource::Bytes(bytes) => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                bytes.hash(&mut hasher);
                format!("bytes:{}:{:016x}", bytes.len(), hasher.finish())
            },
            MediaSource::DataUri(uri) => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                uri.hash(&mut hasher);
                format!("data:{:016x}", hasher.finish())
            },
            MediaSource::File(path) => format!("file:{}", path.display()),
            MediaSource::Media(media) => format!("media:{}", media.relative_path().display()),
        }
    }
}

/// Text appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    /// Font size in graph units
    pub font_size: f32,
    /// Line height as a multiple of the font size
    pub line_height: f32,
    /// Text colour
    pub color: Rgba,
    /// Fill behind the text
    pub background: Option<Rgba>,
    /// Inner padding in graph units
    pub padding: f32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: 14.0,
            line_height: 1.2,
            color: Rgba::rgb(0xdd, 0xdd, 0xdd),
            background: None,
            padding: 4.0,
        }
    }
}

impl TextStyle {
    /// Style used when drawing stored widget text with no live editor.
    pub fn widget_fallback() -> Self {
        Self {
            font_size: 12.0,
            background: Some(Rgba::rgb(0x22, 0x22, 0x22)),
            ..Self::default()
        }
    }
}

/// How an image fills its rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitMode {
    /// Stretch to the rectangle
    #[default]
    Fill,
    /// Largest centred rectangle with the image's aspect ratio
    Contain,
}

/// Overlay payload.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayContent {
    /// Text with its style
    Text {
        /// The text
        text: String,
        /// Appearance
        style: TextStyle,
    },
    /// Still image
    Image {
        /// Pixels
        source: MediaSource,
        /// Fit
        fit: FitMode,
    },
    /// Video; the current frame, else the poster
    Video {
        /// Current frame
        frame: Option<MediaSource>,
        /// Poster image
        poster: Option<MediaSource>,
        /// Fit
        fit: FitMode,
    },
}

/// One captured overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayElement {
    /// Graph-space rectangle
    pub graph_rect: Rect,
    /// Payload
    pub content: OverlayContent,
    /// Owning node, if known
    pub node_id: Option<NodeId>,
    /// Origin, used to pick between duplicates
    pub source: OverlaySource,
}

impl OverlayElement {
    /// Text overlay with the default style.
    pub fn text(graph_rect: Rect, text: impl Into<String>) -> Self {
        Self {
            graph_rect,
            content: OverlayContent::Text {
                text: text.into(),
                style: TextStyle::default(),
            },
            node_id: None,
            source: OverlaySource::Plain,
        }
    }

    /// Stretched image overlay.
    pub fn image(graph_rect: Rect, source: MediaSource) -> Self {
        Self {
            graph_rect,
            content: OverlayContent::Image {
                source,
                fit: FitMode::Fill,
            },
            node_id: None,
            source: OverlaySource::Plain,
        }
    }

    /// Video overlay.
    pub fn video(
        graph_rect: Rect,
        frame: Option<MediaSource>,
        poster: Option<MediaSource>,
    ) -> Self {
        Self {
            graph_rect,
            content: OverlayContent::Video {
                frame,
                poster,
                fit: FitMode::Contain,
            },
            node_id: None,
            source: OverlaySource::Plain,
        }
    }

    /// Attach to a node.
    pub fn with_node(mut self, id: NodeId) -> Self {
        self.node_id = Some(id);
        self
    }

    /// Set the origin.
    pub fn with_source(mut self, source: OverlaySource) -> Self {
        self.source = source;
        self
    }

    /// Replace the text style (text overlays only).
    pub fn with_style(mut self, new_style: TextStyle) -> Self {
        if let OverlayContent::Text { style, .. } = &mut self.content {
            *style = new_style;
        }
        self
    }

    /// Change the fit (image and video overlays only).
    pub fn with_fit(mut self, new_fit: FitMode) -> Self {
        match &mut self.content {
            OverlayContent::Image { fit, .. } | OverlayContent::Video { fit, .. } => *fit = new_fit,
            OverlayContent::Text { .. } => {},
        }
        self
    }

    /// Kind of overlay.
    pub fn kind(&self) -> OverlayKind {
        match self.content {
            OverlayContent::Text { .. } => OverlayKind::Text,
            OverlayContent::Image { .. } => OverlayKind::Image,
            OverlayContent::Video { .. } => OverlayKind::Video,
        }
    }

    fn is_media(&self) -> bool {
        self.kind() != OverlayKind::Text
    }

    /// Whether both describe the same on-screen thing.
    fn same_target(&self, other: &OverlayElement) -> bool {
        if self.is_media() != other.is_media() {
            return false;
        }
        let same_node = self.node_id.is_some() && self.node_id == other.node_id;
        same_node || self.graph_rect.approx_eq(&other.graph_rect, 1.0)
    }
}

/// Drop duplicate representations of the same content.
///
/// For each node (or identical bounds) only overlays of the highest
/// [`OverlaySource`] survive; exact duplicates keep the first occurrence.
/// Text and media never displace each other.
pub fn resolve_overlays(elements: Vec<OverlayElement>) -> Vec<OverlayElement> {
    let keep: Vec<bool> = elements
        .iter()
        .enumerate()
        .map(|(i, e)| {
            !elements.iter().enumerate().any(|(j, f)| {
                j != i
                    && e.same_target(f)
                    && (f.source > e.source
                        || (f.source == e.source
                            && j < i
                            && e.graph_rect.approx_eq(&f.graph_rect, 1.0)))
            })
        })
        .collect();
    let before = elements.len();
    let kept: Vec<OverlayElement> = elements
        .into_iter()
        .zip(keep)
        .filter_map(|(e, k)| k.then_some(e))
        .collect();
    if kept.len() != before {
        log::debug!("dropped {} duplicate overlays", before - kept.len());
    }
    kept
}
