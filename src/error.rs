//! Error types for the export pipeline.
//!
//! Fatal configuration problems abort an export and surface here. Content-level
//! failures (a single overlay, one media capture) are logged and skipped by the
//! compositor and never reach this type; degradations become [`crate::export::Warning`]s.

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while exporting a workflow image.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The scene produced no usable bounding box
    #[error("No bounding box could be computed: {0}")]
    NoBoundingBox(String),

    /// An offscreen surface of the requested size could not be allocated
    #[error("Failed to allocate {width}x{height} render surface")]
    SurfaceUnavailable {
        /// Requested surface width in pixels
        width: u32,
        /// Requested surface height in pixels
        height: u32,
    },

    /// The workflow snapshot could not be normalized into a scene
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// Export options are inconsistent or out of range
    #[error("Invalid export options: {0}")]
    InvalidOptions(String),

    /// The export target (format or capture backend) is not supported
    #[error("Unsupported export target: {target}")]
    UnsupportedTarget {
        /// Name of the rejected target
        target: String,
    },

    /// A tile failed to render or had the wrong dimensions
    #[error("Tile at ({x}, {y}) failed: {reason}")]
    TileRender {
        /// Tile x offset in output pixels
        x: u32,
        /// Tile y offset in output pixels
        y: u32,
        /// Reason for the failure
        reason: String,
    },

    /// PNG container or compression stream error
    #[error("Encoding error: {0}")]
    Encode(String),

    /// Media decoding error
    #[error("Image error: {0}")]
    Image(String),

    /// The export was cancelled between tiles
    #[error("Export cancelled")]
    Cancelled,

    /// `export` was called on a handle that was never installed
    #[error("Exporter is not installed")]
    NotInstalled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code for callers that branch on error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NoBoundingBox(_) => "NO_BOUNDING_BOX",
            Error::SurfaceUnavailable { .. } => "SURFACE_UNAVAILABLE",
            Error::InvalidScene(_) => "INVALID_SCENE",
            Error::InvalidOptions(_) => "INVALID_OPTIONS",
            Error::UnsupportedTarget { .. } => "UNSUPPORTED_TARGET",
            Error::TileRender { .. } => "TILE_RENDER_FAILED",
            Error::Encode(_) => "ENCODE_FAILED",
            Error::Image(_) => "IMAGE_FAILED",
            Error::Cancelled => "CANCELLED",
            Error::NotInstalled => "NOT_INSTALLED",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
        }
    }

    /// Shorthand for an unsupported-target error.
    pub fn unsupported(target: impl Into<String>) -> Self {
        Error::UnsupportedTarget {
            target: target.into(),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}
