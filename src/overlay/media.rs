//! Media capture for image and video overlays.
//!
//! Captures are asynchronous and bounded by a timeout; a capture that fails or
//! runs late only costs that one overlay.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures::future::LocalBoxFuture;
use futures::FutureExt;

use super::MediaSource;
use crate::raster::PixelBuffer;

/// Default bound on a single capture.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(1200);

/// Why a capture produced no frame.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    /// The capture did not finish in time
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    /// A video has no decodable frame yet
    #[error("no frame ready")]
    NotReady,

    /// The file does not exist below the media root
    #[error("media not found: {0}")]
    NotFound(String),

    /// The bytes are not a supported image
    #[error("decode failed: {0}")]
    Decode(String),

    /// The source cannot be handled by this resolver
    #[error("unsupported media source: {0}")]
    Unsupported(String),

    /// Reading the file failed
    #[error("IO error: {0}")]
    Io(String),
}

/// A decoded still frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame(Arc<PixelBuffer>);

impl Frame {
    /// Wrap decoded pixels.
    pub fn new(pixels: PixelBuffer) -> Self {
        Self(Arc::new(pixels))
    }

    /// Pixels of the frame.
    pub fn pixels(&self) -> &PixelBuffer {
        &self.0
    }

    /// Frame width.
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    /// Frame height.
    pub fn height(&self) -> u32 {
        self.0.height()
    }
}

/// Turns a [`MediaSource`] into pixels.
pub trait MediaResolver {
    /// Resolve one source.
    fn resolve<'a>(
        &'a self,
        source: &'a MediaSource,
    ) -> LocalBoxFuture<'a, Result<Frame, CaptureError>>;
}

/// Resolver decoding bytes, `data:` URIs and files with the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct DecodingResolver {
    media_root: Option<PathBuf>,
}

impl DecodingResolver {
    /// Resolver without a media root; relative files resolve against the
    /// working directory and node previews are unavailable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory holding `input/`, `output/` and `temp/`.
    pub fn with_media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.media_root = Some(root.into());
        self
    }

    fn path_for(&self, relative: &Path) -> PathBuf {
        match &self.media_root {
            Some(root) if relative.is_relative() => root.join(relative),
            _ => relative.to_path_buf(),
        }
    }

    async fn read_file(&self, path: PathBuf) -> Result<Frame, CaptureError> {
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CaptureError::NotFound(path.display().to_string()),
            _ => CaptureError::Io(e.to_string()),
        })?;
        decode_image(&bytes)
    }
}

impl MediaResolver for DecodingResolver {
    fn resolve<'a>(
        &'a self,
        source: &'a MediaSource,
    ) -> LocalBoxFuture<'a, Result<Frame, CaptureError>> {
        async move {
            match source {
                MediaSource::Bytes(bytes) => decode_image(bytes),
                MediaSource::DataUri(uri) => decode_image(&decode_data_uri(uri)?),
                MediaSource::File(path) => self.read_file(self.path_for(path)).await,
                MediaSource::Media(media) => {
                    if self.media_root.is_none() {
                        return Err(CaptureError::Unsupported(format!(
                            "no media root for {}",
                            media.filename
                        )));
                    }
                    self.read_file(self.path_for(&media.relative_path())).await
                },
            }
        }
        .boxed_local()
    }
}

/// Decode the first frame of an encoded image.
pub fn decode_image(bytes: &[u8]) -> Result<Frame, CaptureError> {
    let image = image::load_from_memory(bytes).map_err(|e| CaptureError::Decode(e.to_string()))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let pixels = PixelBuffer::from_raw(width, height, rgba.into_raw())
        .map_err(|e| CaptureError::Decode(e.to_string()))?;
    Ok(Frame::new(pixels))
}

/// Payload of a base64 `data:` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, CaptureError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| CaptureError::Unsupported("not a data URI".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| CaptureError::Decode("data URI without payload".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(CaptureError::Unsupported(format!("data URI encoding {:?}", meta)));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| CaptureError::Decode(e.to_string()))
}

/// Timed, cached captures for one export.
pub struct MediaCapture<'r> {
    resolver: &'r dyn MediaResolver,
    timeout: Duration,
    cache: HashMap<String, Result<Frame, CaptureError>>,
}

impl<'r> MediaCapture<'r> {
    /// Wrap a resolver with the default timeout.
    pub fn new(resolver: &'r dyn MediaResolver) -> Self {
        Self {
            resolver,
            timeout: DEFAULT_CAPTURE_TIMEOUT,
            cache: HashMap::new(),
        }
    }

    /// Change the per-capture timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Capture `source`, reusing an earlier result for the same key.
    pub async fn capture(&mut self, source: &MediaSource) -> Result<Frame, CaptureError> {
        let key = source.key();
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        let result = match tokio::time::timeout(self.timeout, self.resolver.resolve(source)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout(self.timeout)),
        };
        if let Err(e) = &result {
            log::debug!("capture of {} failed: {}", key, e);
        }
        self.cache.insert(key, result.clone());
        result
    }

    /// Current video frame, else the poster.
    pub async fn capture_video(
        &mut self,
        frame: Option<&MediaSource>,
        poster: Option<&MediaSource>,
    ) -> Result<Frame, CaptureError> {
        let first = match frame {
            Some(source) => self.capture(source).await,
            None => Err(CaptureError::NotReady),
        };
        match (first, poster) {
            (Ok(frame), _) => Ok(frame),
            (Err(e), Some(poster)) => {
                log::debug!("video frame unavailable ({}), using poster", e);
                self.capture(poster).await
            },
            (Err(e), None) => Err(e),
        }
    }

    /// Number of distinct sources captured so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Rgba;
    use std::cell::Cell;

    fn png_bytes() -> Vec<u8> {
        let buffer = PixelBuffer::filled(3, 2, Rgba::rgb(10, 200, 30));
        crate::encoding::encode_buffer(&buffer, 6).unwrap()
    }

    struct SlowResolver;

    impl MediaResolver for SlowResolver {
        fn resolve<'a>(
            &'a self,
            _source: &'a MediaSource,
        ) -> LocalBoxFuture<'a, Result<Frame, CaptureError>> {
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Err(CaptureError::NotReady)
            }
            .boxed_local()
        }
    }

    struct CountingResolver(Cell<usize>);

    impl MediaResolver for CountingResolver {
        fn resolve<'a>(
            &'a self,
            _source: &'a MediaSource,
        ) -> LocalBoxFuture<'a, Result<Frame, CaptureError>> {
            self.0.set(self.0.get() + 1);
            async { Ok(Frame::new(PixelBuffer::new(1, 1))) }.boxed_local()
        }
    }

    #[test]
    fn test_decode_image() {
        let frame = decode_image(&png_bytes()).unwrap();
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert_eq!(frame.pixels().pixel(0, 0), Some(Rgba::rgb(10, 200, 30)));
        assert!(matches!(decode_image(b"nope"), Err(CaptureError::Decode(_))));
    }

    #[test]
    fn test_data_uri() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes());
        let uri = format!("data:image/png;base64,{}", encoded);
        assert_eq!(decode_data_uri(&uri).unwrap(), png_bytes());
        assert!(decode_data_uri("data:text/plain,hello").is_err());
        assert!(decode_data_uri("https://example.com/a.png").is_err());
    }

    #[tokio::test]
    async fn test_resolver_reads_media_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("input/sub")).unwrap();
        std::fs::write(dir.path().join("input/sub/cat.png"), png_bytes()).unwrap();

        let resolver = DecodingResolver::new().with_media_root(dir.path());
        let media = crate::scene::MediaRef {
            filename: "cat.png".to_string(),
            subfolder: Some("sub".to_string()),
            folder: "input".to_string(),
            kind: crate::scene::MediaKind::Image,
        };
        let frame = resolver.resolve(&MediaSource::Media(media)).await.unwrap();
        assert_eq!(frame.width(), 3);

        let missing = resolver
            .resolve(&MediaSource::File("input/missing.png".into()))
            .await;
        assert!(matches!(missing, Err(CaptureError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_times_out() {
        let resolver = SlowResolver;
        let mut capture = MediaCapture::new(&resolver);
        let result = capture.capture(&MediaSource::File("a.png".into())).await;
        assert!(matches!(result, Err(CaptureError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_capture_caches_by_key() {
        let resolver = CountingResolver(Cell::new(0));
        let mut capture = MediaCapture::new(&resolver);
        let source = MediaSource::File("a.png".into());
        capture.capture(&source).await.unwrap();
        capture.capture(&source).await.unwrap();
        assert_eq!(resolver.0.get(), 1);
        assert_eq!(capture.cached(), 1);
    }

    #[tokio::test]
    async fn test_video_falls_back_to_poster() {
        let resolver = DecodingResolver::new();
        let mut capture = MediaCapture::new(&resolver);
        let poster = MediaSource::Bytes(Arc::new(png_bytes()));
        let frame = capture
            .capture_video(Some(&MediaSource::Bytes(Arc::new(b"not a frame".to_vec()))), Some(&poster))
            .await
            .unwrap();
        assert_eq!(frame.height(), 2);

        let none = capture.capture_video(None, None).await;
        assert!(matches!(none, Err(CaptureError::NotReady)));
    }
}
