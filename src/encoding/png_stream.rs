//! Tiled streaming PNG encoder.
//!
//! The encoder pulls tiles from a [`TileSource`] one tile row at a time. A
//! scanline is only complete once every tile in its row exists, so the row's
//! tiles are held until the last one arrives; then each scanline (filter byte
//! `0` followed by the column-concatenated pixels) is pushed into the
//! compression stream and the tiles are dropped. All compressed output lands in
//! a single `IDAT` chunk.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use futures::future::LocalBoxFuture;

use super::chunk::{iend, ihdr, ChunkRecord, PNG_SIGNATURE};
use super::stored_deflate::StoredDeflateWriter;
use crate::error::{Error, Result};
use crate::geometry::{plan_tiles, TileSpec};
use crate::raster::PixelBuffer;

/// Produces the pixels of one output tile.
pub trait TileSource {
    /// Render `tile`. The returned buffer must be exactly `tile.width x tile.height`.
    fn render_tile(&mut self, tile: TileSpec) -> LocalBoxFuture<'_, Result<PixelBuffer>>;
}

/// Adapts a synchronous `(x, y, w, h) -> PixelBuffer` closure into a [`TileSource`].
pub struct FnTileSource<F>(pub F);

impl<F> TileSource for FnTileSource<F>
where
    F: FnMut(u32, u32, u32, u32) -> Result<PixelBuffer>,
{
    fn render_tile(&mut self, tile: TileSpec) -> LocalBoxFuture<'_, Result<PixelBuffer>> {
        let result = (self.0)(tile.x, tile.y, tile.width, tile.height);
        Box::pin(async move { result })
    }
}

/// Encoder progress after a completed tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Tiles finished so far
    pub completed: usize,
    /// Tiles in the whole export
    pub total: usize,
}

impl Progress {
    /// Fraction complete, 0.0 to 1.0.
    pub fn value(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f32 / self.total as f32
        }
    }

    /// Whole percent complete, 0 to 100.
    pub fn percent(&self) -> u32 {
        (self.value() * 100.0).round() as u32
    }
}

/// Shared flag checked between tiles.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect before the next tile starts.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// zlib stream feeding the IDAT payload.
enum IdatStream {
    Stored(StoredDeflateWriter<Vec<u8>>),
    Zlib(ZlibEncoder<Vec<u8>>),
}

impl IdatStream {
    fn new(level: u8, capacity_hint: usize) -> Self {
        let buf = Vec::with_capacity(capacity_hint);
        if level == 0 {
            IdatStream::Stored(StoredDeflateWriter::new(buf))
        } else {
            IdatStream::Zlib(ZlibEncoder::new(buf, Compression::new(level.min(9) as u32)))
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            IdatStream::Stored(w) => w.write_all(bytes)?,
            IdatStream::Zlib(w) => w.write_all(bytes)?,
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>> {
        let bytes = match self {
            IdatStream::Stored(w) => w.finish()?,
            IdatStream::Zlib(w) => w.finish()?,
        };
        Ok(bytes)
    }
}

/// Streaming PNG encoder for rasters larger than a single render surface.
pub struct TiledPngEncoder<'a> {
    width: u32,
    height: u32,
    tile_size: u32,
    compression: u8,
    metadata: Vec<ChunkRecord>,
    progress: Option<Box<dyn FnMut(Progress) + 'a>>,
    cancel: Option<CancelToken>,
}

impl<'a> TiledPngEncoder<'a> {
    /// Encoder for a `width x height` image with 2048px tiles at level 6.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile_size: 2048,
            compression: 6,
            metadata: Vec::new(),
            progress: None,
            cancel: None,
        }
    }

    /// Set the tile edge.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    /// Set the compression level (0 = stored blocks, 1-9 = zlib).
    pub fn with_compression(mut self, level: u8) -> Self {
        self.compression = level.min(9);
        self
    }

    /// Append a metadata chunk, written after `IDAT` and before `IEND`.
    pub fn with_metadata(mut self, chunk: ChunkRecord) -> Self {
        self.metadata.push(chunk);
        self
    }

    /// Receive a progress update after every tile.
    pub fn with_progress(mut self, callback: impl FnMut(Progress) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Check `token` before each tile.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Render every tile through `source` and return the complete PNG.
    ///
    /// Any tile failure aborts the encode; no partial output is returned.
    pub async fn encode<S>(mut self, source: &mut S) -> Result<Vec<u8>>
    where
        S: TileSource + ?Sized,
    {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidOptions(format!(
                "cannot encode a {}x{} image",
                self.width, self.height
            )));
        }

        let rows = plan_tiles(self.width, self.height, self.tile_size);
        let total: usize = rows.iter().map(Vec::len).sum();
        let mut completed = 0usize;
        log::debug!(
            "encoding {}x{} PNG in {} tile(s), compression {}",
            self.width,
            self.height,
            total,
            self.compression
        );

        let mut stream = IdatStream::new(self.compression, self.raw_size_hint());
        let mut scanline = Vec::with_capacity(1 + self.width as usize * 4);

        for row in &rows {
            let mut buffers = Vec::with_capacity(row.len());
            for tile in row {
                if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                    log::info!("export cancelled before tile ({}, {})", tile.x, tile.y);
                    return Err(Error::Cancelled);
                }

                let buffer = source.render_tile(*tile).await.map_err(|e| match e {
                    Error::TileRender { .. } | Error::Cancelled => e,
                    other => Error::TileRender {
                        x: tile.x,
                        y: tile.y,
                        reason: other.to_string(),
                    },
                })?;
                if buffer.width() != tile.width || buffer.height() != tile.height {
                    return Err(Error::TileRender {
                        x: tile.x,
                        y: tile.y,
                        reason: format!(
                            "expected {}x{} pixels, got {}x{}",
                            tile.width,
                            tile.height,
                            buffer.width(),
                            buffer.height()
                        ),
                    });
                }
                buffers.push(buffer);

                completed += 1;
                if let Some(callback) = self.progress.as_mut() {
                    callback(Progress { completed, total });
                }
            }

            let row_height = row.first().map_or(0, |t| t.height);
            for y in 0..row_height {
                scanline.clear();
                scanline.push(0); // filter: None
                for buffer in &buffers {
                    scanline.extend_from_slice(buffer.row(y));
                }
                stream.write_all(&scanline)?;
            }
        }

        let idat = stream.finish()?;
        self.assemble(idat)
    }

    fn raw_size_hint(&self) -> usize {
        let raw = (1 + self.width as usize * 4) * self.height as usize;
        if self.compression == 0 {
            raw + raw / 65_535 * 5 + 16
        } else {
            raw / 4
        }
    }

    fn assemble(&self, idat: Vec<u8>) -> Result<Vec<u8>> {
        let idat = ChunkRecord::new(*b"IDAT", idat);
        let metadata_len: usize = self.metadata.iter().map(ChunkRecord::encoded_len).sum();
        let mut out = Vec::with_capacity(8 + 25 + idat.encoded_len() + metadata_len + 12);
        out.extend_from_slice(&PNG_SIGNATURE);
        ihdr(self.width, self.height).write_to(&mut out)?;
        idat.write_to(&mut out)?;
        for chunk in &self.metadata {
            chunk.write_to(&mut out)?;
        }
        iend().write_to(&mut out)?;
        Ok(out)
    }
}

/// Encode a whole buffer as PNG without tiling.
pub fn encode_buffer(buffer: &PixelBuffer, compression: u8) -> Result<Vec<u8>> {
    let encoder = TiledPngEncoder::new(buffer.width(), buffer.height())
        .with_tile_size(buffer.width().max(buffer.height()).max(1))
        .with_compression(compression);
    let mut source = FnTileSource(|x, y, w, h| Ok(buffer.crop(x, y, w, h)));
    futures::executor::block_on(encoder.encode(&mut source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::chunk::ChunkReader;
    use crate::raster::Rgba;

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(width, height);
        for y in 0..height {
            for x in 0..width {
                buf.set_pixel(x, y, Rgba::new(x as u8, y as u8, (x ^ y) as u8, 255 - (x as u8)));
            }
        }
        buf
    }

    fn chunk_kinds(png: &[u8]) -> Vec<[u8; 4]> {
        ChunkReader::new(png).unwrap().map(|c| c.unwrap().kind).collect()
    }

    #[test]
    fn test_single_idat_layout() {
        let png = encode_buffer(&gradient(8, 8), 6).unwrap();
        assert_eq!(&png[..8], &PNG_SIGNATURE);
        assert_eq!(chunk_kinds(&png), vec![*b"IHDR", *b"IDAT", *b"IEND"]);
    }

    #[test]
    fn test_tiled_matches_untiled() {
        let full = gradient(37, 23);
        let one_shot = encode_buffer(&full, 0).unwrap();

        let encoder = TiledPngEncoder::new(37, 23).with_tile_size(8).with_compression(0);
        let mut source = FnTileSource(|x, y, w, h| Ok(full.crop(x, y, w, h)));
        let tiled = futures::executor::block_on(encoder.encode(&mut source)).unwrap();
        assert_eq!(one_shot, tiled);
    }

    #[test]
    fn test_progress_reports_each_tile() {
        let full = gradient(20, 10);
        let mut seen = Vec::new();
        {
            let encoder = TiledPngEncoder::new(20, 10)
                .with_tile_size(8)
                .with_progress(|p| seen.push((p.completed, p.total)));
            let mut source = FnTileSource(|x, y, w, h| Ok(full.crop(x, y, w, h)));
            futures::executor::block_on(encoder.encode(&mut source)).unwrap();
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last(), Some(&(6, 6)));
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_wrong_tile_size_fails() {
        let encoder = TiledPngEncoder::new(10, 10).with_tile_size(5);
        let mut source = FnTileSource(|_, _, _, _| Ok(PixelBuffer::new(4, 5)));
        let err = futures::executor::block_on(encoder.encode(&mut source)).unwrap_err();
        assert!(matches!(err, Error::TileRender { x: 0, y: 0, .. }));
    }

    #[test]
    fn test_tile_error_aborts() {
        let encoder = TiledPngEncoder::new(10, 10).with_tile_size(5);
        let mut source = FnTileSource(|x, y, w, h| {
            if x == 5 && y == 5 {
                Err(Error::Encode("boom".into()))
            } else {
                Ok(PixelBuffer::new(w, h))
            }
        });
        let err = futures::executor::block_on(encoder.encode(&mut source)).unwrap_err();
        match err {
            Error::TileRender { x, y, reason } => {
                assert_eq!((x, y), (5, 5));
                assert!(reason.contains("boom"));
            },
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_cancel_before_first_tile() {
        let token = CancelToken::new();
        token.cancel();
        let encoder = TiledPngEncoder::new(4, 4).with_cancel(token);
        let mut source = FnTileSource(|_, _, w, h| Ok(PixelBuffer::new(w, h)));
        let err = futures::executor::block_on(encoder.encode(&mut source)).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_metadata_precedes_iend() {
        let text = crate::encoding::chunk::text_chunk("workflow", "{}").unwrap();
        let encoder = TiledPngEncoder::new(2, 2).with_metadata(text);
        let mut source = FnTileSource(|_, _, w, h| Ok(PixelBuffer::new(w, h)));
        let png = futures::executor::block_on(encoder.encode(&mut source)).unwrap();
        assert_eq!(chunk_kinds(&png), vec![*b"IHDR", *b"IDAT", *b"tEXt", *b"IEND"]);
    }

    #[test]
    fn test_zero_size_rejected() {
        let encoder = TiledPngEncoder::new(0, 4);
        let mut source = FnTileSource(|_, _, w, h| Ok(PixelBuffer::new(w, h)));
        assert!(futures::executor::block_on(encoder.encode(&mut source)).is_err());
    }

    #[test]
    fn test_progress_value() {
        let p = Progress {
            completed: 1,
            total: 4,
        };
        assert_eq!(p.value(), 0.25);
        assert_eq!(p.percent(), 25);
    }
}
