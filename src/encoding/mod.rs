//! PNG container encoding.
//!
//! This module writes PNG files without relying on an image library:
//!
//! - [`checksum`]: CRC-32 for chunk framing, Adler-32 for the zlib trailer
//! - [`chunk`]: chunk framing, text metadata and splicing into existing files
//! - [`stored_deflate`]: a zlib stream made of uncompressed blocks (level 0)
//! - [`png_stream`]: the tiled streaming encoder producing a single `IDAT`
//!
//! Levels 1-9 compress through `flate2`.

pub mod checksum;
pub mod chunk;
pub mod png_stream;
pub mod stored_deflate;

pub use chunk::{
    embed_text_before_iend, find_text, make_chunk, text_chunk, ChunkReader, ChunkRecord,
    PNG_SIGNATURE, WORKFLOW_KEYWORD,
};
pub use png_stream::{
    encode_buffer, CancelToken, FnTileSource, Progress, TileSource, TiledPngEncoder,
};
pub use stored_deflate::{stored_zlib, StoredDeflateWriter, MAX_STORED_BLOCK};
