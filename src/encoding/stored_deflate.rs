//! Uncompressed ("stored") deflate blocks wrapped in a zlib container.
//!
//! Used when the compression level is 0. The stream is written incrementally:
//! at most one block of input (65535 bytes) is held in memory, and a block is
//! only emitted once more input arrives or the stream is finished, so that the
//! last block can carry `BFINAL`.

use std::io::{self, Write};

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

use super::checksum::{adler32_update, ADLER32_INIT};

/// Maximum payload of one stored block.
pub const MAX_STORED_BLOCK: usize = 65_535;

/// zlib header: CM=8 (deflate), CINFO=7 (32K window), FLEVEL=0, FCHECK so that
/// the 16-bit header is a multiple of 31.
const ZLIB_HEADER: [u8; 2] = [0x78, 0x01];

/// Incremental zlib writer that emits only stored blocks.
///
/// ```
/// use std::io::Write;
/// use workflow_image_export::encoding::StoredDeflateWriter;
///
/// let mut writer = StoredDeflateWriter::new(Vec::new());
/// writer.write_all(b"hello").unwrap();
/// let zlib = writer.finish().unwrap();
/// assert_eq!(&zlib[..2], &[0x78, 0x01]);
/// ```
pub struct StoredDeflateWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
    adler: u32,
    header_written: bool,
    total_in: u64,
}

impl<W: Write> StoredDeflateWriter<W> {
    /// Wrap an output sink.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::with_capacity(MAX_STORED_BLOCK),
            adler: ADLER32_INIT,
            header_written: false,
            total_in: 0,
        }
    }

    /// Number of uncompressed bytes accepted so far.
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    fn ensure_header(&mut self) -> io::Result<()> {
        if !self.header_written {
            self.inner.write_all(&ZLIB_HEADER)?;
            self.header_written = true;
        }
        Ok(())
    }

    fn emit_block(&mut self, last: bool) -> io::Result<()> {
        self.ensure_header()?;
        let len = self.pending.len() as u16;
        // BFINAL in bit 0, BTYPE=00; the remaining bits pad to the byte boundary.
        self.inner.write_u8(if last { 0x01 } else { 0x00 })?;
        self.inner.write_u16::<LittleEndian>(len)?;
        self.inner.write_u16::<LittleEndian>(!len)?;
        self.inner.write_all(&self.pending)?;
        self.pending.clear();
        Ok(())
    }

    /// Emit the final block and the Adler-32 trailer, returning the sink.
    pub fn finish(mut self) -> io::Result<W> {
        self.emit_block(true)?;
        self.inner.write_u32::<BigEndian>(self.adler)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for StoredDeflateWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.len() == MAX_STORED_BLOCK {
            self.emit_block(false)?;
        }
        let room = MAX_STORED_BLOCK - self.pending.len();
        let take = room.min(buf.len());
        self.pending.extend_from_slice(&buf[..take]);
        self.adler = adler32_update(self.adler, &buf[..take]);
        self.total_in += take as u64;
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Encode `data` as a complete stored-block zlib stream.
pub fn stored_zlib(data: &[u8]) -> io::Result<Vec<u8>> {
    let blocks = data.len() / MAX_STORED_BLOCK + 1;
    let mut writer = StoredDeflateWriter::new(Vec::with_capacity(data.len() + blocks * 5 + 6));
    writer.write_all(data)?;
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    fn inflate(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ZlibDecoder::new(bytes).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_empty_stream() {
        let zlib = stored_zlib(&[]).unwrap();
        // header, one empty final block, adler32(b"") == 1
        assert_eq!(zlib, vec![0x78, 0x01, 0x01, 0x00, 0x00, 0xFF, 0xFF, 0, 0, 0, 1]);
        assert!(inflate(&zlib).is_empty());
    }

    #[test]
    fn test_header_is_valid_zlib() {
        let zlib = stored_zlib(b"x").unwrap();
        let header = u16::from_be_bytes([zlib[0], zlib[1]]);
        assert_eq!(header % 31, 0);
    }

    #[test]
    fn test_exact_block_boundary() {
        let data = vec![7u8; MAX_STORED_BLOCK];
        let zlib = stored_zlib(&data).unwrap();
        // One full final block: no trailing empty block needed.
        assert_eq!(zlib.len(), 2 + 5 + MAX_STORED_BLOCK + 4);
        assert_eq!(zlib[2], 0x01);
        assert_eq!(inflate(&zlib), data);
    }

    #[test]
    fn test_multi_block_roundtrip() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
        let zlib = stored_zlib(&data).unwrap();
        assert_eq!(inflate(&zlib), data);
        // 200000 = 3 * 65535 + 3395
        assert_eq!(zlib.len(), 2 + 4 * 5 + data.len() + 4);
    }

    #[test]
    fn test_small_writes_are_coalesced() {
        let mut writer = StoredDeflateWriter::new(Vec::new());
        for i in 0..1000u32 {
            writer.write_all(&i.to_le_bytes()).unwrap();
        }
        assert_eq!(writer.total_in(), 4000);
        let zlib = writer.finish().unwrap();
        assert_eq!(zlib.len(), 2 + 5 + 4000 + 4);
        assert_eq!(inflate(&zlib).len(), 4000);
    }
}
