//! PNG chunk assembly and inspection.
//!
//! A chunk on the wire is `length (u32 BE) | type (4 bytes) | data | crc32(type + data) (u32 BE)`.
//! [`ChunkRecord`] owns one chunk while the stream is assembled; [`ChunkReader`]
//! walks the chunks of an already encoded file so metadata can be spliced in
//! front of `IEND`.

use std::io::Write;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use super::checksum::Crc32;
use crate::error::{Error, Result};

/// The eight-byte PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Keyword under which the serialized workflow is stored.
pub const WORKFLOW_KEYWORD: &str = "workflow";

/// A chunk type plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Four-byte chunk type, e.g. `*b"IHDR"`
    pub kind: [u8; 4],
    /// Chunk payload
    pub data: Vec<u8>,
}

impl ChunkRecord {
    /// Create a chunk record.
    pub fn new(kind: [u8; 4], data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// CRC over the type and data fields.
    pub fn crc(&self) -> u32 {
        let mut hasher = Crc32::new();
        hasher.update(&self.kind);
        hasher.update(&self.data);
        hasher.finalize()
    }

    /// Serialized length on the wire (12 bytes of framing plus data).
    pub fn encoded_len(&self) -> usize {
        12 + self.data.len()
    }

    /// Write the framed chunk.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let len = u32::try_from(self.data.len()).map_err(|_| {
            Error::Encode(format!("chunk payload of {} bytes exceeds u32", self.data.len()))
        })?;
        out.write_u32::<BigEndian>(len)?;
        out.write_all(&self.kind)?;
        out.write_all(&self.data)?;
        out.write_u32::<BigEndian>(self.crc())?;
        Ok(())
    }

    /// Framed chunk as an owned byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// Frame `data` as a chunk of type `kind`.
pub fn make_chunk(kind: [u8; 4], data: &[u8]) -> Result<Vec<u8>> {
    ChunkRecord::new(kind, data.to_vec()).to_bytes()
}

/// IHDR payload for an 8-bit RGBA, non-interlaced image.
pub fn ihdr(width: u32, height: u32) -> ChunkRecord {
    let mut data = vec![0u8; 13];
    BigEndian::write_u32(&mut data[0..4], width);
    BigEndian::write_u32(&mut data[4..8], height);
    data[8] = 8; // bit depth
    data[9] = 6; // colour type: truecolour with alpha
    data[10] = 0; // compression: deflate
    data[11] = 0; // filter method 0
    data[12] = 0; // no interlace
    ChunkRecord::new(*b"IHDR", data)
}

/// Empty IEND chunk.
pub fn iend() -> ChunkRecord {
    ChunkRecord::new(*b"IEND", Vec::new())
}

fn validate_keyword(keyword: &str) -> Result<()> {
    let valid = !keyword.is_empty()
        && keyword.len() <= 79
        && keyword.bytes().all(|b| (32..=126).contains(&b))
        && !keyword.starts_with(' ')
        && !keyword.ends_with(' ');
    if valid {
        Ok(())
    } else {
        Err(Error::Encode(format!("invalid text chunk keyword {:?}", keyword)))
    }
}

/// Build a text metadata chunk.
///
/// Text that fits in Latin-1 is stored as `tEXt`; anything else goes into an
/// uncompressed `iTXt` chunk with empty language and translated-keyword fields.
pub fn text_chunk(keyword: &str, text: &str) -> Result<ChunkRecord> {
    validate_keyword(keyword)?;

    if text.chars().all(|c| (c as u32) <= 0xFF) {
        let mut data = Vec::with_capacity(keyword.len() + 1 + text.len());
        data.extend_from_slice(keyword.as_bytes());
        data.push(0);
        data.extend(text.chars().map(|c| c as u32 as u8));
        Ok(ChunkRecord::new(*b"tEXt", data))
    } else {
        let mut data = Vec::with_capacity(keyword.len() + 5 + text.len());
        data.extend_from_slice(keyword.as_bytes());
        data.push(0);
        data.push(0); // compression flag
        data.push(0); // compression method
        data.push(0); // empty language tag
        data.push(0); // empty translated keyword
        data.extend_from_slice(text.as_bytes());
        Ok(ChunkRecord::new(*b"iTXt", data))
    }
}

/// A chunk borrowed from an encoded PNG.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRef<'a> {
    /// Byte offset of the chunk's length field
    pub offset: usize,
    /// Chunk type
    pub kind: [u8; 4],
    /// Chunk payload
    pub data: &'a [u8],
    /// CRC stored in the file
    pub crc: u32,
}

impl ChunkRef<'_> {
    /// Whether the stored CRC matches the type and data.
    pub fn crc_ok(&self) -> bool {
        let mut hasher = Crc32::new();
        hasher.update(&self.kind);
        hasher.update(self.data);
        hasher.finalize() == self.crc
    }
}

/// Iterator over the chunks of an encoded PNG.
pub struct ChunkReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> ChunkReader<'a> {
    /// Validate the signature and position the reader at the first chunk.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
            return Err(Error::Encode("not a PNG stream: bad signature".to_string()));
        }
        Ok(Self {
            bytes,
            offset: PNG_SIGNATURE.len(),
            done: false,
        })
    }
}

impl<'a> Iterator for ChunkReader<'a> {
    type Item = Result<ChunkRef<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.bytes.len() {
            return None;
        }

        let start = self.offset;
        if start + 8 > self.bytes.len() {
            self.done = true;
            return Some(Err(Error::Encode(format!("truncated chunk header at byte {}", start))));
        }

        let len = BigEndian::read_u32(&self.bytes[start..start + 4]) as usize;
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&self.bytes[start + 4..start + 8]);
        let data_end = start + 8 + len;
        if data_end + 4 > self.bytes.len() {
            self.done = true;
            return Some(Err(Error::Encode(format!(
                "chunk {} at byte {} runs past end of stream",
                String::from_utf8_lossy(&kind),
                start
            ))));
        }

        let chunk = ChunkRef {
            offset: start,
            kind,
            data: &self.bytes[start + 8..data_end],
            crc: BigEndian::read_u32(&self.bytes[data_end..data_end + 4]),
        };
        self.offset = data_end + 4;
        if &kind == b"IEND" {
            self.done = true;
        }
        Some(Ok(chunk))
    }
}

/// Insert a text chunk immediately before `IEND` of an encoded PNG.
///
/// Returns an error if `png` is not a PNG stream or has no `IEND`.
pub fn embed_text_before_iend(png: &[u8], keyword: &str, text: &str) -> Result<Vec<u8>> {
    let chunk = text_chunk(keyword, text)?;

    let mut iend_offset = None;
    for item in ChunkReader::new(png)? {
        let chunk_ref = item?;
        if &chunk_ref.kind == b"IEND" {
            iend_offset = Some(chunk_ref.offset);
            break;
        }
    }

    let offset =
        iend_offset.ok_or_else(|| Error::Encode("PNG stream has no IEND chunk".to_string()))?;

    let mut out = Vec::with_capacity(png.len() + chunk.encoded_len());
    out.extend_from_slice(&png[..offset]);
    chunk.write_to(&mut out)?;
    out.extend_from_slice(&png[offset..]);
    Ok(out)
}

/// Read the first `tEXt`/`iTXt` value stored under `keyword`.
pub fn find_text(png: &[u8], keyword: &str) -> Result<Option<String>> {
    for item in ChunkReader::new(png)? {
        let chunk = item?;
        let Some(sep) = chunk.data.iter().position(|&b| b == 0) else {
            continue;
        };
        if &chunk.data[..sep] != keyword.as_bytes() {
            continue;
        }
        match &chunk.kind {
            b"tEXt" => {
                let text = chunk.data[sep + 1..].iter().map(|&b| b as char).collect();
                return Ok(Some(text));
            },
            b"iTXt" => {
                // compression flag, method, then two NUL-terminated fields
                let rest = chunk.data.get(sep + 3..).unwrap_or(&[]);
                let mut parts = rest.splitn(3, |&b| b == 0);
                let _language = parts.next();
                let _translated = parts.next();
                let text = parts.next().unwrap_or(&[]);
                return Ok(Some(String::from_utf8_lossy(text).into_owned()));
            },
            _ => {},
        }
    }
    Ok(None)
}
