//! Integration tests for the PNG container, checksums and compression streams.
//!
//! Output is checked against independent implementations: `crc32fast` for
//! CRC-32, `flate2` for inflating zlib streams and `image` for decoding PNGs.

use std::io::Read;

use proptest::prelude::*;
use workflow_image_export::encoding::checksum::{adler32, adler32_update, crc32, ADLER32_INIT};
use workflow_image_export::encoding::{
    embed_text_before_iend, encode_buffer, find_text, stored_zlib, ChunkReader, FnTileSource,
    TiledPngEncoder, MAX_STORED_BLOCK,
};
use workflow_image_export::raster::{PixelBuffer, Rgba};

fn inflate(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .expect("zlib stream should inflate");
    out
}

fn decode_rgba(png: &[u8]) -> (u32, u32, Vec<u8>) {
    let img = image::load_from_memory(png).expect("PNG should decode").to_rgba8();
    (img.width(), img.height(), img.into_raw())
}

fn pattern(width: u32, height: u32) -> PixelBuffer {
    let mut buf = PixelBuffer::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let color = Rgba::new(
                (x * 7) as u8,
                (y * 13) as u8,
                ((x + y) * 3) as u8,
                255 - (x % 200) as u8,
            );
            buf.set_pixel(x, y, color);
        }
    }
    buf
}

mod checksums {
    use super::*;

    #[test]
    fn test_crc32_matches_crc32fast() {
        let inputs: [&[u8]; 4] = [b"", b"IEND", b"123456789", &[0u8; 4096]];
        for input in inputs {
            assert_eq!(crc32(input), crc32fast::hash(input));
        }
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_adler32_known_values() {
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    proptest! {
        #[test]
        fn prop_crc32_matches_oracle(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            prop_assert_eq!(crc32(&data), crc32fast::hash(&data));
        }

        #[test]
        fn prop_adler32_incremental(
            data in proptest::collection::vec(any::<u8>(), 0..20_000),
            split in 0usize..20_000,
        ) {
            let split = split.min(data.len());
            let head = adler32_update(ADLER32_INIT, &data[..split]);
            let incremental = adler32_update(head, &data[split..]);
            prop_assert_eq!(incremental, adler32(&data));
        }
    }
}

mod stored_deflate {
    use super::*;

    fn block_lengths(stream: &[u8]) -> Vec<usize> {
        // skip the 2-byte zlib header; stop before the 4-byte Adler trailer
        let mut lengths = Vec::new();
        let mut pos = 2;
        loop {
            let header = stream[pos];
            let len = u16::from_le_bytes([stream[pos + 1], stream[pos + 2]]) as usize;
            let nlen = u16::from_le_bytes([stream[pos + 3], stream[pos + 4]]);
            assert_eq!(nlen, !(len as u16));
            lengths.push(len);
            pos += 5 + len;
            if header & 1 == 1 {
                break;
            }
        }
        assert_eq!(pos + 4, stream.len());
        lengths
    }

    #[test]
    fn test_empty_input() {
        let stream = stored_zlib(&[]).unwrap();
        assert_eq!(&stream[..2], &[0x78, 0x01]);
        assert!(inflate(&stream).is_empty());
    }

    #[test]
    fn test_block_boundaries() {
        let lengths = [
            MAX_STORED_BLOCK - 1,
            MAX_STORED_BLOCK,
            MAX_STORED_BLOCK + 1,
            3 * MAX_STORED_BLOCK + 17,
        ];
        for len in lengths {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let stream = stored_zlib(&data).unwrap();
            assert_eq!(inflate(&stream), data, "length {}", len);
            let lengths = block_lengths(&stream);
            assert!(lengths.iter().all(|&l| l <= MAX_STORED_BLOCK));
            assert_eq!(lengths.iter().sum::<usize>(), len);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_stored_stream_inflates(data in proptest::collection::vec(any::<u8>(), 0..140_000)) {
            let stream = stored_zlib(&data).unwrap();
            prop_assert_eq!(inflate(&stream), data);
        }
    }
}

mod png_output {
    use super::*;

    #[test]
    fn test_solid_buffer_roundtrip_at_levels_0_and_6() {
        let buf = PixelBuffer::filled(37, 21, Rgba::new(12, 200, 99, 180));
        for level in [0, 6] {
            let png = encode_buffer(&buf, level).unwrap();
            let (w, h, data) = decode_rgba(&png);
            assert_eq!((w, h), (37, 21));
            assert_eq!(data, buf.data(), "compression level {}", level);
        }
    }

    #[test]
    fn test_tiled_encode_matches_source() {
        let source_pixels = pattern(300, 170);
        let encoder = TiledPngEncoder::new(300, 170)
            .with_tile_size(64)
            .with_compression(0);
        let mut source = FnTileSource(|x, y, w, h| Ok(source_pixels.crop(x, y, w, h)));
        let png = futures::executor::block_on(encoder.encode(&mut source)).unwrap();

        let (w, h, data) = decode_rgba(&png);
        assert_eq!((w, h), (300, 170));
        assert_eq!(data, source_pixels.data());
    }

    #[test]
    fn test_chunk_layout() {
        let png = encode_buffer(&pattern(10, 10), 6).unwrap();
        let kinds: Vec<[u8; 4]> = ChunkReader::new(&png)
            .unwrap()
            .map(|c| c.unwrap().kind)
            .collect();
        assert_eq!(kinds, vec![*b"IHDR", *b"IDAT", *b"IEND"]);
        assert!(ChunkReader::new(&png).unwrap().all(|c| c.unwrap().crc_ok()));
    }

    #[test]
    fn test_embedded_text_survives_decoding() {
        let png = encode_buffer(&pattern(8, 8), 6).unwrap();
        let json = r#"{"nodes":[],"links":[],"note":"café ☕"}"#;
        let embedded = embed_text_before_iend(&png, "workflow", json).unwrap();

        let kinds: Vec<[u8; 4]> = ChunkReader::new(&embedded)
            .unwrap()
            .map(|c| c.unwrap().kind)
            .collect();
        assert_eq!(kinds[kinds.len() - 2], *b"iTXt");
        assert_eq!(find_text(&embedded, "workflow").unwrap().as_deref(), Some(json));

        let (w, h, _) = decode_rgba(&embedded);
        assert_eq!((w, h), (8, 8));
    }

    #[test]
    fn test_embed_rejects_non_png() {
        assert!(embed_text_before_iend(b"GIF89a", "workflow", "{}").is_err());
    }
}
