//! CRC-32 and Adler-32 checksums used by the PNG container and zlib stream.
//!
//! Both are implemented in-crate so the encoder has no hidden state: the CRC
//! table is built at compile time and Adler-32 is threaded through callers as a
//! plain `u32`.

/// Reflected CRC-32 polynomial (ISO 3309 / ITU-T V.42, as used by PNG).
const CRC32_POLY: u32 = 0xEDB8_8320;

/// Largest prime below 2^16.
const ADLER_MOD: u32 = 65_521;

/// Largest n such that 255n(n+1)/2 + (n+1)(ADLER_MOD-1) fits in a u32.
const ADLER_NMAX: usize = 5_552;

static CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 {
                CRC32_POLY ^ (c >> 1)
            } else {
                c >> 1
            };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// Incremental CRC-32 hasher.
///
/// ```
/// use workflow_image_export::encoding::checksum::{crc32, Crc32};
///
/// let mut hasher = Crc32::new();
/// hasher.update(b"1234");
/// hasher.update(b"56789");
/// assert_eq!(hasher.finalize(), crc32(b"123456789"));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    /// Start a new checksum.
    pub fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    /// Feed more bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        let mut c = self.state;
        for &b in bytes {
            c = CRC32_TABLE[((c ^ b as u32) & 0xFF) as usize] ^ (c >> 8);
        }
        self.state = c;
    }

    /// Final checksum value.
    pub fn finalize(self) -> u32 {
        self.state ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-32 of a byte slice. `crc32(b"") == 0`.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Initial Adler-32 state.
pub const ADLER32_INIT: u32 = 1;

/// Continue an Adler-32 checksum over `bytes`.
///
/// Sums are reduced modulo 65521 every [`ADLER_NMAX`] bytes so neither half
/// overflows on arbitrarily long input.
pub fn adler32_update(state: u32, bytes: &[u8]) -> u32 {
    let mut a = state & 0xFFFF;
    let mut b = state >> 16;

    for block in bytes.chunks(ADLER_NMAX) {
        for &byte in block {
            a += byte as u32;
            b += a;
        }
        a %= ADLER_MOD;
        b %= ADLER_MOD;
    }

    (b << 16) | a
}

/// Adler-32 of a byte slice. `adler32(b"") == 1`.
pub fn adler32(bytes: &[u8]) -> u32 {
    adler32_update(ADLER32_INIT, bytes)
}
