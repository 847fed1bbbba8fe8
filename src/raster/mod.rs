//! Owned pixel buffers and colour parsing.
//!
//! [`PixelBuffer`] is the unit of work handed between the tile renderer, the
//! overlay compositor, the transparency recovery pass and the PNG encoder.
//! It always holds straight (non-premultiplied) RGBA8, row-major, tightly packed.
//! Conversions to and from `tiny_skia::Pixmap` (premultiplied) happen only at the
//! drawing boundary.

mod color;

pub use color::Rgba;

use crate::error::{Error, Result};
use tiny_skia::{ColorU8, Pixmap};

/// Straight-alpha RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Buffer filled with one colour.
    pub fn filled(width: u32, height: u32, color: Rgba) -> Self {
        let pixel = color.to_array();
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&pixel);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap raw RGBA bytes. Fails if the length does not match the dimensions.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(Error::InvalidOptions(format!(
                "pixel data has {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw RGBA bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the buffer, returning the raw bytes.
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// One row of RGBA bytes.
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * 4;
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// Pixel at `(x, y)`, or `None` outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.index(x, y);
        Some(Rgba::new(self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]))
    }

    /// Overwrite the pixel at `(x, y)`; ignored outside the buffer.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgba) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = self.index(x, y);
        self.data[i..i + 4].copy_from_slice(&color.to_array());
    }

    /// Whether every pixel has alpha 255.
    pub fn is_opaque(&self) -> bool {
        self.data.chunks_exact(4).all(|px| px[3] == 255)
    }

    /// Copy out a sub-rectangle. The rectangle is clamped to the buffer.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> PixelBuffer {
        let x0 = x.min(self.width);
        let y0 = y.min(self.height);
        let w = width.min(self.width - x0);
        let h = height.min(self.height - y0);
        let mut out = Vec::with_capacity(w as usize * h as usize * 4);
        for row in y0..y0 + h {
            let start = self.index(x0, row);
            out.extend_from_slice(&self.data[start..start + w as usize * 4]);
        }
        PixelBuffer {
            width: w,
            height: h,
            data: out,
        }
    }

    /// Composite every pixel over an opaque colour, producing an opaque buffer.
    pub fn flatten_onto(&mut self, background: Rgba) {
        let bg = [background.r as u32, background.g as u32, background.b as u32];
        for px in self.data.chunks_exact_mut(4) {
            let a = px[3] as u32;
            for c in 0..3 {
                px[c] = ((px[c] as u32 * a + bg[c] * (255 - a) + 127) / 255) as u8;
            }
            px[3] = 255;
        }
    }

    /// Source-over composite `src` at `(dx, dy)` with an extra opacity factor.
    pub fn draw_over(&mut self, src: &PixelBuffer, dx: i64, dy: i64, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity == 0.0 {
            return;
        }
        for sy in 0..src.height {
            let ty = dy + sy as i64;
            if ty < 0 || ty >= self.height as i64 {
                continue;
            }
            for sx in 0..src.width {
                let tx = dx + sx as i64;
                if tx < 0 || tx >= self.width as i64 {
                    continue;
                }
                let si = src.index(sx, sy);
                let di = self.index(tx as u32, ty as u32);
                blend_straight(&mut self.data[di..di + 4], &src.data[si..si + 4], opacity);
            }
        }
    }

    /// Convert a premultiplied pixmap into a straight-alpha buffer.
    pub fn from_pixmap(pixmap: &Pixmap) -> Self {
        let mut data = Vec::with_capacity(pixmap.data().len());
        for px in pixmap.pixels() {
            let c = px.demultiply();
            data.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }
        Self {
            width: pixmap.width(),
            height: pixmap.height(),
            data,
        }
    }

    /// Convert into a premultiplied pixmap for drawing.
    pub fn to_pixmap(&self) -> Result<Pixmap> {
        let mut pixmap = Pixmap::new(self.width, self.height).ok_or(Error::SurfaceUnavailable {
            width: self.width,
            height: self.height,
        })?;
        for (dst, src) in pixmap.pixels_mut().iter_mut().zip(self.data.chunks_exact(4)) {
            *dst = ColorU8::from_rgba(src[0], src[1], src[2], src[3]).premultiply();
        }
        Ok(pixmap)
    }
}

/// Straight-alpha source-over for one pixel.
fn blend_straight(dst: &mut [u8], src: &[u8], opacity: f32) {
    let sa = src[3] as f32 / 255.0 * opacity;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        dst.copy_from_slice(&[0, 0, 0, 0]);
        return;
    }
    for c in 0..3 {
        let s = src[c] as f32;
        let d = dst[c] as f32;
        let v = (s * sa + d * da * (1.0 - sa)) / out_a;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}
