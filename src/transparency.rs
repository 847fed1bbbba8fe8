//! Background removal from two opaque renders.
//!
//! When a renderer cannot produce a transparent surface, the scene is rendered
//! twice over two different opaque backdrops `B1` and `B2`. For a pixel with
//! true colour `F` and coverage `a`, each render shows `C = a*F + (1-a)*B`, so
//! per channel `a = 1 - (C1 - C2) / (B1 - B2)` wherever the backdrops differ.

use serde::{Deserialize, Serialize};

use crate::raster::{PixelBuffer, Rgba};

/// Alpha at or below this is treated as fully transparent.
const ALPHA_EPSILON: f32 = 0.001;

/// The two opaque backdrops used for recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransparencyConfig {
    /// First backdrop (default magenta)
    pub background_a: Rgba,
    /// Second backdrop (default green)
    pub background_b: Rgba,
}

impl Default for TransparencyConfig {
    fn default() -> Self {
        Self {
            background_a: Rgba::rgb(0xff, 0x00, 0xff),
            background_b: Rgba::rgb(0x00, 0xff, 0x00),
        }
    }
}

/// Why recovery could not run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    /// The two renders differ in size
    #[error("render sizes differ: {0}x{1} vs {2}x{3}")]
    DimensionMismatch(u32, u32, u32, u32),

    /// No channel differs between the backdrops
    #[error("backdrops {0} and {1} share every channel")]
    IdenticalBackgrounds(String, String),
}

/// Recover a straight-alpha image from renders over `config.background_a`
/// (`over_a`) and `config.background_b` (`over_b`).
pub fn recover_alpha(
    over_a: &PixelBuffer,
    over_b: &PixelBuffer,
    config: &TransparencyConfig,
) -> Result<PixelBuffer, RecoveryError> {
    if over_a.width() != over_b.width() || over_a.height() != over_b.height() {
        return Err(RecoveryError::DimensionMismatch(
            over_a.width(),
            over_a.height(),
            over_b.width(),
            over_b.height(),
        ));
    }

    let b1 = [
        config.background_a.r as f32,
        config.background_a.g as f32,
        config.background_a.b as f32,
    ];
    let b2 = [
        config.background_b.r as f32,
        config.background_b.g as f32,
        config.background_b.b as f32,
    ];
    let channels: Vec<usize> = (0..3).filter(|&c| b1[c] != b2[c]).collect();
    if channels.is_empty() {
        return Err(RecoveryError::IdenticalBackgrounds(
            config.background_a.to_hex(),
            config.background_b.to_hex(),
        ));
    }

    let mut out = PixelBuffer::new(over_a.width(), over_a.height());
    for ((dst, c1), c2) in out
        .data_mut()
        .chunks_exact_mut(4)
        .zip(over_a.data().chunks_exact(4))
        .zip(over_b.data().chunks_exact(4))
    {
        let sum: f32 = channels
            .iter()
            .map(|&c| 1.0 - (c1[c] as f32 - c2[c] as f32) / (b1[c] - b2[c]))
            .sum();
        let alpha = (sum / channels.len() as f32).clamp(0.0, 1.0);

        if alpha <= ALPHA_EPSILON {
            dst.copy_from_slice(&[0, 0, 0, 0]);
            continue;
        }

        for c in 0..3 {
            let v = (c1[c] as f32 - (1.0 - alpha) * b1[c]) / alpha;
            dst[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        dst[3] = (alpha * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn over(fg: Rgba, alpha: f32, bg: Rgba) -> Rgba {
        let mix = |f: u8, b: u8| (alpha * f as f32 + (1.0 - alpha) * b as f32).round() as u8;
        Rgba::rgb(mix(fg.r, bg.r), mix(fg.g, bg.g), mix(fg.b, bg.b))
    }

    #[test]
    fn test_opaque_red_recovered() {
        let cfg = TransparencyConfig::default();
        let a = PixelBuffer::filled(2, 2, Rgba::rgb(255, 0, 0));
        let b = PixelBuffer::filled(2, 2, Rgba::rgb(255, 0, 0));
        let out = recover_alpha(&a, &b, &cfg).unwrap();
        let px = out.pixel(1, 1).unwrap();
        assert!(px.a >= 253);
        assert!(px.r >= 253 && px.g <= 2 && px.b <= 2);
    }

    #[test]
    fn test_background_becomes_transparent() {
        let cfg = TransparencyConfig::default();
        let a = PixelBuffer::filled(1, 1, cfg.background_a);
        let b = PixelBuffer::filled(1, 1, cfg.background_b);
        let out = recover_alpha(&a, &b, &cfg).unwrap();
        assert_eq!(out.pixel(0, 0), Some(Rgba::TRANSPARENT));
    }

    #[test]
    fn test_half_coverage() {
        let cfg = TransparencyConfig::default();
        let fg = Rgba::rgb(40, 120, 200);
        let a = PixelBuffer::filled(1, 1, over(fg, 0.5, cfg.background_a));
        let b = PixelBuffer::filled(1, 1, over(fg, 0.5, cfg.background_b));
        let px = recover_alpha(&a, &b, &cfg).unwrap().pixel(0, 0).unwrap();
        assert!((px.a as i32 - 128).abs() <= 2);
        assert!((px.r as i32 - 40).abs() <= 3);
        assert!((px.g as i32 - 120).abs() <= 3);
        assert!((px.b as i32 - 200).abs() <= 3);
    }

    #[test]
    fn test_partial_channel_backdrops() {
        // Only red differs between these backdrops.
        let cfg = TransparencyConfig {
            background_a: Rgba::rgb(255, 10, 10),
            background_b: Rgba::rgb(0, 10, 10),
        };
        let a = PixelBuffer::filled(1, 1, Rgba::rgb(255, 10, 10));
        let b = PixelBuffer::filled(1, 1, Rgba::rgb(0, 10, 10));
        let px = recover_alpha(&a, &b, &cfg).unwrap().pixel(0, 0).unwrap();
        assert_eq!(px, Rgba::TRANSPARENT);
    }

    #[test]
    fn test_dimension_mismatch() {
        let cfg = TransparencyConfig::default();
        let err = recover_alpha(&PixelBuffer::new(2, 2), &PixelBuffer::new(2, 3), &cfg);
        assert_eq!(err, Err(RecoveryError::DimensionMismatch(2, 2, 2, 3)));
    }

    #[test]
    fn test_identical_backgrounds() {
        let cfg = TransparencyConfig {
            background_a: Rgba::WHITE,
            background_b: Rgba::WHITE,
        };
        let err = recover_alpha(&PixelBuffer::new(1, 1), &PixelBuffer::new(1, 1), &cfg);
        assert!(matches!(err, Err(RecoveryError::IdenticalBackgrounds(_, _))));
    }
}
