//! CSS-style colour values.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

lazy_static! {
    /// `rgb(r, g, b)` / `rgba(r, g, b, a)` with optional whitespace
    static ref RE_RGB_FUNC: Regex = Regex::new(
        r"^rgba?\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*(?:,\s*([0-9]*\.?[0-9]+)\s*)?\)$"
    )
    .unwrap();
}

/// Straight-alpha RGBA8 colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgba {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha (255 = opaque)
    pub a: u8,
}

impl Rgba {
    /// Fully transparent black.
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);
    /// Opaque black.
    pub const BLACK: Rgba = Rgba::new(0, 0, 0, 255);
    /// Opaque white.
    pub const WHITE: Rgba = Rgba::new(255, 255, 255, 255);

    /// Construct from components.
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque colour from RGB.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    /// Components as `[r, g, b, a]`.
    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Same colour with alpha scaled by `factor` (0..=1).
    pub fn with_alpha_factor(self, factor: f32) -> Self {
        let a = (self.a as f32 * factor.clamp(0.0, 1.0)).round() as u8;
        Self { a, ..self }
    }

    /// Whether alpha is 255.
    pub fn is_opaque(self) -> bool {
        self.a == 255
    }

    /// Convert for tiny-skia paints.
    pub fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }

    /// Parse `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`, `rgb()`, `rgba()`,
    /// `transparent`, `black` or `white`.
    pub fn parse(input: &str) -> Option<Rgba> {
        let s = input.trim();
        match s.to_ascii_lowercase().as_str() {
            "transparent" => return Some(Rgba::TRANSPARENT),
            "black" => return Some(Rgba::BLACK),
            "white" => return Some(Rgba::WHITE),
            _ => {},
        }

        if let Some(hex) = s.strip_prefix('#') {
            return parse_hex(hex);
        }

        let caps = RE_RGB_FUNC.captures(s)?;
        let channel = |i: usize| -> Option<u8> {
            let v: u16 = caps.get(i)?.as_str().parse().ok()?;
            Some(v.min(255) as u8)
        };
        let alpha = match caps.get(4) {
            Some(m) => {
                let a: f32 = m.as_str().parse().ok()?;
                (a.clamp(0.0, 1.0) * 255.0).round() as u8
            },
            None => 255,
        };
        Some(Rgba::new(channel(1)?, channel(2)?, channel(3)?, alpha))
    }

    /// `#rrggbb` (or `#rrggbbaa` when not opaque).
    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => Some(Rgba::rgb(nibble(0)?, nibble(1)?, nibble(2)?)),
        4 => Some(Rgba::new(nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?)),
        6 => Some(Rgba::rgb(byte(0)?, byte(2)?, byte(4)?)),
        8 => Some(Rgba::new(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

impl Serialize for Rgba {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Rgba::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid colour {:?}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(Rgba::parse("#1f1f1f"), Some(Rgba::rgb(0x1f, 0x1f, 0x1f)));
        assert_eq!(Rgba::parse("#f0f"), Some(Rgba::rgb(255, 0, 255)));
        assert_eq!(Rgba::parse("#00ff0080"), Some(Rgba::new(0, 255, 0, 0x80)));
        assert_eq!(Rgba::parse("#12345"), None);
        assert_eq!(Rgba::parse("#gggggg"), None);
    }

    #[test]
    fn test_parse_functional_forms() {
        assert_eq!(Rgba::parse("rgb(10, 20, 30)"), Some(Rgba::rgb(10, 20, 30)));
        assert_eq!(Rgba::parse("rgba(0,0,0,0.5)"), Some(Rgba::new(0, 0, 0, 128)));
        assert_eq!(Rgba::parse("rgba(300, 0, 0, 2)"), Some(Rgba::new(255, 0, 0, 255)));
        assert_eq!(Rgba::parse("hsl(0, 0%, 0%)"), None);
    }

    #[test]
    fn test_named() {
        assert_eq!(Rgba::parse(" Transparent "), Some(Rgba::TRANSPARENT));
        assert_eq!(Rgba::parse("white"), Some(Rgba::WHITE));
    }

    #[test]
    fn test_hex_roundtrip_through_serde() {
        let c = Rgba::rgb(0x35, 0x35, 0x35);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"#353535\"");
        let back: Rgba = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
