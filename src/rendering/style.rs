//! Canvas colours and metrics matching the host editor's default theme.

use crate::raster::Rgba;

/// Corner radius of node boxes.
pub const NODE_RADIUS: f32 = 8.0;
/// Radius of slot connectors.
pub const SLOT_RADIUS: f32 = 4.0;
/// Title font size.
pub const TITLE_FONT_SIZE: f32 = 14.0;
/// Slot and widget font size.
pub const BODY_FONT_SIZE: f32 = 12.0;
/// Link stroke width.
pub const LINK_WIDTH: f32 = 3.0;
/// Minor grid spacing in graph units.
pub const GRID_SPACING: f32 = 20.0;
/// Every n-th grid line is drawn stronger.
pub const GRID_MAJOR_EVERY: i64 = 5;

pub const NODE_TITLE_BG: Rgba = Rgba::rgb(0x33, 0x33, 0x33);
pub const NODE_BODY_BG: Rgba = Rgba::rgb(0x35, 0x35, 0x35);
pub const NODE_TITLE_TEXT: Rgba = Rgba::rgb(0x99, 0x99, 0x99);
pub const NODE_TEXT: Rgba = Rgba::rgb(0xaa, 0xaa, 0xaa);
pub const NODE_SHADOW: Rgba = Rgba::new(0, 0, 0, 0x60);
pub const NODE_OUTLINE: Rgba = Rgba::rgb(0x66, 0x66, 0x66);
pub const WIDGET_BG: Rgba = Rgba::rgb(0x22, 0x22, 0x22);
pub const WIDGET_OUTLINE: Rgba = Rgba::rgb(0x66, 0x66, 0x66);
pub const WIDGET_TEXT: Rgba = Rgba::rgb(0xdd, 0xdd, 0xdd);
pub const WIDGET_SECONDARY_TEXT: Rgba = Rgba::rgb(0x99, 0x99, 0x99);
pub const BYPASS_TINT: Rgba = Rgba::new(0xff, 0x00, 0xff, 0x40);
pub const MUTED_TINT: Rgba = Rgba::new(0x00, 0x00, 0x00, 0x80);
pub const GROUP_DEFAULT: Rgba = Rgba::rgb(0x3f, 0x78, 0x9e);
pub const GRID_MINOR: Rgba = Rgba::new(0xff, 0xff, 0xff, 0x0a);
pub const GRID_MAJOR: Rgba = Rgba::new(0xff, 0xff, 0xff, 0x18);
pub const LINK_DEFAULT: Rgba = Rgba::rgb(0x99, 0xaa, 0x99);

/// Link/slot colour for a data type.
pub fn type_color(kind: &str) -> Rgba {
    match kind.to_ascii_uppercase().as_str() {
        "CLIP" => Rgba::rgb(0xff, 0xd5, 0x00),
        "CLIP_VISION" => Rgba::rgb(0xa8, 0xda, 0xdc),
        "CONDITIONING" => Rgba::rgb(0xff, 0xa9, 0x31),
        "CONTROL_NET" => Rgba::rgb(0x00, 0xd7, 0x8d),
        "IMAGE" => Rgba::rgb(0x64, 0xb5, 0xf6),
        "LATENT" => Rgba::rgb(0xff, 0x9c, 0xf9),
        "MASK" => Rgba::rgb(0x81, 0xc7, 0x84),
        "MODEL" => Rgba::rgb(0xb3, 0x9d, 0xdb),
        "VAE" => Rgba::rgb(0xff, 0x6e, 0x6e),
        _ => LINK_DEFAULT,
    }
}
