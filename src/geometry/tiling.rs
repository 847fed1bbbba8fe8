//! Output sizing and tile planning.

use super::BoundingBox;
use crate::config::ExceedMode;

/// Largest edge a single offscreen surface may have.
pub const MAX_SURFACE_EDGE: u32 = 16_384;

/// Largest pixel count a single offscreen surface may have.
pub const MAX_SURFACE_AREA: u64 = MAX_SURFACE_EDGE as u64 * MAX_SURFACE_EDGE as u64;

/// A rectangle of output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileSpec {
    /// Left edge in output pixels
    pub x: u32,
    /// Top edge in output pixels
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl TileSpec {
    /// Create a tile.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The tile grown by `bleed` pixels on every side, clamped to the raster.
    pub fn expand(&self, bleed: u32, raster_width: u32, raster_height: u32) -> TileSpec {
        let x0 = self.x.saturating_sub(bleed);
        let y0 = self.y.saturating_sub(bleed);
        let x1 = (self.x + self.width).saturating_add(bleed).min(raster_width);
        let y1 = (self.y + self.height).saturating_add(bleed).min(raster_height);
        TileSpec::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    /// Offset of this tile inside a larger (expanded) tile.
    pub fn offset_within(&self, outer: &TileSpec) -> (u32, u32) {
        (self.x - outer.x, self.y - outer.y)
    }

    /// Pixel count.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Split a `width x height` raster into row-major tiles of at most
/// `tile_size x tile_size`.
///
/// ```
/// use workflow_image_export::geometry::plan_tiles;
///
/// let rows = plan_tiles(5000, 2100, 2048);
/// assert_eq!(rows.len(), 2);
/// assert_eq!(rows[0].len(), 3);
/// assert_eq!(rows[1][2].width, 5000 - 4096);
/// assert_eq!(rows[1][0].height, 52);
/// ```
pub fn plan_tiles(width: u32, height: u32, tile_size: u32) -> Vec<Vec<TileSpec>> {
    let tile_size = tile_size.max(1);
    let mut rows = Vec::new();
    let mut y = 0;
    while y < height {
        let h = tile_size.min(height - y);
        let mut row = Vec::new();
        let mut x = 0;
        while x < width {
            let w = tile_size.min(width - x);
            row.push(TileSpec::new(x, y, w, h));
            x += w;
        }
        rows.push(row);
        y += h;
    }
    rows
}

/// Inputs that decide the output raster size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingPolicy {
    /// Resolution factor multiplied by device-pixel ratio
    pub scale: f32,
    /// Long-edge limit in pixels; `None` disables the limit
    pub max_long_edge: Option<u32>,
    /// What to do when the limit is exceeded
    pub exceed_mode: ExceedMode,
    /// Skip downscaling even in [`ExceedMode::Downscale`]
    pub downscale_exempt: bool,
    /// Edge of a render tile
    pub tile_size: u32,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self {
            scale: 1.0,
            max_long_edge: None,
            exceed_mode: ExceedMode::Tile,
            downscale_exempt: false,
            tile_size: 2048,
        }
    }
}

/// Resolved output raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputPlan {
    /// Final pixels per graph unit
    pub scale: f32,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Scale was reduced to honour the long-edge limit
    pub downscaled: bool,
    /// Rendering must be split into tiles
    pub tiled: bool,
    /// Edge of a render tile
    pub tile_size: u32,
}

impl OutputPlan {
    /// Tiles in row-major order, grouped by row.
    pub fn tile_rows(&self) -> Vec<Vec<TileSpec>> {
        if self.tiled {
            plan_tiles(self.width, self.height, self.tile_size)
        } else {
            vec![vec![TileSpec::new(0, 0, self.width, self.height)]]
        }
    }

    /// Total number of tiles.
    pub fn tile_count(&self) -> usize {
        self.tile_rows().iter().map(Vec::len).sum()
    }
}

fn pixel_extent(graph_units: f32, scale: f32) -> u32 {
    let px = (graph_units * scale).ceil();
    if px.is_finite() && px >= 1.0 {
        px.min(u32::MAX as f32) as u32
    } else {
        1
    }
}

/// Decide the output size and whether to tile.
pub fn plan_output(bbox: &BoundingBox, policy: &SizingPolicy) -> OutputPlan {
    let graph_w = bbox.padded_width();
    let graph_h = bbox.padded_height();
    let mut scale = if policy.scale.is_finite() && policy.scale > 0.0 {
        policy.scale
    } else {
        1.0
    };
    let mut width = pixel_extent(graph_w, scale);
    let mut height = pixel_extent(graph_h, scale);
    let mut downscaled = false;
    let mut tiled = false;

    if let Some(limit) = policy.max_long_edge.filter(|l| *l > 0) {
        let long_edge = width.max(height);
        if long_edge > limit {
            match policy.exceed_mode {
                ExceedMode::Downscale if !policy.downscale_exempt => {
                    let factor = limit as f32 / long_edge as f32;
                    // Keep the short edge at one pixel or more.
                    let min_scale = 1.0 / graph_w.min(graph_h).max(1.0);
                    scale = (scale * factor).max(min_scale);
                    width = pixel_extent(graph_w, scale).min(limit);
                    height = pixel_extent(graph_h, scale).min(limit);
                    downscaled = true;
                    log::debug!(
                        "downscaled export from {} to {} px long edge (scale {:.4})",
                        long_edge,
                        width.max(height),
                        scale
                    );
                },
                ExceedMode::Downscale => {},
                ExceedMode::Tile => tiled = true,
            }
        }
    }

    if width > MAX_SURFACE_EDGE
        || height > MAX_SURFACE_EDGE
        || width as u64 * height as u64 > MAX_SURFACE_AREA
    {
        tiled = true;
    }

    OutputPlan {
        scale,
        width,
        height,
        downscaled,
        tiled,
        tile_size: policy.tile_size.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{compute_bbox, Rect};

    fn bbox(w: f32, h: f32) -> BoundingBox {
        compute_bbox([Some(Rect::new(0.0, 0.0, w, h))], 0.0)
    }

    #[test]
    fn test_expand_clamps_to_raster() {
        let tile = TileSpec::new(0, 2048, 2048, 2048);
        let e = tile.expand(64, 3000, 3000);
        assert_eq!(e, TileSpec::new(0, 1984, 2112, 1016));
        assert_eq!(tile.offset_within(&e), (0, 64));
    }

    #[test]
    fn test_plan_tiles_covers_raster() {
        let rows = plan_tiles(4097, 10, 2048);
        assert_eq!(rows.len(), 1);
        let widths: Vec<u32> = rows[0].iter().map(|t| t.width).collect();
        assert_eq!(widths, vec![2048, 2048, 1]);
        let area: u64 = rows.iter().flatten().map(TileSpec::area).sum();
        assert_eq!(area, 4097 * 10);
    }

    #[test]
    fn test_plan_output_no_limit() {
        let plan = plan_output(&bbox(600.0, 400.0), &SizingPolicy::default());
        assert_eq!((plan.width, plan.height), (600, 400));
        assert!(!plan.tiled);
        assert!(!plan.downscaled);
        assert_eq!(plan.tile_count(), 1);
    }

    #[test]
    fn test_plan_output_downscale() {
        let policy = SizingPolicy {
            max_long_edge: Some(1000),
            exceed_mode: ExceedMode::Downscale,
            ..Default::default()
        };
        let plan = plan_output(&bbox(4000.0, 2000.0), &policy);
        assert!(plan.downscaled);
        assert_eq!(plan.width, 1000);
        assert_eq!(plan.height, 500);
        assert!((plan.scale - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_plan_output_downscale_keeps_short_edge() {
        let policy = SizingPolicy {
            max_long_edge: Some(10),
            exceed_mode: ExceedMode::Downscale,
            ..Default::default()
        };
        let plan = plan_output(&bbox(100_000.0, 2.0), &policy);
        assert!(plan.height >= 1);
        assert!(plan.width <= 10);
    }

    #[test]
    fn test_plan_output_exempt_resolution() {
        let policy = SizingPolicy {
            scale: 2.0,
            max_long_edge: Some(1000),
            exceed_mode: ExceedMode::Downscale,
            downscale_exempt: true,
            ..Default::default()
        };
        let plan = plan_output(&bbox(800.0, 100.0), &policy);
        assert!(!plan.downscaled);
        assert_eq!(plan.width, 1600);
    }

    #[test]
    fn test_plan_output_tile_mode() {
        let policy = SizingPolicy {
            max_long_edge: Some(4096),
            exceed_mode: ExceedMode::Tile,
            ..Default::default()
        };
        let plan = plan_output(&bbox(5000.0, 300.0), &policy);
        assert!(plan.tiled);
        assert_eq!(plan.width, 5000);
        assert_eq!(plan.tile_count(), 3);
    }

    #[test]
    fn test_plan_output_surface_limit_forces_tiles() {
        let plan = plan_output(&bbox(20_000.0, 100.0), &SizingPolicy::default());
        assert!(plan.tiled);
    }
}
