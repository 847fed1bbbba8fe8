//! Offscreen rendering of the node graph into output tiles.
//!
//! This module draws a [`Scene`](crate::scene::Scene) with the pure-Rust
//! `tiny-skia` library.
//!
//! ## Example
//!
//! ```ignore
//! use workflow_image_export::rendering::{RenderOptions, SkiaTileRenderer, TileRenderer};
//!
//! let mut renderer = SkiaTileRenderer::new();
//! let tile = renderer.render(&scene, &bbox, TileSpec::new(0, 0, 512, 512), &RenderOptions::default())?;
//! ```
//!
//! ## Architecture
//!
//! 1. Clear the reusable surface (editor colour, transparent, or a recovery backdrop)
//! 2. Grid, aligned to graph space so neighbouring tiles meet without seams
//! 3. Groups, links, then nodes
//! 4. Read the surface back as a straight-alpha [`PixelBuffer`](crate::raster::PixelBuffer)

mod path_rasterizer;
pub mod style;
mod text_rasterizer;
mod tile_renderer;

pub use path_rasterizer::{circle, link_curve, rounded_rect, PathRasterizer};
pub use text_rasterizer::{
    fit_text, wrap_text, BlockMeasure, FontData, TextMeasure, TextRasterizer,
};
pub use tile_renderer::{RenderOptions, RendererCapabilities, SkiaTileRenderer, TileRenderer};

pub(crate) use path_rasterizer::{rect_path, solid_paint};
