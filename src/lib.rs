// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::enum_variant_names)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]
#![cfg_attr(test, allow(unused_variables))]

//! # Workflow Image Export
//!
//! Raster export for node-graph workflows: the graph is rendered offscreen in
//! tiles, DOM overlays are composited on top, and the tiles are streamed into a
//! PNG encoder that can embed the workflow JSON for round-tripping.
//!
//! ## Core Features
//!
//! - **Tiled rendering**: arbitrary output sizes without one huge surface;
//!   tiles are rendered with a bleed margin so strokes and glyphs crossing tile
//!   edges match a one-shot render
//! - **Streaming PNG**: one `IDAT` assembled row by row, `flate2` for levels
//!   1-9 and uncompressed stored blocks for level 0
//! - **Transparency recovery**: exact alpha from two opaque renders over
//!   different backdrops when the renderer cannot clear to transparent
//! - **Overlays**: text editors, markdown, image and video frames captured with
//!   a bounded timeout and drawn in graph coordinates
//! - **Workflow embedding**: a `workflow` text chunk inserted before `IEND`
//!
//! ## Quick Start
//!
//! ```no_run
//! use workflow_image_export::config::ExportRequest;
//! use workflow_image_export::export::Exporter;
//! use workflow_image_export::scene::SceneSnapshot;
//!
//! # async fn run() -> workflow_image_export::Result<()> {
//! let json = std::fs::read_to_string("workflow.json")?;
//! let snapshot = SceneSnapshot::from_json_str(&json)?;
//!
//! let mut exporter = Exporter::new();
//! let output = exporter
//!     .export(&ExportRequest::new().with_padding(50), &snapshot, Vec::new())
//!     .await?;
//! std::fs::write("workflow.png", &output.bytes)?;
//! for warning in &output.warnings {
//!     eprintln!("warning: {}", warning);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Options
pub mod config;

// Coordinates and tiling
pub mod geometry;

// Pixel buffers and colours
pub mod raster;

// Scene model and host JSON normalization
pub mod scene;

// Offscreen rendering
pub mod rendering;

// Alpha recovery from opaque renders
pub mod transparency;

// DOM overlays
pub mod overlay;

// PNG container, checksums and compression
pub mod encoding;

// Export pipeline
pub mod export;

// Re-exports
pub use config::{ExportRequest, ExportSettings};
pub use error::{Error, Result};
pub use export::{ExportOutput, Exporter, ExporterHandle, Warning};
pub use scene::SceneSnapshot;

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
