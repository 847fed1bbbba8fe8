//! Non-fatal export degradations.

use std::fmt;

/// Something the export had to give up on or change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Warning {
    /// The image was rendered in tiles
    RenderTiled,
    /// The scale was reduced to honour the long-edge limit
    RenderDownscaled,
    /// The renderer could not produce a transparent background
    TransparentFailed,
    /// Recovering alpha from two opaque renders failed
    TransparentRecoveryFailed,
    /// The export fell back to a solid background
    TransparentDegradedToSolid,
    /// The workflow could not be embedded
    EmbedFailed,
    /// WebP was requested but no encoder exists; PNG was written instead
    FormatForcePng,
}

impl Warning {
    /// Stable code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Warning::RenderTiled => "render:tiled",
            Warning::RenderDownscaled => "render:downscaled",
            Warning::TransparentFailed => "transparent:failed",
            Warning::TransparentRecoveryFailed => "transparent:recovery_failed",
            Warning::TransparentDegradedToSolid => "transparent:degraded_to_solid",
            Warning::EmbedFailed => "embed:failed",
            Warning::FormatForcePng => "format:force-png",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl serde::Serialize for Warning {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

/// Ordered, duplicate-free warning list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    /// Record a warning once.
    pub fn push(&mut self, warning: Warning) {
        if !self.0.contains(&warning) {
            log::warn!("export warning: {}", warning);
            self.0.push(warning);
        }
    }

    /// Whether `warning` was recorded.
    pub fn contains(&self, warning: Warning) -> bool {
        self.0.contains(&warning)
    }

    /// Recorded warnings in order.
    pub fn into_vec(self) -> Vec<Warning> {
        self.0
    }
}
