//! Path rasterizer - shapes of the node graph drawn with tiny-skia.

use tiny_skia::{
    FillRule, LineCap, LineJoin, Mask, Paint, Path, PathBuilder, Pixmap, Stroke, Transform,
};

use crate::geometry::{Point, Rect};
use crate::raster::Rgba;

/// Cubic control-point distance for a quarter circle.
const KAPPA: f32 = 0.552_284_8;

/// Anti-aliased paint for a flat colour.
pub(crate) fn solid_paint(color: Rgba) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, color.a);
    paint.anti_alias = true;
    paint
}

/// Rasterizer for graph shapes.
pub struct PathRasterizer {
    line_cap: LineCap,
}

impl PathRasterizer {
    /// Create a new path rasterizer.
    pub fn new() -> Self {
        Self {
            line_cap: LineCap::Round,
        }
    }

    /// Fill a path.
    pub fn fill_path(
        &self,
        pixmap: &mut Pixmap,
        path: &Path,
        color: Rgba,
        transform: Transform,
        mask: Option<&Mask>,
    ) {
        if color.a == 0 {
            return;
        }
        pixmap.fill_path(path, &solid_paint(color), FillRule::Winding, transform, mask);
    }

    /// Stroke a path with a width given in path units.
    pub fn stroke_path(
        &self,
        pixmap: &mut Pixmap,
        path: &Path,
        color: Rgba,
        width: f32,
        transform: Transform,
        mask: Option<&Mask>,
    ) {
        if color.a == 0 || width <= 0.0 {
            return;
        }
        let stroke = Stroke {
            width,
            line_cap: self.line_cap,
            line_join: LineJoin::Round,
            ..Stroke::default()
        };
        pixmap.stroke_path(path, &solid_paint(color), &stroke, transform, mask);
    }

    /// Fill an axis-aligned rectangle.
    pub fn fill_rect(&self, pixmap: &mut Pixmap, rect: &Rect, color: Rgba, transform: Transform) {
        if let Some(path) = rect_path(rect) {
            self.fill_path(pixmap, &path, color, transform, None);
        }
    }
}

impl Default for PathRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain rectangle path; `None` for empty or non-finite rectangles.
pub fn rect_path(rect: &Rect) -> Option<Path> {
    let r = tiny_skia::Rect::from_xywh(rect.x, rect.y, rect.width, rect.height)?;
    Some(PathBuilder::from_rect(r))
}

/// Rectangle with per-corner radii `[top-left, top-right, bottom-right, bottom-left]`.
///
/// Radii are clamped to half the shorter side.
pub fn rounded_rect(rect: &Rect, radii: [f32; 4]) -> Option<Path> {
    if !rect.is_valid() {
        return None;
    }
    let max = rect.width.min(rect.height) / 2.0;
    let [tl, tr, br, bl] = radii.map(|r| r.clamp(0.0, max));
    let (l, t, r, b) = (rect.left(), rect.top(), rect.right(), rect.bottom());

    let mut pb = PathBuilder::new();
    pb.move_to(l + tl, t);
    pb.line_to(r - tr, t);
    pb.cubic_to(r - tr + tr * KAPPA, t, r, t + tr - tr * KAPPA, r, t + tr);
    pb.line_to(r, b - br);
    pb.cubic_to(r, b - br + br * KAPPA, r - br + br * KAPPA, b, r - br, b);
    pb.line_to(l + bl, b);
    pb.cubic_to(l + bl - bl * KAPPA, b, l, b - bl + bl * KAPPA, l, b - bl);
    pb.line_to(l, t + tl);
    pb.cubic_to(l, t + tl - tl * KAPPA, l + tl - tl * KAPPA, t, l + tl, t);
    pb.close();
    pb.finish()
}

/// Circle path.
pub fn circle(center: Point, radius: f32) -> Option<Path> {
    PathBuilder::from_circle(center.x, center.y, radius)
}

/// Control points of the S-curve joining an output slot to an input slot.
pub fn link_control_points(from: Point, to: Point) -> [Point; 4] {
    let dist = from.distance_to(to) * 0.25;
    [
        from,
        Point::new(from.x + dist, from.y),
        Point::new(to.x - dist, to.y),
        to,
    ]
}

/// Bezier path of a link.
pub fn link_curve(from: Point, to: Point) -> Option<Path> {
    let [p0, c1, c2, p1] = link_control_points(from, to);
    let mut pb = PathBuilder::new();
    pb.move_to(p0.x, p0.y);
    pb.cubic_to(c1.x, c1.y, c2.x, c2.y, p1.x, p1.y);
    pb.finish()
}

/// Rectangle enclosing a link's control points (and therefore the curve).
pub fn link_bounds(from: Point, to: Point) -> Rect {
    let pts = link_control_points(from, to);
    let (mut l, mut t, mut r, mut b) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for p in pts {
        l = l.min(p.x);
        t = t.min(p.y);
        r = r.max(p.x);
        b = b.max(p.y);
    }
    Rect::from_ltrb(l, t, r, b)
}
