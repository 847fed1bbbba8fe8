//! Graph-space geometry: rectangles, the export bounding box and the camera
//! that maps graph coordinates onto output pixels.
//!
//! Graph space is the node editor's own coordinate system (y grows downward).
//! Output space is pixels of the final raster. The two are related by
//! `screen = (world - padded_min) * scale`, shifted per tile by the tile origin.

mod tiling;

pub use tiling::{plan_output, plan_tiles, OutputPlan, SizingPolicy, TileSpec, MAX_SURFACE_EDGE};

/// Size used for an export with no entities at all.
pub const DEFAULT_EMPTY_SIZE: (f32, f32) = (240.0, 120.0);

/// A 2D point in graph space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
}

impl Point {
    /// Create a new point.
    ///
    /// # Examples
    ///
    /// ```
    /// use workflow_image_export::geometry::Point;
    ///
    /// let point = Point::new(10.0, 20.0);
    /// assert_eq!(point.x, 10.0);
    /// assert_eq!(point.y, 20.0);
    /// ```
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: Point) -> f32 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

/// An axis-aligned rectangle in graph space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    /// X coordinate of top-left corner
    pub x: f32,
    /// Y coordinate of top-left corner
    pub y: f32,
    /// Width of rectangle
    pub width: f32,
    /// Height of rectangle
    pub height: f32,
}

impl Rect {
    /// Create a new rectangle from position and dimensions.
    ///
    /// # Examples
    ///
    /// ```
    /// use workflow_image_export::geometry::Rect;
    ///
    /// let rect = Rect::new(0.0, 0.0, 100.0, 50.0);
    /// assert_eq!(rect.right(), 100.0);
    /// assert_eq!(rect.bottom(), 50.0);
    /// ```
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from its left, top, right and bottom edges.
    pub fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    /// Get the left edge x-coordinate.
    pub fn left(&self) -> f32 {
        self.x
    }

    /// Get the right edge x-coordinate.
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Get the top edge y-coordinate.
    pub fn top(&self) -> f32 {
        self.y
    }

    /// Get the bottom edge y-coordinate.
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Finite coordinates and a non-negative extent with at least one positive side.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width >= 0.0
            && self.height >= 0.0
            && (self.width > 0.0 || self.height > 0.0)
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_ltrb(
            self.left().min(other.left()),
            self.top().min(other.top()),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Overlap of two rectangles, if any.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.left().max(other.left());
        let top = self.top().max(other.top());
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right > left && bottom > top {
            Some(Rect::from_ltrb(left, top, right, bottom))
        } else {
            None
        }
    }

    /// Whether the rectangles overlap with positive area.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    /// Whether the point lies inside (edges inclusive).
    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.left() && p.x <= self.right() && p.y >= self.top() && p.y <= self.bottom()
    }

    /// Rectangle grown by `amount` on every side.
    pub fn inflate(&self, amount: f32) -> Rect {
        Rect::new(
            self.x - amount,
            self.y - amount,
            self.width + amount * 2.0,
            self.height + amount * 2.0,
        )
    }

    /// Edges agree within `tolerance`.
    pub fn approx_eq(&self, other: &Rect, tolerance: f32) -> bool {
        (self.left() - other.left()).abs() <= tolerance
            && (self.top() - other.top()).abs() <= tolerance
            && (self.right() - other.right()).abs() <= tolerance
            && (self.bottom() - other.bottom()).abs() <= tolerance
    }
}

/// Export extent in graph space, computed once per export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Left edge of the entity union
    pub min_x: f32,
    /// Top edge of the entity union
    pub min_y: f32,
    /// Right edge of the entity union
    pub max_x: f32,
    /// Bottom edge of the entity union
    pub max_y: f32,
    /// `max_x - min_x`, at least 1
    pub width: f32,
    /// `max_y - min_y`, at least 1
    pub height: f32,
    /// `min_x - padding`
    pub padded_min_x: f32,
    /// `min_y - padding`
    pub padded_min_y: f32,
    /// Padding applied to every side
    pub padding: f32,
}

impl BoundingBox {
    /// Width including padding on both sides.
    pub fn padded_width(&self) -> f32 {
        self.width + self.padding * 2.0
    }

    /// Height including padding on both sides.
    pub fn padded_height(&self) -> f32 {
        self.height + self.padding * 2.0
    }

    /// The padded extent as a rectangle.
    pub fn padded_rect(&self) -> Rect {
        Rect::new(
            self.padded_min_x,
            self.padded_min_y,
            self.padded_width(),
            self.padded_height(),
        )
    }
}

/// Union the given entity rectangles and pad the result.
///
/// `None` and invalid rectangles are skipped rather than counted as zero-size.
/// When nothing usable remains the box falls back to [`DEFAULT_EMPTY_SIZE`] at
/// the origin so the export never has zero area.
///
/// ```
/// use workflow_image_export::geometry::{compute_bbox, Rect};
///
/// let bbox = compute_bbox([Some(Rect::new(0.0, 0.0, 500.0, 300.0)), None], 50.0);
/// assert_eq!(bbox.padded_width(), 600.0);
/// assert_eq!(bbox.padded_height(), 400.0);
/// ```
pub fn compute_bbox<I>(rects: I, padding: f32) -> BoundingBox
where
    I: IntoIterator<Item = Option<Rect>>,
{
    let padding = if padding.is_finite() {
        padding.max(0.0)
    } else {
        0.0
    };

    let union = rects
        .into_iter()
        .flatten()
        .filter(Rect::is_valid)
        .reduce(|acc, r| acc.union(&r));

    let union = union.unwrap_or_else(|| {
        log::debug!("no entities with geometry; using default export extent");
        Rect::new(0.0, 0.0, DEFAULT_EMPTY_SIZE.0, DEFAULT_EMPTY_SIZE.1)
    });

    let width = union.width.max(1.0);
    let height = union.height.max(1.0);
    BoundingBox {
        min_x: union.left(),
        min_y: union.top(),
        max_x: union.left() + width,
        max_y: union.top() + height,
        width,
        height,
        padded_min_x: union.left() - padding,
        padded_min_y: union.top() - padding,
        padding,
    }
}

/// Graph-to-pixel mapping for one tile.
///
/// `screen = (world + offset) * scale` where
/// `offset = -padded_min - tile_origin / scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Pixels per graph unit
    pub scale: f32,
    /// Graph-space translation applied before scaling
    pub offset: Point,
}

impl Camera {
    /// Camera for the tile whose top-left output pixel is `(origin_x, origin_y)`.
    pub fn for_tile(bbox: &BoundingBox, scale: f32, origin_x: u32, origin_y: u32) -> Self {
        Self {
            scale,
            offset: Point::new(
                -bbox.padded_min_x - origin_x as f32 / scale,
                -bbox.padded_min_y - origin_y as f32 / scale,
            ),
        }
    }

    /// Graph point to tile pixel.
    pub fn world_to_screen(&self, p: Point) -> Point {
        Point::new((p.x + self.offset.x) * self.scale, (p.y + self.offset.y) * self.scale)
    }

    /// Tile pixel to graph point.
    pub fn screen_to_world(&self, p: Point) -> Point {
        Point::new(p.x / self.scale - self.offset.x, p.y / self.scale - self.offset.y)
    }

    /// Graph rectangle to tile-pixel rectangle.
    pub fn rect_to_screen(&self, r: &Rect) -> Rect {
        let tl = self.world_to_screen(Point::new(r.left(), r.top()));
        Rect::new(tl.x, tl.y, r.width * self.scale, r.height * self.scale)
    }

    /// As a tiny-skia transform from graph space to tile pixels.
    pub fn to_transform(&self) -> tiny_skia::Transform {
        tiny_skia::Transform::from_translate(self.offset.x, self.offset.y)
            .post_scale(self.scale, self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_three_nodes_with_padding() {
        let rects = [
            Some(Rect::new(0.0, 0.0, 200.0, 100.0)),
            Some(Rect::new(300.0, 50.0, 200.0, 100.0)),
            Some(Rect::new(100.0, 200.0, 150.0, 100.0)),
        ];
        let bbox = compute_bbox(rects, 50.0);
        assert_eq!(bbox.width, 500.0);
        assert_eq!(bbox.height, 300.0);
        assert_eq!(bbox.padded_width(), 600.0);
        assert_eq!(bbox.padded_height(), 400.0);
        assert_eq!(bbox.padded_min_x, -50.0);
        assert_eq!(bbox.padded_min_y, -50.0);
    }

    #[test]
    fn test_bbox_skips_missing_and_invalid() {
        let rects = [
            None,
            Some(Rect::new(f32::NAN, 0.0, 10.0, 10.0)),
            Some(Rect::new(10.0, 10.0, 20.0, 30.0)),
        ];
        let bbox = compute_bbox(rects, 0.0);
        assert_eq!(bbox.min_x, 10.0);
        assert_eq!(bbox.width, 20.0);
        assert_eq!(bbox.height, 30.0);
    }

    #[test]
    fn test_bbox_empty_falls_back() {
        let bbox = compute_bbox(std::iter::empty(), 10.0);
        assert_eq!(bbox.width, 240.0);
        assert_eq!(bbox.height, 120.0);
        assert_eq!(bbox.padded_width(), 260.0);
    }

    #[test]
    fn test_bbox_degenerate_clamped_to_one() {
        let bbox = compute_bbox([Some(Rect::new(5.0, 5.0, 0.0, 40.0))], 0.0);
        assert_eq!(bbox.width, 1.0);
        assert_eq!(bbox.max_x, 6.0);
    }

    #[test]
    fn test_camera_tile_offset() {
        let bbox = compute_bbox([Some(Rect::new(0.0, 0.0, 500.0, 300.0))], 50.0);
        let cam = Camera::for_tile(&bbox, 2.0, 100, 0);
        // graph (-50,-50) is output (0,0); tile starts 100px in
        let p = cam.world_to_screen(Point::new(0.0, -50.0));
        assert_eq!(p, Point::new(0.0, 0.0));
        let back = cam.screen_to_world(p);
        assert_eq!(back, Point::new(0.0, -50.0));
    }

    #[test]
    fn test_camera_transform_matches_world_to_screen() {
        let bbox = compute_bbox([Some(Rect::new(-30.0, 12.0, 90.0, 40.0))], 8.0);
        let cam = Camera::for_tile(&bbox, 1.5, 64, 32);
        let ts = cam.to_transform();
        let mut pts = [tiny_skia::Point::from_xy(17.0, 25.0)];
        ts.map_points(&mut pts);
        let expected = cam.world_to_screen(Point::new(17.0, 25.0));
        assert!((pts[0].x - expected.x).abs() < 1e-3);
        assert!((pts[0].y - expected.y).abs() < 1e-3);
    }

    #[test]
    fn test_rect_intersection() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.intersection(&b), Some(Rect::new(5.0, 5.0, 5.0, 5.0)));
        assert!(!a.intersects(&Rect::new(10.0, 0.0, 5.0, 5.0)));
    }
}
