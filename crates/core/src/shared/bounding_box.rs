/// An axis-aligned detection rectangle in frame pixel coordinates.
///
/// Candidates are produced fresh every frame; the tracker keeps its own
/// copy of the one it selected, so boxes are plain values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// The degenerate rectangle tracking starts from.
    pub const ZERO: BoundingBox = BoundingBox {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point rounded to the nearest integer pixel.
    pub fn center(&self) -> (i32, i32) {
        let cx = (self.x as f64 + self.width as f64 * 0.5).round() as i32;
        let cy = (self.y as f64 + self.height as f64 * 0.5).round() as i32;
        (cx, cy)
    }

    /// Euclidean distance between this box's top-left corner and `other`'s.
    pub fn corner_distance(&self, other: &BoundingBox) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        dx.hypot(dy)
    }
}
