//! Axis-aligned box geometry

use serde::{Deserialize, Serialize};

/// 2D point in pixel space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Midpoint between two points
    pub fn midpoint(a: Point, b: Point) -> Point {
        Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
    }
}

/// Axis-aligned rectangle as corner coordinates `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Rect {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Create from origin and size (`[x, y, width, height]` detector output)
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Box area; inverted boxes have zero area
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Inclusive containment test
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x1 && p.x <= self.x2 && p.y >= self.y1 && p.y <= self.y2
    }

    /// Overlapping region, if the boxes touch or overlap
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 < x1 || y2 < y1 {
            return None;
        }
        Some(Rect::new(x1, y1, x2, y2))
    }

    /// Smallest box enclosing all points
    pub fn bounding(points: &[Point]) -> Option<Rect> {
        let first = points.first()?;
        let init = Rect::new(first.x, first.y, first.x, first.y);
        Some(points.iter().fold(init, |acc, p| Rect {
            x1: acc.x1.min(p.x),
            y1: acc.y1.min(p.y),
            x2: acc.x2.max(p.x),
            y2: acc.y2.max(p.y),
        }))
    }
}

/// Intersection over union of two boxes.
///
/// Returns 0.0 for disjoint boxes and for a zero-area union.
pub fn iou(a: &Rect, b: &Rect) -> f32 {
    let inter = match a.intersection(b) {
        Some(r) => r.area(),
        None => return 0.0,
    };

    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}
