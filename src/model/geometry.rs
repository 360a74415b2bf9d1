use serde::{Deserialize, Serialize};

/// A position in world coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(
        x: f64,
        y: f64,
    ) -> Self {
        Self {
            x,
            y,
        }
    }

    pub fn distance_to(
        &self,
        other: &Point,
    ) -> f64 {
        self.distance_sq(other).sqrt()
    }

    pub fn distance_sq(
        &self,
        other: &Point,
    ) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn offset(
        &self,
        dx: f64,
        dy: f64,
    ) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(
        width: f64,
        height: f64,
    ) -> Self {
        Self {
            width,
            height,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Zero-sized rect at a point.
    pub const fn from_point(p: Point) -> Self {
        Self::new(p.x, p.y, 0.0, 0.0)
    }

    /// Smallest rect containing both points.
    pub fn spanning(
        a: Point,
        b: Point,
    ) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self::new(x, y, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    /// Square of side `2 * radius` centered on `center`.
    pub fn around(
        center: Point,
        radius: f64,
    ) -> Self {
        Self::new(center.x - radius, center.y - radius, radius * 2.0, radius * 2.0)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Overlap test, touching edges count as overlapping.
    pub fn intersects(
        &self,
        other: &Rect,
    ) -> bool {
        self.x <= other.right() && other.x <= self.right() && self.y <= other.bottom() && other.y <= self.bottom()
    }

    pub fn contains(
        &self,
        p: &Point,
    ) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Distance from a point to the closest point of the rect, zero when inside.
    pub fn distance_to(
        &self,
        p: &Point,
    ) -> f64 {
        let dx = (self.x - p.x).max(0.0).max(p.x - self.right());
        let dy = (self.y - p.y).max(0.0).max(p.y - self.bottom());
        (dx * dx + dy * dy).sqrt()
    }
}
