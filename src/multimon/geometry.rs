//! Rectangle Geometry
//!
//! Integer rectangle predicates shared by the verifier, the generators and
//! the store. All functions are total; degenerate (zero-sized) rectangles
//! never overlap anything.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rectangle in layout coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rectangle {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl Rectangle {
    /// Create a new rectangle
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge (exclusive)
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive)
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Area in square units
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Whether the rectangles share any interior point
    pub fn overlaps(&self, other: &Rectangle) -> bool {
        overlaps(self, other)
    }

    /// Whether the rectangles touch along an edge
    pub fn is_adjacent_to(&self, other: &Rectangle) -> bool {
        is_adjacent(self, other)
    }

    /// Whether `inner` lies completely inside this rectangle
    pub fn contains(&self, inner: &Rectangle) -> bool {
        contains(self, inner)
    }

    /// Same rectangle with width and height exchanged
    pub fn transposed(&self) -> Self {
        Self::new(self.x, self.y, self.height, self.width)
    }

    /// Same size, different origin
    pub fn with_origin(&self, x: i32, y: i32) -> Self {
        Self::new(x, y, self.width, self.height)
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.x, self.y
        )
    }
}

/// Whether two rectangles share interior area
pub fn overlaps(a: &Rectangle, b: &Rectangle) -> bool {
    a.x < b.right() && b.x < a.right() && a.y < b.bottom() && b.y < a.bottom()
}

/// Whether `rect` overlaps any rectangle of `region`
pub fn overlaps_region<'a, I>(region: I, rect: &Rectangle) -> bool
where
    I: IntoIterator<Item = &'a Rectangle>,
{
    region.into_iter().any(|other| overlaps(other, rect))
}

/// Whether two rectangles share a full or partial edge
///
/// Touching only at a corner does not count: the shared edge must have a
/// non-empty extent on the perpendicular axis.
pub fn is_adjacent(a: &Rectangle, b: &Rectangle) -> bool {
    if (a.x == b.right() || a.right() == b.x) && !(a.bottom() <= b.y || a.y >= b.bottom()) {
        return true;
    }

    (a.y == b.bottom() || a.bottom() == b.y) && !(a.right() <= b.x || a.x >= b.right())
}

/// Whether `inner` lies completely inside `outer`
pub fn contains(outer: &Rectangle, inner: &Rectangle) -> bool {
    inner.x >= outer.x
        && inner.y >= outer.y
        && inner.right() <= outer.right()
        && inner.bottom() <= outer.bottom()
}

/// Field-wise equality
pub fn equal(a: &Rectangle, b: &Rectangle) -> bool {
    a == b
}

/// Bounding box of a set of rectangles, `None` when empty
pub fn bounding_box<'a, I>(rects: I) -> Option<Rectangle>
where
    I: IntoIterator<Item = &'a Rectangle>,
{
    let mut iter = rects.into_iter();
    let first = *iter.next()?;

    let (mut min_x, mut min_y) = (first.x, first.y);
    let (mut max_x, mut max_y) = (first.right(), first.bottom());

    for rect in iter {
        min_x = min_x.min(rect.x);
        min_y = min_y.min(rect.y);
        max_x = max_x.max(rect.right());
        max_y = max_y.max(rect.bottom());
    }

    Some(Rectangle::new(min_x, min_y, max_x - min_x, max_y - min_y))
}
