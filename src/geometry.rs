/// Pixel-space primitives shared by the capture overlay and capture backends.
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("selection has zero area")]
    EmptySelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned rectangle in global desktop pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    pub origin: Point,
    pub size: Size,
}

impl Rectangle {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    /// Normalizes two corners into a rectangle; the result is never negative.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            origin: Point::new(a.x.min(b.x), a.y.min(b.y)),
            size: Size::new(a.x.abs_diff(b.x), a.y.abs_diff(b.y)),
        }
    }

    pub fn right(&self) -> i64 {
        i64::from(self.origin.x) + i64::from(self.size.width)
    }

    pub fn bottom(&self) -> i64 {
        i64::from(self.origin.y) + i64::from(self.size.height)
    }

    pub fn translate(self, dx: i32, dy: i32) -> Self {
        Self {
            origin: Point::new(
                self.origin.x.saturating_add(dx),
                self.origin.y.saturating_add(dy),
            ),
            size: self.size,
        }
    }

    pub fn contains(&self, other: &Rectangle) -> bool {
        other.origin.x >= self.origin.x
            && other.origin.y >= self.origin.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersects(&self, other: &Rectangle) -> bool {
        i64::from(self.origin.x) < other.right()
            && i64::from(other.origin.x) < self.right()
            && i64::from(self.origin.y) < other.bottom()
            && i64::from(other.origin.y) < self.bottom()
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{} {}x{}",
            self.origin.x, self.origin.y, self.size.width, self.size.height
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayId(pub String);

impl DisplayId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One connected monitor.
///
/// `origin` is the compositor's layout position, which Hyprland reports in
/// logical units. `pixel_bounds` pairs that origin with the device-pixel mode
/// size. On a scaled monitor the resulting "global" rectangle therefore mixes
/// a logical offset with device-pixel extents: it is only meaningful against
/// the descriptor that produced it, and consumers recover display-local
/// device pixels by subtracting `origin` again.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayDescriptor {
    pub id: DisplayId,
    pub origin: Point,
    pub pixel_bounds: Rectangle,
    pub scale_factor: f64,
}

impl DisplayDescriptor {
    pub fn new(id: DisplayId, origin: Point, size: Size, scale_factor: f64) -> Self {
        let scale_factor = if scale_factor.is_finite() && scale_factor > 0.0 {
            scale_factor
        } else {
            1.0
        };
        Self {
            id,
            origin,
            pixel_bounds: Rectangle {
                origin,
                size,
            },
            scale_factor,
        }
    }

    /// Converts a logical pointer position on the overlay into a display-local
    /// device pixel, clamped to the display.
    pub fn device_point(&self, logical_x: f64, logical_y: f64) -> Point {
        let max_x = f64::from(self.pixel_bounds.size.width);
        let max_y = f64::from(self.pixel_bounds.size.height);
        let x = (logical_x * self.scale_factor).round().clamp(0.0, max_x);
        let y = (logical_y * self.scale_factor).round().clamp(0.0, max_y);
        Point::new(x as i32, y as i32)
    }

    /// Converts a display-local device pixel back to the overlay's logical
    /// coordinates, for drawing.
    pub fn logical_point(&self, point: Point) -> (f64, f64) {
        (
            f64::from(point.x) / self.scale_factor,
            f64::from(point.y) / self.scale_factor,
        )
    }
}

/// Maps a drag gesture given in display-local pixels to a global rectangle.
pub fn resolve(
    start: Point,
    end: Point,
    display: &DisplayDescriptor,
) -> Result<Rectangle, GeometryError> {
    let local = Rectangle::from_corners(start, end);
    if local.size.is_empty() {
        return Err(GeometryError::EmptySelection);
    }
    Ok(local.translate(display.origin.x, display.origin.y))
}
