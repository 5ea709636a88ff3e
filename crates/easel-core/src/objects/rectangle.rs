//! Rectangle object.

use super::{new_object_id, ObjectId, ObjectStyle};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// A rectangle with optional rounded corners.
///
/// The id travels beside the snapshot payload, never inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    #[serde(skip)]
    pub(crate) id: ObjectId,
    /// Top-left corner position.
    pub position: Point,
    /// Width of the rectangle.
    pub width: f64,
    /// Height of the rectangle.
    pub height: f64,
    /// Corner radius (0 = sharp corners).
    #[serde(default)]
    pub corner_radius: f64,
    /// Rotation angle in radians (around center).
    #[serde(default)]
    pub rotation: f64,
    /// Style properties.
    pub style: ObjectStyle,
}

impl Rectangle {
    /// Create a new rectangle.
    pub fn new(position: Point, width: f64, height: f64) -> Self {
        Self {
            id: new_object_id(),
            position,
            width,
            height,
            corner_radius: 0.0,
            rotation: 0.0,
            style: ObjectStyle::default(),
        }
    }

    /// Use a caller-chosen id.
    pub fn with_id(mut self, id: impl Into<ObjectId>) -> Self {
        self.id = id.into();
        self
    }

    /// Create a rectangle from two corner points.
    pub fn from_corners(p1: Point, p2: Point) -> Self {
        let min_x = p1.x.min(p2.x);
        let min_y = p1.y.min(p2.y);
        let width = (p2.x - p1.x).abs();
        let height = (p2.y - p1.y).abs();

        Self::new(Point::new(min_x, min_y), width, height)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the rectangle as a kurbo Rect.
    pub fn as_rect(&self) -> Rect {
        Rect::new(
            self.position.x,
            self.position.y,
            self.position.x + self.width,
            self.position.y + self.height,
        )
    }

    pub(crate) fn transform(&mut self, affine: Affine) {
        self.position = affine * self.position;
        // Translation and axis scale only; rotation is tracked separately.
        let scale = affine.as_coeffs();
        self.width *= scale[0].abs();
        self.height *= scale[3].abs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_from_corners() {
        let rect = Rectangle::from_corners(Point::new(100.0, 100.0), Point::new(50.0, 50.0));
        assert!((rect.position.x - 50.0).abs() < f64::EPSILON);
        assert!((rect.position.y - 50.0).abs() < f64::EPSILON);
        assert!((rect.width - 50.0).abs() < f64::EPSILON);
        assert!((rect.height - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_payload_excludes_id() {
        let rect = Rectangle::new(Point::new(1.0, 2.0), 3.0, 4.0).with_id("r1");
        let value = serde_json::to_value(&rect).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["width"], 3.0);
    }
}
