//! Image object referencing a remote source.

use super::{new_object_id, ObjectId};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// An image placed on the canvas.
///
/// Pixel data is never stored; the source URL is enough for any client to
/// load the same picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(skip)]
    pub(crate) id: ObjectId,
    /// Source URL.
    pub src: String,
    /// Top-left corner position.
    pub position: Point,
    /// Display width.
    pub width: f64,
    /// Display height.
    pub height: f64,
    /// Intrinsic width in pixels, once known.
    #[serde(default)]
    pub natural_width: Option<u32>,
    /// Intrinsic height in pixels, once known.
    #[serde(default)]
    pub natural_height: Option<u32>,
    /// Rotation angle in radians (around center).
    #[serde(default)]
    pub rotation: f64,
}

impl Image {
    /// Placeholder size used until the intrinsic size is known.
    pub const DEFAULT_SIZE: f64 = 200.0;

    /// Create an image at `position` with the default placeholder size.
    pub fn new(src: impl Into<String>, position: Point) -> Self {
        Self {
            id: new_object_id(),
            src: src.into(),
            position,
            width: Self::DEFAULT_SIZE,
            height: Self::DEFAULT_SIZE,
            natural_width: None,
            natural_height: None,
            rotation: 0.0,
        }
    }

    /// Use a caller-chosen id.
    pub fn with_id(mut self, id: impl Into<ObjectId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the display size.
    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Record the decoded pixel size and scale to fit within `max` while
    /// preserving the aspect ratio.
    pub fn set_natural_size(&mut self, width: u32, height: u32, max: f64) {
        self.natural_width = Some(width);
        self.natural_height = Some(height);
        if width == 0 || height == 0 {
            return;
        }
        let aspect = width as f64 / height as f64;
        if aspect >= 1.0 {
            self.width = max.min(width as f64);
            self.height = self.width / aspect;
        } else {
            self.height = max.min(height as f64);
            self.width = self.height * aspect;
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the bounding rectangle.
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
        let scale = affine.as_coeffs();
        self.width *= scale[0].abs();
        self.height *= scale[3].abs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_size_fits_landscape() {
        let mut img = Image::new("http://localhost/a.png", Point::ZERO);
        img.set_natural_size(1000, 500, 400.0);
        assert!((img.width - 400.0).abs() < 0.01);
        assert!((img.height - 200.0).abs() < 0.01);
    }

    #[test]
    fn test_natural_size_keeps_small_images() {
        let mut img = Image::new("http://localhost/a.png", Point::ZERO);
        img.set_natural_size(50, 100, 400.0);
        assert!((img.height - 100.0).abs() < 0.01);
        assert!((img.width - 50.0).abs() < 0.01);
    }
}
