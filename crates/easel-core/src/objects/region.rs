//! Region annotation anchored to an image.

use super::{new_object_id, Image, ObjectId, SerializableColor};
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// A rectangular region of an image, stored relative to the image so it
/// follows the image when it is moved or resized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(skip)]
    pub(crate) id: ObjectId,
    /// The annotated image.
    pub parent: ObjectId,
    /// Region in unit coordinates of the parent image (0.0..=1.0 on each axis).
    pub relative: Rect,
    /// Annotation label.
    #[serde(default)]
    pub label: String,
    /// Outline color.
    pub color: SerializableColor,
    /// Absolute bounds, derived from `relative` and the parent image.
    #[serde(skip)]
    bounds: Rect,
}

impl Region {
    pub fn new(parent: impl Into<ObjectId>, relative: Rect) -> Self {
        Self {
            id: new_object_id(),
            parent: parent.into(),
            relative,
            label: String::new(),
            color: SerializableColor::annotation(),
            bounds: Rect::ZERO,
        }
    }

    /// Use a caller-chosen id.
    pub fn with_id(mut self, id: impl Into<ObjectId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Build a region from an absolute rectangle drawn over `image`.
    pub fn from_absolute(image: &Image, absolute: Rect) -> Self {
        let frame = image.as_rect();
        let to_unit = |p: Point| {
            Point::new(
                if frame.width() > 0.0 { (p.x - frame.x0) / frame.width() } else { 0.0 },
                if frame.height() > 0.0 { (p.y - frame.y0) / frame.height() } else { 0.0 },
            )
        };
        let relative = Rect::from_points(to_unit(absolute.origin()), to_unit(Point::new(absolute.x1, absolute.y1)));
        let mut region = Self::new(image.id(), relative);
        region.refresh(Some(image));
        region
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cached absolute bounds.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Recompute the cached absolute bounds from the parent image.
    ///
    /// Without a parent the region collapses to an empty rect at the origin.
    pub fn refresh(&mut self, parent: Option<&Image>) {
        self.bounds = match parent {
            Some(image) => {
                let frame = image.as_rect();
                Rect::new(
                    frame.x0 + self.relative.x0 * frame.width(),
                    frame.y0 + self.relative.y0 * frame.height(),
                    frame.x0 + self.relative.x1 * frame.width(),
                    frame.y0 + self.relative.y1 * frame.height(),
                )
            }
            None => Rect::ZERO,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_follows_parent() {
        let mut image = Image::new("http://localhost/a.png", Point::new(100.0, 100.0)).with_size(200.0, 100.0);
        let mut region = Region::new(image.id(), Rect::new(0.25, 0.5, 0.75, 1.0));
        region.refresh(Some(&image));
        assert_eq!(region.bounds(), Rect::new(150.0, 150.0, 250.0, 200.0));

        image.position = Point::new(0.0, 0.0);
        region.refresh(Some(&image));
        assert_eq!(region.bounds(), Rect::new(50.0, 50.0, 150.0, 100.0));
    }

    #[test]
    fn test_from_absolute() {
        let image = Image::new("http://localhost/a.png", Point::new(0.0, 0.0)).with_size(100.0, 100.0);
        let region = Region::from_absolute(&image, Rect::new(10.0, 20.0, 30.0, 40.0));
        assert!((region.relative.x0 - 0.1).abs() < 1e-9);
        assert!((region.relative.y1 - 0.4).abs() < 1e-9);
        assert_eq!(region.bounds(), Rect::new(10.0, 20.0, 30.0, 40.0));
    }
}
