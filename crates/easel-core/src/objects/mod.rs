//! Live canvas objects.
//!
//! The drawing surface owns geometry; these types carry just enough state for
//! the history engine to snapshot and restore each object category.

mod image;
mod point;
mod rectangle;
mod region;

pub use image::Image;
pub use point::PointMarker;
pub use rectangle::Rectangle;
pub use region::Region;

use kurbo::{Affine, Rect};
use peniko::Color;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for canvas objects.
///
/// Ids are plain strings so that ids assigned by the server (for injected
/// images) and by other clients round-trip through the wire unchanged.
pub type ObjectId = String;

/// Generate a fresh object id.
pub fn new_object_id() -> ObjectId {
    Uuid::new_v4().to_string()
}

/// Object category. Each category has exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Rectangle,
    Image,
    Point,
    Region,
}

impl Category {
    /// All categories, in registration order.
    pub const ALL: [Category; 4] = [
        Category::Rectangle,
        Category::Image,
        Category::Point,
        Category::Region,
    ];

    /// The handler id stored in serialized history records.
    pub fn handler_id(&self) -> &'static str {
        match self {
            Category::Rectangle => "rectangle",
            Category::Image => "image",
            Category::Point => "point",
            Category::Region => "region",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.handler_id())
    }
}

/// Error returned when a handler id does not name a known category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.handler_id() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    /// Default annotation color (a saturated red).
    pub fn annotation() -> Self {
        Self::new(230, 57, 70, 255)
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Stroke and fill properties shared by drawable objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStyle {
    /// Stroke color.
    pub stroke_color: SerializableColor,
    /// Stroke width.
    pub stroke_width: f64,
    /// Fill color (None = no fill).
    pub fill_color: Option<SerializableColor>,
    /// Overall opacity (0.0 = fully transparent, 1.0 = fully opaque).
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_opacity() -> f64 {
    1.0
}

impl ObjectStyle {
    /// Get the stroke color as a peniko Color.
    pub fn stroke(&self) -> Color {
        self.stroke_color.into()
    }

    /// Get the fill color as a peniko Color.
    pub fn fill(&self) -> Option<Color> {
        self.fill_color.map(|c| c.into())
    }

    /// Set the stroke color from a peniko Color.
    pub fn set_stroke(&mut self, color: Color) {
        self.stroke_color = color.into();
    }

    /// Set the fill color from a peniko Color.
    pub fn set_fill(&mut self, color: Option<Color>) {
        self.fill_color = color.map(|c| c.into());
    }
}

impl Default for ObjectStyle {
    fn default() -> Self {
        Self {
            stroke_color: SerializableColor::black(),
            stroke_width: 2.0,
            fill_color: None,
            opacity: 1.0,
        }
    }
}

/// A live object on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasObject {
    Rectangle(Rectangle),
    Image(Image),
    Point(PointMarker),
    Region(Region),
}

impl CanvasObject {
    pub fn id(&self) -> &str {
        match self {
            CanvasObject::Rectangle(o) => &o.id,
            CanvasObject::Image(o) => &o.id,
            CanvasObject::Point(o) => &o.id,
            CanvasObject::Region(o) => &o.id,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            CanvasObject::Rectangle(_) => Category::Rectangle,
            CanvasObject::Image(_) => Category::Image,
            CanvasObject::Point(_) => Category::Point,
            CanvasObject::Region(_) => Category::Region,
        }
    }

    /// Bounding box in world coordinates.
    pub fn bounds(&self) -> Rect {
        match self {
            CanvasObject::Rectangle(o) => o.as_rect(),
            CanvasObject::Image(o) => o.as_rect(),
            CanvasObject::Point(o) => o.bounds(),
            CanvasObject::Region(o) => o.bounds(),
        }
    }

    /// Apply a transform to this object.
    ///
    /// Regions are positioned relative to their parent image and ignore
    /// direct transforms; move the image instead.
    pub fn transform(&mut self, affine: Affine) {
        match self {
            CanvasObject::Rectangle(o) => o.transform(affine),
            CanvasObject::Image(o) => o.transform(affine),
            CanvasObject::Point(o) => o.transform(affine),
            CanvasObject::Region(_) => {}
        }
    }

    pub fn as_image(&self) -> Option<&Image> {
        match self {
            CanvasObject::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn as_region_mut(&mut self) -> Option<&mut Region> {
        match self {
            CanvasObject::Region(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Rectangle> for CanvasObject {
    fn from(o: Rectangle) -> Self {
        CanvasObject::Rectangle(o)
    }
}

impl From<Image> for CanvasObject {
    fn from(o: Image) -> Self {
        CanvasObject::Image(o)
    }
}

impl From<PointMarker> for CanvasObject {
    fn from(o: PointMarker) -> Self {
        CanvasObject::Point(o)
    }
}

impl From<Region> for CanvasObject {
    fn from(o: Region) -> Self {
        CanvasObject::Region(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::{Point, Vec2};

    #[test]
    fn test_category_handler_id_roundtrip() {
        for category in Category::ALL {
            assert_eq!(category.handler_id().parse::<Category>(), Ok(category));
        }
        assert!("ellipse".parse::<Category>().is_err());
    }

    #[test]
    fn test_transform_moves_rectangle() {
        let mut obj = CanvasObject::from(Rectangle::new(Point::new(0.0, 0.0), 10.0, 10.0));
        obj.transform(Affine::translate(Vec2::new(5.0, 5.0)));
        let bounds = obj.bounds();
        assert!((bounds.x0 - 5.0).abs() < f64::EPSILON);
        assert!((bounds.y1 - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_color_conversion() {
        let color = SerializableColor::new(10, 20, 30, 255);
        let peniko: Color = color.into();
        assert_eq!(SerializableColor::from(peniko), color);
    }
}
