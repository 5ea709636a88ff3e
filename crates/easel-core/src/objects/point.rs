//! Point annotation.

use super::{new_object_id, ObjectId, SerializableColor};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// A labelled point marker, optionally pinned to an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointMarker {
    #[serde(skip)]
    pub(crate) id: ObjectId,
    /// Marker center in world coordinates.
    pub position: Point,
    /// Marker radius.
    pub radius: f64,
    /// Annotation label.
    #[serde(default)]
    pub label: String,
    /// Marker color.
    pub color: SerializableColor,
    /// Image this marker annotates, if any.
    #[serde(default)]
    pub parent: Option<ObjectId>,
}

impl PointMarker {
    pub const DEFAULT_RADIUS: f64 = 6.0;

    pub fn new(position: Point) -> Self {
        Self {
            id: new_object_id(),
            position,
            radius: Self::DEFAULT_RADIUS,
            label: String::new(),
            color: SerializableColor::annotation(),
            parent: None,
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

    pub fn with_parent(mut self, parent: impl Into<ObjectId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_center_size(self.position, (self.radius * 2.0, self.radius * 2.0))
    }

    pub(crate) fn transform(&mut self, affine: Affine) {
        // Markers keep their on-screen size.
        self.position = affine * self.position;
    }
}
