//! Point annotation handler.

use super::{ObjectHandler, SnapshotCodec};
use crate::objects::{CanvasObject, Category, ObjectId, PointMarker};

pub type PointHandler = ObjectHandler<PointMarker>;

impl SnapshotCodec for PointMarker {
    const CATEGORY: Category = Category::Point;

    fn from_object(object: &CanvasObject) -> Option<&Self> {
        match object {
            CanvasObject::Point(p) => Some(p),
            _ => None,
        }
    }

    fn from_object_mut(object: &mut CanvasObject) -> Option<&mut Self> {
        match object {
            CanvasObject::Point(p) => Some(p),
            _ => None,
        }
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn into_object(self) -> CanvasObject {
        CanvasObject::Point(self)
    }
}
