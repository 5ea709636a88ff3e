//! Region annotation handler.

use super::{ObjectHandler, SnapshotCodec};
use crate::objects::{CanvasObject, Category, ObjectId, Region};

pub type RegionHandler = ObjectHandler<Region>;

impl SnapshotCodec for Region {
    const CATEGORY: Category = Category::Region;

    fn from_object(object: &CanvasObject) -> Option<&Self> {
        match object {
            CanvasObject::Region(r) => Some(r),
            _ => None,
        }
    }

    fn from_object_mut(object: &mut CanvasObject) -> Option<&mut Self> {
        object.as_region_mut()
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn into_object(self) -> CanvasObject {
        CanvasObject::Region(self)
    }
}
