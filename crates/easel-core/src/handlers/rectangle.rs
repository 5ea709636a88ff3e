//! Rectangle handler.

use super::{ObjectHandler, SnapshotCodec};
use crate::objects::{CanvasObject, Category, ObjectId, Rectangle};

pub type RectangleHandler = ObjectHandler<Rectangle>;

impl SnapshotCodec for Rectangle {
    const CATEGORY: Category = Category::Rectangle;

    fn from_object(object: &CanvasObject) -> Option<&Self> {
        match object {
            CanvasObject::Rectangle(r) => Some(r),
            _ => None,
        }
    }

    fn from_object_mut(object: &mut CanvasObject) -> Option<&mut Self> {
        match object {
            CanvasObject::Rectangle(r) => Some(r),
            _ => None,
        }
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn into_object(self) -> CanvasObject {
        CanvasObject::Rectangle(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::CategoryHandler;
    use crate::objects::SerializableColor;
    use kurbo::Point;

    #[test]
    fn test_snapshot_restores_style_and_geometry() {
        let handler = RectangleHandler::new();
        let mut rect = Rectangle::new(Point::new(10.0, 20.0), 100.0, 50.0).with_id("r1");
        rect.corner_radius = 8.0;
        rect.rotation = 0.5;
        rect.style.fill_color = Some(SerializableColor::new(0, 255, 0, 128));

        let snapshot = handler.create_snapshot(&CanvasObject::from(rect.clone())).unwrap();
        assert_eq!(snapshot.id, "r1");

        let restored = handler.restore(&snapshot).unwrap();
        assert_eq!(restored, CanvasObject::Rectangle(rect));
    }
}
