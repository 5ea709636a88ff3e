//! Image handler.

use super::{ObjectHandler, SnapshotCodec};
use crate::objects::{CanvasObject, Category, Image, ObjectId};

pub type ImageHandler = ObjectHandler<Image>;

impl SnapshotCodec for Image {
    const CATEGORY: Category = Category::Image;

    fn from_object(object: &CanvasObject) -> Option<&Self> {
        match object {
            CanvasObject::Image(img) => Some(img),
            _ => None,
        }
    }

    fn from_object_mut(object: &mut CanvasObject) -> Option<&mut Self> {
        match object {
            CanvasObject::Image(img) => Some(img),
            _ => None,
        }
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn into_object(self) -> CanvasObject {
        CanvasObject::Image(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasDocument;
    use crate::handlers::CategoryHandler;
    use crate::history::HistoryRecord;
    use kurbo::Point;

    #[test]
    fn test_snapshot_carries_source_url() {
        let handler = ImageHandler::new();
        let mut img = Image::new("http://localhost:3001/uploads/cat.png", Point::new(5.0, 5.0)).with_id("img1");
        img.set_natural_size(640, 480, 320.0);

        let snapshot = handler.create_snapshot(&CanvasObject::from(img)).unwrap();
        assert_eq!(snapshot.data["src"], "http://localhost:3001/uploads/cat.png");
        assert_eq!(snapshot.data["naturalWidth"], 640);
    }

    #[test]
    fn test_add_undo_redo() {
        let handler = ImageHandler::new();
        let mut document = CanvasDocument::new();
        let img = CanvasObject::from(Image::new("http://localhost/a.png", Point::ZERO).with_id("img1"));
        let record = HistoryRecord::add("image", vec![handler.create_snapshot(&img).unwrap()], true);

        handler.apply_redo(&mut document, &record);
        assert_eq!(document.get("img1"), Some(&img));

        handler.apply_undo(&mut document, &record);
        assert!(document.is_empty());

        // Undoing again is a no-op, not an error.
        handler.apply_undo(&mut document, &record);
        assert!(document.is_empty());
    }
}
