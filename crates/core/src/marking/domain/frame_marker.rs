use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// Draws a tracked-region marker onto a frame in place.
pub trait FrameMarker: Send {
    fn mark(&self, frame: &mut Frame, region: &BoundingBox);
}
