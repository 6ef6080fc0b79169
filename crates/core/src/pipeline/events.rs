use serde::Serialize;

use crate::shared::bounding_box::BoundingBox;

/// Message emitted for every frame on which a gesture region is reported.
///
/// `x` and `y` carry the region's center so listeners can treat the event
/// as a pointer position; `width` and `height` carry the region's size.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DetectionEvent {
    pub gesture: &'static str,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DetectionEvent {
    pub fn for_region(gesture: &'static str, region: &BoundingBox) -> Self {
        let (cx, cy) = region.center();
        Self {
            gesture,
            x: cx.max(0) as u32,
            y: cy.max(0) as u32,
            width: region.width.max(0) as u32,
            height: region.height.max(0) as u32,
        }
    }
}

/// Stream lifecycle marks that travel through the stage untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    SegmentStart,
    EndOfStream,
    FlushStop,
}
