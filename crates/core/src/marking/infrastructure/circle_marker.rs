use crate::marking::domain::frame_marker::FrameMarker;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::{Frame, FRAME_CHANNELS};

const MARKER_COLOR: [u8; 3] = [0, 0, 200];

/// Draws a one-pixel circle around the tracked region, centered on the
/// region's midpoint with a radius of a quarter of width plus height.
/// Arcs that leave the frame are clipped.
pub struct CircleMarker {
    color: [u8; 3],
}

impl CircleMarker {
    pub fn new() -> Self {
        Self {
            color: MARKER_COLOR,
        }
    }
}

impl Default for CircleMarker {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameMarker for CircleMarker {
    fn mark(&self, frame: &mut Frame, region: &BoundingBox) {
        let (cx, cy) = region.center();
        let radius = ((region.width + region.height) as f64 * 0.25).round() as i32;
        if radius <= 0 {
            return;
        }
        let width = frame.width() as i32;
        let height = frame.height() as i32;
        let data = frame.make_writable();

        let mut plot = |px: i32, py: i32| {
            if px < 0 || py < 0 || px >= width || py >= height {
                return;
            }
            let offset = (py as usize * width as usize + px as usize) * FRAME_CHANNELS;
            data[offset..offset + FRAME_CHANNELS].copy_from_slice(&self.color);
        };

        // Midpoint circle, one octant mirrored eight ways.
        let mut dx = radius;
        let mut dy = 0;
        let mut err = 1 - radius;
        while dy <= dx {
            plot(cx + dx, cy + dy);
            plot(cx - dx, cy + dy);
            plot(cx + dx, cy - dy);
            plot(cx - dx, cy - dy);
            plot(cx + dy, cy + dx);
            plot(cx - dy, cy + dx);
            plot(cx + dy, cy - dx);
            plot(cx - dy, cy - dx);
            dy += 1;
            if err < 0 {
                err += 2 * dy + 1;
            } else {
                dx -= 1;
                err += 2 * (dy - dx) + 1;
            }
        }
    }
}
