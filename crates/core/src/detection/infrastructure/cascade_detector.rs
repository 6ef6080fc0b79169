//! Haar cascade sliding-window detector.

use std::error::Error;
use std::path::Path;

use imageproc::edges::canny;
use log::info;

use crate::detection::domain::hand_detector::HandDetector;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::{FrameGeometry, GrayFrame, NegotiateError};

use super::cascade_loader::load_cascade;
use super::cascade_model::CascadeModel;
use super::grouping;
use super::integral::{EdgeIntegral, IntegralImage};

const SCALE_STEP: f64 = 1.1;
const MIN_NEIGHBORS: usize = 2;
const CANNY_LOW: f32 = 10.0;
const CANNY_HIGH: f32 = 50.0;
/// Windows whose canny edge density falls below this fraction are skipped
/// without evaluating the cascade.
const MIN_EDGE_DENSITY: f64 = 0.02;

/// Sliding-window detector that evaluates a loaded cascade at every scale
/// from the trained window size up to the frame size.
pub struct CascadeDetector {
    model: Option<CascadeModel>,
    integral: Option<IntegralImage>,
    edges: Option<EdgeIntegral>,
    windows: Vec<BoundingBox>,
}

impl CascadeDetector {
    pub fn new() -> Self {
        Self {
            model: None,
            integral: None,
            edges: None,
            windows: Vec::new(),
        }
    }
}

impl Default for CascadeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl HandDetector for CascadeDetector {
    fn negotiate(&mut self, geometry: FrameGeometry) -> Result<(), NegotiateError> {
        let integral = IntegralImage::with_geometry(geometry)?;
        let edges = EdgeIntegral::with_geometry(geometry)?;
        self.integral = Some(integral);
        self.edges = Some(edges);
        Ok(())
    }

    fn load_profile(&mut self, path: &Path) -> Result<(), Box<dyn Error>> {
        match load_cascade(path) {
            Ok(model) => {
                info!(
                    "cascade profile {} holds {} stages for a {}x{} window",
                    path.display(),
                    model.stage_count(),
                    model.window_width(),
                    model.window_height()
                );
                self.model = Some(model);
                Ok(())
            }
            Err(error) => {
                self.model = None;
                Err(Box::new(error))
            }
        }
    }

    fn has_model(&self) -> bool {
        self.model.is_some()
    }

    fn detect(&mut self, gray: &GrayFrame) -> Vec<BoundingBox> {
        let Self {
            model,
            integral,
            edges,
            windows,
        } = self;
        let (Some(model), Some(integral), Some(edges)) =
            (model.as_ref(), integral.as_mut(), edges.as_mut())
        else {
            return Vec::new();
        };

        windows.clear();
        integral.fill(gray);
        let edge_map = canny(gray.image(), CANNY_LOW, CANNY_HIGH);
        edges.fill(&edge_map);

        let geometry = gray.geometry();
        let frame_width = geometry.width as usize;
        let frame_height = geometry.height as usize;
        let base_width = model.window_width() as usize;
        let base_height = model.window_height() as usize;

        let mut scale = 1.0f64;
        loop {
            let win_width = (base_width as f64 * scale).round() as usize;
            let win_height = (base_height as f64 * scale).round() as usize;
            if win_width > frame_width || win_height > frame_height {
                break;
            }
            let stride = scale.round().max(2.0) as usize;
            let min_edges = (win_width * win_height) as f64 * MIN_EDGE_DENSITY;

            let mut y = 0;
            while y + win_height <= frame_height {
                let mut x = 0;
                while x + win_width <= frame_width {
                    if f64::from(edges.window_count(x, y, x + win_width, y + win_height))
                        >= min_edges
                        && model.passes(integral, x, y, win_width, win_height, scale)
                    {
                        windows.push(BoundingBox::new(
                            x as i32,
                            y as i32,
                            win_width as i32,
                            win_height as i32,
                        ));
                    }
                    x += stride;
                }
                y += stride;
            }
            scale *= SCALE_STEP;
        }

        grouping::group_windows(windows, MIN_NEIGHBORS)
    }
}
