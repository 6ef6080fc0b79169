use std::error::Error;
use std::path::Path;

use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::{FrameGeometry, GrayFrame, NegotiateError};

/// Seam for per-frame gesture detectors.
///
/// Implementations hold no cross-frame detection state: `detect` describes
/// the current frame only. A detector whose profile failed to load simply
/// reports no candidates, so detection itself cannot fail.
pub trait HandDetector: Send {
    /// Sizes internal working buffers for the negotiated geometry.
    ///
    /// Called once up front and again whenever frame geometry changes.
    /// Failure means the detector has no valid scratch memory and the
    /// stage cannot process frames.
    fn negotiate(&mut self, geometry: FrameGeometry) -> Result<(), NegotiateError>;

    /// Loads (or replaces) the classifier profile from `path`.
    ///
    /// On failure any previously loaded profile is discarded, leaving the
    /// detector without a model.
    fn load_profile(&mut self, path: &Path) -> Result<(), Box<dyn Error>>;

    fn has_model(&self) -> bool;

    /// Candidate boxes for this frame, in detection order.
    fn detect(&mut self, gray: &GrayFrame) -> Vec<BoundingBox>;
}
