use crate::shared::bounding_box::BoundingBox;

/// Starting threshold for the per-frame candidate scan, on the order of the
/// frame diagonal of a 320x240 stream. A frame's first capturing candidate
/// must be at most this far from the tracked corner.
const CAPTURE_CEILING: i32 = 400;

/// Follows the single "best" hand across frames by nearest-corner matching.
///
/// Each frame, candidates are scanned in order and compared by the Euclidean
/// distance between their top-left corner and the tracked box's, truncated
/// to whole pixels. The running threshold starts at [`CAPTURE_CEILING`] and
/// drops to each winner's own distance, so the nearest candidate wins and
/// equal-distance ties go to the earliest one in the sequence. Truncation
/// makes near-ties inside the same whole-pixel bucket order-dependent;
/// callers that need a stable pick should order their candidates
/// deterministically.
///
/// Tracking starts from the zero rectangle, which biases the very first
/// selection toward the frame origin when several candidates appear at once.
#[derive(Debug, Default)]
pub struct NearestTracker {
    current: BoundingBox,
}

impl NearestTracker {
    pub fn new() -> Self {
        Self {
            current: BoundingBox::ZERO,
        }
    }

    /// The most recently selected box, or the zero rectangle before any
    /// candidate has captured the track.
    pub fn current(&self) -> BoundingBox {
        self.current
    }

    /// Feeds one frame's candidates through the tracker.
    ///
    /// Returns `None` when `candidates` is empty (no event this frame, state
    /// untouched). Otherwise returns the box to report: the capturing
    /// candidate, or the previous box unchanged when every candidate sits
    /// beyond the starting threshold.
    pub fn update(&mut self, candidates: &[BoundingBox]) -> Option<BoundingBox> {
        if candidates.is_empty() {
            return None;
        }

        let mut winner: Option<BoundingBox> = None;
        let mut min_distance = CAPTURE_CEILING;
        for &candidate in candidates {
            let distance = self.current.corner_distance(&candidate) as i32;
            let captures = match winner {
                None => distance <= min_distance,
                Some(_) => distance < min_distance,
            };
            if captures {
                min_distance = distance;
                winner = Some(candidate);
            }
        }

        if let Some(best) = winner {
            self.current = best;
        }
        Some(self.current)
    }

    /// Forgets the tracked box, returning to the zero-rectangle seed.
    ///
    /// The stage never calls this on stream flushes; a track deliberately
    /// survives segment changes. Hosts starting an unrelated stream can
    /// reset explicitly.
    pub fn reset(&mut self) {
        self.current = BoundingBox::ZERO;
    }
}
