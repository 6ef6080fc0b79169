//! Hand gesture detection and tracking for video pipelines.
//!
//! Frames enter a [`pipeline::detection_stage::DetectionStage`], are scanned
//! for the trained gesture with a Haar cascade, narrowed to one tracked
//! region per frame, and published as detection events while the frame
//! itself is optionally marked and passed on.

pub mod detection;
pub mod marking;
pub mod pipeline;
pub mod shared;
