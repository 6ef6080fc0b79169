pub mod hand_detector;
pub mod nearest_tracker;
