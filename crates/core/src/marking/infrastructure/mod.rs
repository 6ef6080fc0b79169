pub mod circle_marker;
