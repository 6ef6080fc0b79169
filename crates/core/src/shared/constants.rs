/// Cascade profile consulted when no explicit path is configured, the
/// conventional install location of the stock fist classifier.
pub const DEFAULT_PROFILE: &str = "/usr/local/share/opencv/haarcascades/fist.xml";

/// Gesture label attached to every detection event.
pub const GESTURE_FIST: &str = "fist";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
