use std::path::PathBuf;

use crate::shared::constants::DEFAULT_PROFILE;

/// Runtime settings of the detection stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageConfig {
    /// Cascade profile file the detector loads.
    pub profile: PathBuf,
    /// Draw the tracked-region marker onto outgoing frames.
    pub display: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE.into(),
            display: true,
        }
    }
}
