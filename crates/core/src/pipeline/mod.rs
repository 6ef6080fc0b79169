pub mod config;
pub mod detection_stage;
pub mod events;
