pub mod cascade_detector;
pub mod cascade_loader;
pub mod cascade_model;
mod grouping;
pub mod integral;
