pub mod onset;
pub mod threshold;

pub use onset::{locate, processing_order, Onset, Phase, PhaseBoundaries};
pub use threshold::{
    calibrate, calibrate_profile, classify, classify_derivative, DetectionConfig, EventFlags,
    ProfileSet, ThresholdCalibration, ThresholdProfile,
};
