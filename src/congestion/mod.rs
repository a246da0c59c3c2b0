pub mod controller;
pub mod estimator;
pub mod kalman;
pub mod trendline;

pub use controller::{CongestionControl, EstimatorKind, RembIntent};
pub use estimator::{BandwidthUsage, Estimator};
