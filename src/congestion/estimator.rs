use std::time::Instant;

/// Output of a delay-based bandwidth estimator: the current verdict on
/// whether the link is congested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthUsage {
    Normal,
    Underusing,
    Overusing,
}

/// Shared interface for the two interchangeable delay-based estimators
/// ([`crate::congestion::kalman::KalmanEstimator`] and
/// [`crate::congestion::trendline::TrendlineEstimator`]). Both consume
/// per-frame one-way-delay gradient samples and classify the channel.
pub trait Estimator: Send {
    /// Feed one gradient sample: `recv_delta_ms` and `send_delta_ms` are the
    /// inter-arrival and inter-departure gaps between this frame and the
    /// previous one; `arrival_time` is when this frame's last packet arrived.
    fn update(&mut self, recv_delta_ms: f64, send_delta_ms: f64, arrival_time: Instant);

    /// Current classification, valid after at least one `update`.
    fn state(&self) -> BandwidthUsage;
}
