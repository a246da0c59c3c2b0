use std::time::Instant;

use crate::congestion::estimator::{BandwidthUsage, Estimator};

/// Process noise variance of the scalar gradient estimate.
const PROCESS_NOISE_Q: f64 = 0.5;
/// Smoothing factor for the measurement-noise-variance estimate.
const NOISE_BETA: f64 = 0.95;
/// Adaptive-threshold gain while the gradient sits above the threshold.
const K_UP: f64 = 0.004;
/// Adaptive-threshold gain while the gradient sits below the threshold.
const K_DOWN: f64 = 0.002;
/// Minimum consecutive overuse samples, spanning at least this long, before
/// a transient spike is promoted to a sustained `Overusing` verdict.
const OVERUSE_MIN_SAMPLES: u32 = 2;
const OVERUSE_MIN_SPAN_MS: f64 = 100.0;

const THRESHOLD_MIN: f64 = 1.0;
const THRESHOLD_MAX: f64 = 600.0;

/// Scalar Kalman filter over the one-way-delay gradient (`recv_delta - send_delta`).
///
/// Tracks a single state variable, the filtered gradient `m`, with an
/// adaptive overuse threshold `gamma` that drifts towards `|m|` at different
/// rates depending on whether the channel currently looks congested.
#[derive(Debug, Clone)]
pub struct KalmanEstimator {
    m: f64,
    p: f64,
    var_n: f64,
    gamma: f64,
    state: BandwidthUsage,
    last_update: Option<Instant>,
    overuse_count: u32,
    first_overuse_at: Option<Instant>,
}

impl Default for KalmanEstimator {
    fn default() -> Self {
        Self {
            m: 0.0,
            p: 10.0,
            var_n: 50.0,
            gamma: 12.5,
            state: BandwidthUsage::Normal,
            last_update: None,
            overuse_count: 0,
            first_overuse_at: None,
        }
    }
}

impl KalmanEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filtered gradient estimate, for diagnostics.
    pub fn filtered_gradient(&self) -> f64 {
        self.m
    }

    /// Current adaptive threshold, for diagnostics.
    pub fn threshold(&self) -> f64 {
        self.gamma
    }
}

impl Estimator for KalmanEstimator {
    fn update(&mut self, recv_delta_ms: f64, send_delta_ms: f64, arrival_time: Instant) {
        let dt_ms = match self.last_update {
            Some(prev) => (arrival_time.saturating_duration_since(prev).as_secs_f64() * 1000.0).max(1.0),
            None => 1.0,
        };
        self.last_update = Some(arrival_time);

        let d = recv_delta_ms - send_delta_ms;

        // Predict
        let p_pred = self.p + PROCESS_NOISE_Q;

        // Update
        let residual = d - self.m;
        let k = p_pred / (p_pred + self.var_n);
        self.m += k * residual;
        self.p = (1.0 - k) * p_pred;
        self.var_n = NOISE_BETA * self.var_n + (1.0 - NOISE_BETA) * residual * residual;

        // Adaptive threshold
        let abs_m = self.m.abs();
        let k_gain = if abs_m > self.gamma { K_UP } else { K_DOWN };
        self.gamma += k_gain * (abs_m - self.gamma) * dt_ms;
        self.gamma = self.gamma.clamp(THRESHOLD_MIN, THRESHOLD_MAX);

        if self.m > self.gamma {
            if self.first_overuse_at.is_none() {
                self.first_overuse_at = Some(arrival_time);
                self.overuse_count = 1;
            } else {
                self.overuse_count += 1;
            }
            let span_ms = self
                .first_overuse_at
                .map(|t| arrival_time.saturating_duration_since(t).as_secs_f64() * 1000.0)
                .unwrap_or(0.0);
            if self.overuse_count >= OVERUSE_MIN_SAMPLES && span_ms >= OVERUSE_MIN_SPAN_MS {
                self.state = BandwidthUsage::Overusing;
            }
        } else {
            self.overuse_count = 0;
            self.first_overuse_at = None;
            self.state = if self.m < -self.gamma {
                BandwidthUsage::Underusing
            } else {
                BandwidthUsage::Normal
            };
        }
    }

    fn state(&self) -> BandwidthUsage {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_normal() {
        let e = KalmanEstimator::new();
        assert_eq!(e.state(), BandwidthUsage::Normal);
    }

    #[test]
    fn sustained_positive_gradient_declares_overuse() {
        let mut e = KalmanEstimator::new();
        let mut t = Instant::now();
        for _ in 0..50 {
            t += Duration::from_millis(30);
            e.update(40.0, 0.0, t);
        }
        assert_eq!(e.state(), BandwidthUsage::Overusing);
    }

    #[test]
    fn single_spike_does_not_declare_overuse() {
        let mut e = KalmanEstimator::new();
        let t0 = Instant::now();
        e.update(40.0, 0.0, t0);
        assert_ne!(e.state(), BandwidthUsage::Overusing);
    }

    #[test]
    fn zero_gradient_stays_normal() {
        let mut e = KalmanEstimator::new();
        let mut t = Instant::now();
        for _ in 0..20 {
            t += Duration::from_millis(30);
            e.update(0.0, 0.0, t);
        }
        assert_eq!(e.state(), BandwidthUsage::Normal);
    }
}
