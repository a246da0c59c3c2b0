use std::collections::VecDeque;
use std::time::Instant;

use crate::congestion::estimator::{BandwidthUsage, Estimator};

/// Smoothing factor applied to the running accumulated-delay signal.
const SMOOTHING_ALPHA: f64 = 0.9;
/// Samples retained for the least-squares slope fit.
const WINDOW_LEN: usize = 20;
/// Multiplies the raw regression slope before comparing against the threshold.
const TREND_GAIN: f64 = 4.0;
/// Caps how many samples contribute to the trend's magnitude scaling.
const TREND_SAMPLE_CAP: f64 = 60.0;

const K_UP: f64 = 0.0087;
const K_DOWN: f64 = 0.039;
const THRESHOLD_MIN: f64 = 6.0;
const THRESHOLD_MAX: f64 = 600.0;

/// Minimum sustained excursion above threshold, in ms, before declaring overuse.
const OVERUSE_MIN_SPAN_MS: f64 = 10.0;
const OVERUSE_MIN_SAMPLES: usize = 2;

/// Trendline bandwidth estimator: an exponentially-smoothed accumulated
/// one-way-delay signal, fit with a least-squares slope over a 20-sample
/// sliding window, compared against an adaptively drifting threshold.
#[derive(Debug, Clone)]
pub struct TrendlineEstimator {
    accumulated_delay_ms: f64,
    smoothed_delay_ms: f64,
    history: VecDeque<(f64, f64)>, // (arrival_time_ms, smoothed_delay_ms)
    num_deltas: u64,
    threshold: f64,
    state: BandwidthUsage,
    last_update: Option<Instant>,
    epoch: Option<Instant>,
    first_overuse_at: Option<Instant>,
    last_slope: f64,
}

impl Default for TrendlineEstimator {
    fn default() -> Self {
        Self {
            accumulated_delay_ms: 0.0,
            smoothed_delay_ms: 0.0,
            history: VecDeque::with_capacity(WINDOW_LEN),
            num_deltas: 0,
            threshold: 12.5,
            state: BandwidthUsage::Normal,
            last_update: None,
            epoch: None,
            first_overuse_at: None,
            last_slope: 0.0,
        }
    }
}

impl TrendlineEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn arrival_time_ms(&self, t: Instant) -> f64 {
        let epoch = self.epoch.unwrap_or(t);
        t.saturating_duration_since(epoch).as_secs_f64() * 1000.0
    }

    fn slope(&self) -> Option<f64> {
        if self.history.len() < OVERUSE_MIN_SAMPLES {
            return None;
        }
        let n = self.history.len() as f64;
        let x_mean = self.history.iter().map(|(x, _)| x).sum::<f64>() / n;
        let y_mean = self.history.iter().map(|(_, y)| y).sum::<f64>() / n;

        let mut num = 0.0;
        let mut den = 0.0;
        for &(x, y) in &self.history {
            num += (x - x_mean) * (y - y_mean);
            den += (x - x_mean) * (x - x_mean);
        }
        if den.abs() < f64::EPSILON {
            Some(0.0)
        } else {
            Some(num / den)
        }
    }
}

impl Estimator for TrendlineEstimator {
    fn update(&mut self, recv_delta_ms: f64, send_delta_ms: f64, arrival_time: Instant) {
        if self.epoch.is_none() {
            self.epoch = Some(arrival_time);
        }
        let dt_ms = match self.last_update {
            Some(prev) => (arrival_time.saturating_duration_since(prev).as_secs_f64() * 1000.0).max(1.0),
            None => 1.0,
        };
        self.last_update = Some(arrival_time);
        self.num_deltas += 1;

        let delta = recv_delta_ms - send_delta_ms;
        self.accumulated_delay_ms += delta;
        self.smoothed_delay_ms = SMOOTHING_ALPHA * self.smoothed_delay_ms
            + (1.0 - SMOOTHING_ALPHA) * self.accumulated_delay_ms;

        let t_ms = self.arrival_time_ms(arrival_time);
        if self.history.len() == WINDOW_LEN {
            self.history.pop_front();
        }
        self.history.push_back((t_ms, self.smoothed_delay_ms));

        let Some(slope) = self.slope() else {
            return;
        };
        let non_decreasing = slope >= self.last_slope;
        self.last_slope = slope;

        let cap = (self.num_deltas as f64).min(TREND_SAMPLE_CAP);
        let modified_trend = slope * TREND_GAIN * cap;

        let gain = if modified_trend > self.threshold { K_UP } else { K_DOWN };
        self.threshold += gain * (modified_trend.abs() - self.threshold) * dt_ms;
        self.threshold = self.threshold.clamp(THRESHOLD_MIN, THRESHOLD_MAX);

        if modified_trend > self.threshold {
            if self.first_overuse_at.is_none() {
                self.first_overuse_at = Some(arrival_time);
            }
            let span_ms = self
                .first_overuse_at
                .map(|t| arrival_time.saturating_duration_since(t).as_secs_f64() * 1000.0)
                .unwrap_or(0.0);
            if span_ms >= OVERUSE_MIN_SPAN_MS
                && non_decreasing
                && self.history.len() >= OVERUSE_MIN_SAMPLES
            {
                self.state = BandwidthUsage::Overusing;
            }
        } else {
            self.first_overuse_at = None;
            self.state = if modified_trend < -self.threshold {
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
        let e = TrendlineEstimator::new();
        assert_eq!(e.state(), BandwidthUsage::Normal);
    }

    #[test]
    fn growing_delay_trend_declares_overuse() {
        let mut e = TrendlineEstimator::new();
        let mut t = Instant::now();
        for i in 0..40 {
            t += Duration::from_millis(30);
            e.update(20.0 + i as f64, 0.0, t);
        }
        assert_eq!(e.state(), BandwidthUsage::Overusing);
    }

    #[test]
    fn flat_delay_stays_normal() {
        let mut e = TrendlineEstimator::new();
        let mut t = Instant::now();
        for _ in 0..40 {
            t += Duration::from_millis(30);
            e.update(10.0, 10.0, t);
        }
        assert_eq!(e.state(), BandwidthUsage::Normal);
    }
}
