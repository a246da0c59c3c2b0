use std::time::{Duration, Instant};

use crate::congestion::estimator::{BandwidthUsage, Estimator};
use crate::congestion::kalman::KalmanEstimator;
use crate::congestion::trendline::TrendlineEstimator;
use crate::rtcp::remb::Remb;

/// Minimum spacing between two decrease REMBs.
const DECREASE_RATE_LIMIT: Duration = Duration::from_millis(500);
/// How long the channel must sit `Normal` before an increase REMB is allowed.
const INCREASE_AFTER_SUSTAINED_NORMAL: Duration = Duration::from_secs(1);

/// Sentinel carried in REMB's `bitrate_bps` field meaning "peer, please
/// decrease"; see `spec` Open Question on REMB sentinel collision.
pub const REMB_DECREASE_SENTINEL: u64 = 0x6803;
/// Sentinel carried in REMB's `bitrate_bps` field meaning "peer, please increase".
pub const REMB_INCREASE_SENTINEL: u64 = 0x7378;

/// Which of the two estimators backs a [`CongestionControl`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorKind {
    Kalman,
    Trendline,
}

/// A REMB this peer should now emit towards the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RembIntent {
    Decrease,
    Increase,
}

/// Delay-based congestion controller: wraps one of the two interchangeable
/// estimators and applies the REMB emission policy (rate-limited decreases,
/// sustained-normal-gated increases) described in the adaptive bitrate spec.
pub struct CongestionControl {
    estimator: Box<dyn Estimator>,
    prev_state: BandwidthUsage,
    last_decrease: Option<Instant>,
    last_emit: Option<Instant>,
    normal_since: Option<Instant>,
}

impl CongestionControl {
    pub fn new(kind: EstimatorKind) -> Self {
        let estimator: Box<dyn Estimator> = match kind {
            EstimatorKind::Kalman => Box::new(KalmanEstimator::new()),
            EstimatorKind::Trendline => Box::new(TrendlineEstimator::new()),
        };
        Self {
            estimator,
            prev_state: BandwidthUsage::Normal,
            last_decrease: None,
            last_emit: None,
            normal_since: None,
        }
    }

    /// Feed one inter-frame delay-gradient sample and evaluate the REMB
    /// emission policy against the estimator's (possibly unchanged) verdict.
    pub fn on_sample(
        &mut self,
        recv_delta_ms: f64,
        send_delta_ms: f64,
        arrival_time: Instant,
    ) -> Option<RembIntent> {
        self.estimator.update(recv_delta_ms, send_delta_ms, arrival_time);
        let state = self.estimator.state();
        let intent = self.evaluate(state, arrival_time);
        self.prev_state = state;
        intent
    }

    fn evaluate(&mut self, state: BandwidthUsage, now: Instant) -> Option<RembIntent> {
        if state == BandwidthUsage::Overusing {
            self.normal_since = None;
            if self.prev_state != BandwidthUsage::Overusing {
                let allowed = self
                    .last_decrease
                    .is_none_or(|t| now.saturating_duration_since(t) >= DECREASE_RATE_LIMIT);
                if allowed {
                    self.last_decrease = Some(now);
                    self.last_emit = Some(now);
                    return Some(RembIntent::Decrease);
                }
            }
            return None;
        }

        if state != BandwidthUsage::Normal {
            self.normal_since = None;
            return None;
        }

        let since = *self.normal_since.get_or_insert(now);
        if now.saturating_duration_since(since) >= INCREASE_AFTER_SUSTAINED_NORMAL {
            let eligible = self
                .last_emit
                .is_none_or(|t| now.saturating_duration_since(t) >= INCREASE_AFTER_SUSTAINED_NORMAL);
            if eligible {
                self.last_emit = Some(now);
                self.normal_since = Some(now);
                return Some(RembIntent::Increase);
            }
        }
        None
    }

    /// Builds the REMB packet corresponding to an emitted intent, encoding
    /// the sentinel value rather than a literal bitrate.
    pub fn build_remb(sender_ssrc: u32, media_ssrcs: Vec<u32>, intent: RembIntent) -> Remb {
        let bitrate = match intent {
            RembIntent::Decrease => REMB_DECREASE_SENTINEL,
            RembIntent::Increase => REMB_INCREASE_SENTINEL,
        };
        Remb::new(sender_ssrc, bitrate, media_ssrcs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sustained_overuse_emits_single_decrease_until_rate_limit_clears() {
        let mut cc = CongestionControl::new(EstimatorKind::Kalman);
        let mut t = Instant::now();
        let mut saw_decrease = 0;
        for _ in 0..60 {
            t += Duration::from_millis(30);
            if let Some(RembIntent::Decrease) = cc.on_sample(40.0, 0.0, t) {
                saw_decrease += 1;
            }
        }
        assert_eq!(saw_decrease, 1, "decrease must be rate-limited to once per overuse onset");
    }

    #[test]
    fn flat_channel_never_emits() {
        let mut cc = CongestionControl::new(EstimatorKind::Trendline);
        let mut t = Instant::now();
        for _ in 0..50 {
            t += Duration::from_millis(30);
            assert_eq!(cc.on_sample(10.0, 10.0, t), None);
        }
    }

    #[test]
    fn build_remb_uses_sentinel_values() {
        let r = CongestionControl::build_remb(1, vec![2], RembIntent::Decrease);
        assert_eq!(r.bitrate_bps, REMB_DECREASE_SENTINEL);
        let r = CongestionControl::build_remb(1, vec![2], RembIntent::Increase);
        assert_eq!(r.bitrate_bps, REMB_INCREASE_SENTINEL);
    }
}
