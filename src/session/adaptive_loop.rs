use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::congestion::controller::{REMB_DECREASE_SENTINEL, REMB_INCREASE_SENTINEL};
use crate::rtcp::remb::Remb;
use crate::rtcp::report_block::ReportBlock;

use super::bitrate_info::VideoBitrateInfo;

/// Window over which loss samples are weighted.
const LOSS_WINDOW: Duration = Duration::from_secs(2);
/// Weighted-loss threshold that arms the loss-based decrease.
const WEIGHTED_LOSS_DECREASE_THRESHOLD: f64 = 0.05;
/// Null-loss samples (fraction_lost == 0) are down-weighted to this fraction
/// of their age-based weight.
const NULL_LOSS_WEIGHT_FACTOR: f64 = 0.2;
/// Denominator of the loss-based decrease step, kept literal rather than
/// tuned to a steeper curve.
const LOSS_DECREASE_DIVISOR: f64 = 150.0;
/// Loss feedback is ignored for this long after a sender restart.
const RESTART_GRACE: Duration = Duration::from_secs(1);
/// REMB increase hints are honored only after this much sustained time
/// since the last applied REMB hint.
const REMB_INCREASE_MIN_INTERVAL: Duration = Duration::from_secs(1);

const REMB_DECREASE_FACTOR: f64 = 0.85;
const REMB_INCREASE_FACTOR: f64 = 1.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BitrateDecision {
    NoChange,
    Applied { new_kbps: u32, reason: &'static str },
}

/// Loss-based and delay-based (REMB-hint) bitrate adaptation policy. Pure
/// w.r.t. wall-clock: fed explicit `Instant`s so its two independent
/// policies can be exercised deterministically in tests without a real
/// socket pair or thread.
pub struct AdaptiveLoop {
    loss_history: VecDeque<(Instant, f32)>,
    last_remb_applied: Option<Instant>,
    last_restart: Instant,
}

impl AdaptiveLoop {
    pub fn new(now: Instant) -> Self {
        Self { loss_history: VecDeque::new(), last_remb_applied: None, last_restart: now }
    }

    /// Resets the grace period; loss feedback is ignored for
    /// [`RESTART_GRACE`] after this call.
    pub fn note_restart(&mut self, now: Instant) {
        self.last_restart = now;
        self.loss_history.clear();
    }

    fn prune(&mut self, now: Instant) {
        while let Some((t, _)) = self.loss_history.front() {
            if now.saturating_duration_since(*t) > LOSS_WINDOW {
                self.loss_history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Feeds one tick's worth of Receiver Report blocks and REMB records
    /// (as drained from `SocketPair`) and applies at most one bitrate
    /// mutation to `bitrate`, per the "larger of the two reductions wins;
    /// increases from REMB are applied only when loss-based sees no
    /// congestion" rule.
    pub fn tick(
        &mut self,
        bitrate: &mut VideoBitrateInfo,
        rr_batch: &[ReportBlock],
        remb_batch: &[Remb],
        now: Instant,
    ) -> BitrateDecision {
        for rb in rr_batch {
            self.loss_history.push_back((now, rb.fraction_lost as f32 / 256.0));
        }
        self.prune(now);

        let loss_decrease = self.loss_based_decrease(bitrate.current_kbps, now);
        let remb_decision = self.remb_based(remb_batch, bitrate.current_kbps, now);

        match (loss_decrease, remb_decision) {
            (Some(loss_kbps), Some(RembHint::Decrease(remb_kbps))) => {
                let target = loss_kbps.min(remb_kbps);
                bitrate.set_new_bitrate(target);
                BitrateDecision::Applied { new_kbps: bitrate.current_kbps, reason: "loss+remb decrease" }
            }
            (Some(loss_kbps), _) => {
                bitrate.set_new_bitrate(loss_kbps);
                BitrateDecision::Applied { new_kbps: bitrate.current_kbps, reason: "loss decrease" }
            }
            (None, Some(RembHint::Decrease(remb_kbps))) => {
                bitrate.set_new_bitrate(remb_kbps);
                BitrateDecision::Applied { new_kbps: bitrate.current_kbps, reason: "remb decrease" }
            }
            (None, Some(RembHint::Increase(remb_kbps))) => {
                bitrate.set_new_bitrate(remb_kbps);
                BitrateDecision::Applied { new_kbps: bitrate.current_kbps, reason: "remb increase" }
            }
            (None, Some(RembHint::Absolute(remb_kbps))) => {
                bitrate.set_new_bitrate(remb_kbps);
                BitrateDecision::Applied { new_kbps: bitrate.current_kbps, reason: "remb absolute" }
            }
            (None, None) => BitrateDecision::NoChange,
        }
    }

    fn loss_based_decrease(&self, current_kbps: u32, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.last_restart) < RESTART_GRACE {
            return None;
        }
        let Some((_, instantaneous)) = self.loss_history.back().copied() else {
            return None;
        };
        if instantaneous <= 0.0 {
            return None;
        }

        let mut weighted_sum = 0.0_f64;
        let mut weight_total = 0.0_f64;
        for (t, loss) in &self.loss_history {
            let age_ms = now.saturating_duration_since(*t).as_millis() as f64;
            let mut weight = (100.0 - age_ms * 0.01).max(0.0);
            if *loss == 0.0 {
                weight *= NULL_LOSS_WEIGHT_FACTOR;
            }
            weighted_sum += weight * (*loss as f64);
            weight_total += weight;
        }
        if weight_total <= 0.0 {
            return None;
        }
        let weighted_loss = weighted_sum / weight_total;
        if weighted_loss < WEIGHTED_LOSS_DECREASE_THRESHOLD {
            return None;
        }

        let target = (current_kbps as f64) * (1.0 - (instantaneous as f64) / LOSS_DECREASE_DIVISOR);
        Some(target.floor() as u32)
    }

    fn remb_based(&mut self, remb_batch: &[Remb], current_kbps: u32, now: Instant) -> Option<RembHint> {
        let remb = remb_batch.last()?;
        let hint = match remb.bitrate_bps {
            REMB_DECREASE_SENTINEL => {
                RembHint::Decrease(((current_kbps as f64) * REMB_DECREASE_FACTOR).floor() as u32)
            }
            REMB_INCREASE_SENTINEL => {
                let eligible = self
                    .last_remb_applied
                    .is_none_or(|t| now.saturating_duration_since(t) >= REMB_INCREASE_MIN_INTERVAL);
                if !eligible {
                    return None;
                }
                RembHint::Increase(((current_kbps as f64) * REMB_INCREASE_FACTOR).ceil() as u32)
            }
            other => RembHint::Absolute((other / 1000) as u32),
        };
        self.last_remb_applied = Some(now);
        Some(hint)
    }
}

#[derive(Debug, Clone, Copy)]
enum RembHint {
    Decrease(u32),
    Increase(u32),
    Absolute(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rr(fraction_lost: u8) -> ReportBlock {
        ReportBlock { ssrc: 1, fraction_lost, ..Default::default() }
    }

    #[test]
    fn loss_driven_decrease_matches_weighted_formula() {
        let mut bitrate = VideoBitrateInfo::new(100, 2000, 1000);
        let mut t = Instant::now();
        let mut al = AdaptiveLoop::new(t);
        al.note_restart(t);
        t += Duration::from_secs(2); // clear the 1s grace

        let decision = al.tick(&mut bitrate, &[rr(51)], &[], t);
        match decision {
            BitrateDecision::Applied { new_kbps, .. } => {
                let expected = (1000.0 * (1.0 - (51.0 / 256.0) / 150.0)).floor() as u32;
                assert_eq!(new_kbps, expected);
                assert!(new_kbps < 1000 && new_kbps > 990);
            }
            BitrateDecision::NoChange => panic!("expected a decrease"),
        }
    }

    #[test]
    fn loss_ignored_during_restart_grace() {
        let mut bitrate = VideoBitrateInfo::new(100, 2000, 1000);
        let t = Instant::now();
        let mut al = AdaptiveLoop::new(t);
        al.note_restart(t);
        let decision = al.tick(&mut bitrate, &[rr(200)], &[], t + Duration::from_millis(500));
        assert_eq!(decision, BitrateDecision::NoChange);
    }

    #[test]
    fn remb_decrease_sentinel_cuts_15_percent() {
        let mut bitrate = VideoBitrateInfo::new(100, 2000, 1000);
        let t = Instant::now();
        let mut al = AdaptiveLoop::new(t);
        let remb = Remb::new(1, REMB_DECREASE_SENTINEL, vec![2]);
        let decision = al.tick(&mut bitrate, &[], &[remb], t);
        assert_eq!(decision, BitrateDecision::Applied { new_kbps: 850, reason: "remb decrease" });
    }

    #[test]
    fn remb_increase_sentinel_requires_1s_since_last_hint() {
        let mut bitrate = VideoBitrateInfo::new(100, 2000, 1000);
        let t = Instant::now();
        let mut al = AdaptiveLoop::new(t);
        let decrease = Remb::new(1, REMB_DECREASE_SENTINEL, vec![2]);
        al.tick(&mut bitrate, &[], &[decrease], t);

        let increase = Remb::new(1, REMB_INCREASE_SENTINEL, vec![2]);
        // Too soon: ignored.
        let immediate = al.tick(&mut bitrate, &[], &[increase.clone()], t + Duration::from_millis(100));
        assert_eq!(immediate, BitrateDecision::NoChange);

        let later = al.tick(&mut bitrate, &[], &[increase], t + Duration::from_millis(1100));
        match later {
            BitrateDecision::Applied { new_kbps, reason: "remb increase" } => {
                assert_eq!(new_kbps, (850.0_f64 * 1.05).ceil() as u32);
            }
            other => panic!("expected remb increase, got {other:?}"),
        }
    }

    #[test]
    fn bitrate_never_escapes_bounds_under_extreme_loss() {
        let mut bitrate = VideoBitrateInfo::new(100, 2000, 150);
        let mut t = Instant::now();
        let mut al = AdaptiveLoop::new(t);
        al.note_restart(t);
        t += Duration::from_secs(2);
        for _ in 0..500 {
            t += Duration::from_millis(200);
            al.tick(&mut bitrate, &[rr(255)], &[], t);
            assert!(bitrate.current_kbps >= bitrate.min_kbps);
            assert!(bitrate.current_kbps <= bitrate.max_kbps);
        }
    }
}
