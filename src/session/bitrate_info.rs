/// Default bitrate (kbps) applied when a negotiated resolution rescales to
/// less than this floor (§4.1 "Codec adjustment on updateMedia").
pub const DEFAULT_BITRATE_KBPS: u32 = 300;
/// Default max bitrate (kbps) floor, same rationale as [`DEFAULT_BITRATE_KBPS`].
pub const DEFAULT_MAX_BITRATE_KBPS: u32 = 1500;

/// Sender's tunable bitrate/quality state (§3). Mutated solely by the
/// adaptive loop and written back into the sender's codec before each
/// encoder restart.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoBitrateInfo {
    pub current_kbps: u32,
    pub min_kbps: u32,
    pub max_kbps: u32,
    pub current_quality: Option<u32>,
    pub min_quality: Option<u32>,
    pub max_quality: Option<u32>,
    /// Number of adaptive-loop ticks that have mutated `current_kbps` so far.
    pub adaptive_iterations: u64,
}

impl VideoBitrateInfo {
    pub fn new(min_kbps: u32, max_kbps: u32, start_kbps: u32) -> Self {
        Self {
            current_kbps: start_kbps.clamp(min_kbps, max_kbps),
            min_kbps,
            max_kbps,
            current_quality: None,
            min_quality: None,
            max_quality: None,
            adaptive_iterations: 0,
        }
    }

    /// Rescale bitrate bounds to a negotiated resolution, per §4.1: `nominal
    /// = max(pixels * 0.001, DEFAULT_BITRATE)`, `max = max(pixels * 0.0015, DEFAULT_MAX_BITRATE)`.
    pub fn rescale_for_resolution(&mut self, width: u32, height: u32) {
        let pixels = (width as f64) * (height as f64);
        let nominal = ((pixels * 0.001) as u32).max(DEFAULT_BITRATE_KBPS);
        let max = ((pixels * 0.0015) as u32).max(DEFAULT_MAX_BITRATE_KBPS);
        self.min_kbps = self.min_kbps.min(nominal);
        self.max_kbps = max.max(nominal);
        self.current_kbps = nominal.clamp(self.min_kbps, self.max_kbps);
    }

    /// Clamp and store a new bitrate, per invariant 2
    /// (`videoBitrateCurrent` never escapes `[min, max]`).
    pub fn set_new_bitrate(&mut self, proposed_kbps: u32) {
        self.current_kbps = proposed_kbps.clamp(self.min_kbps, self.max_kbps);
        self.adaptive_iterations += 1;
    }

    pub fn reset_to_defaults(&mut self) {
        self.min_kbps = DEFAULT_BITRATE_KBPS.min(self.min_kbps);
        self.max_kbps = DEFAULT_MAX_BITRATE_KBPS.max(self.max_kbps);
        self.current_kbps = DEFAULT_BITRATE_KBPS.clamp(self.min_kbps, self.max_kbps);
        self.adaptive_iterations = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_new_bitrate_never_escapes_bounds() {
        let mut info = VideoBitrateInfo::new(100, 1000, 500);
        info.set_new_bitrate(5000);
        assert_eq!(info.current_kbps, 1000);
        info.set_new_bitrate(1);
        assert_eq!(info.current_kbps, 100);
    }

    #[test]
    fn rescale_for_resolution_applies_floors() {
        let mut info = VideoBitrateInfo::new(50, 200, 150);
        info.rescale_for_resolution(160, 120); // tiny resolution, should hit floors
        assert_eq!(info.current_kbps, DEFAULT_BITRATE_KBPS);
        assert_eq!(info.max_kbps, DEFAULT_MAX_BITRATE_KBPS);
    }

    #[test]
    fn rescale_for_resolution_scales_up_for_hd() {
        let mut info = VideoBitrateInfo::new(100, 4000, 500);
        info.rescale_for_resolution(1920, 1080);
        let pixels = 1920.0 * 1080.0;
        assert_eq!(info.current_kbps, (pixels * 0.001) as u32);
        assert_eq!(info.max_kbps, (pixels * 0.0015) as u32);
    }
}
