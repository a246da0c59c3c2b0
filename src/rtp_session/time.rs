use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
const NTP_UNIX_EPOCH_OFFSET: u64 = 2_208_988_800;

/// Current wall-clock time as a 64-bit NTP timestamp, split into (seconds, fraction).
///
/// `fraction` is the sub-second part scaled to a 32-bit fixed-point fraction
/// of a second, per RFC 3550 §4.
pub fn ntp_now() -> (u32, u32) {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs().wrapping_add(NTP_UNIX_EPOCH_OFFSET) as u32;
    let frac = ((since_epoch.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (secs, frac as u32)
}

/// Current wall-clock time as a 24-bit abs-send-time value: a Q6.18
/// fixed-point count of seconds, wrapping every 64s, per the abs-send-time
/// RTP header extension used for one-way-delay gradient timing.
pub fn abs_send_time_now() -> u32 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs_q18 = (since_epoch.as_secs() & 0x3F) << 18;
    let frac_q18 = ((since_epoch.subsec_nanos() as u64) << 18) / 1_000_000_000;
    ((secs_q18 + frac_q18) & 0x00FF_FFFF) as u32
}
