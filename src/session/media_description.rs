use std::net::SocketAddr;

use base64::Engine;

use crate::srtp::{SrtpEndpointKeys, SrtpProfile};

/// Capability-set codec attributes, shared by both directions of a
/// [`MediaDescription`]. Bitrates are in kbps; `quality` is an opaque
/// 0-100 scalar for codecs that expose one.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecDescription {
    pub name: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub bitrate_kbps: u32,
    pub min_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub quality: Option<u32>,
    pub auto_quality_enabled: bool,
}

/// SRTP crypto parameters for one direction: cipher-suite name (string
/// matched against known suites) and base64 key-info.
#[derive(Debug, Clone, PartialEq)]
pub struct CryptoInfo {
    pub suite: String,
    pub key_info_b64: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoParseError(pub String);

impl std::fmt::Display for CryptoParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "crypto parse error: {}", self.0)
    }
}
impl std::error::Error for CryptoParseError {}

impl CryptoInfo {
    /// Resolves the string-matched suite name to the crate's internal
    /// [`SrtpProfile`] and decodes the base64 key-info into master key/salt.
    /// Only the 80-bit-tag suites are implemented; the `_32` variants are
    /// recognized by name but rejected, and the caller disables the
    /// direction in response to the resulting initialization error.
    pub fn resolve(&self) -> Result<(SrtpProfile, SrtpEndpointKeys), CryptoParseError> {
        let profile = match self.suite.as_str() {
            "AES_CM_128_HMAC_SHA1_80" | "SRTP_AES128_CM_HMAC_SHA1_80" => {
                SrtpProfile::Aes128CmSha1_80
            }
            "AES_CM_128_HMAC_SHA1_32" | "SRTP_AES128_CM_HMAC_SHA1_32" => {
                return Err(CryptoParseError(format!(
                    "unsupported (32-bit tag) suite: {}",
                    self.suite
                )));
            }
            other => return Err(CryptoParseError(format!("unknown suite name: {other}"))),
        };
        let raw = base64::engine::general_purpose::STANDARD
            .decode(self.key_info_b64.as_bytes())
            .map_err(|e| CryptoParseError(format!("bad base64 key-info: {e}")))?;
        // SRTP_AES128_CM_HMAC_SHA1_80 key-info is 16-byte master key followed
        // by a 14-byte master salt (30 bytes total), the standard libSRTP layout.
        if raw.len() < 30 {
            return Err(CryptoParseError(format!(
                "key-info too short: {} bytes, need >= 30",
                raw.len()
            )));
        }
        let master_key = raw[..16].to_vec();
        let master_salt = raw[16..30].to_vec();
        Ok((profile, SrtpEndpointKeys { master_key, master_salt }))
    }
}

/// Direction flags controlling whether a side is active and whether it is
/// currently held (muted without tearing down the underlying stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectionFlags {
    pub enabled: bool,
    pub on_hold: bool,
}

/// Negotiated media parameters for one side (send or recv) of a session,
/// produced by the signaling layer and consumed by `updateMedia()`. Never
/// mutated by the core once handed in.
#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub direction: DirectionFlags,
    pub addr: SocketAddr,
    /// `None` when RTP/RTCP are multiplexed on `addr` (RFC 5761).
    pub rtcp_addr: Option<SocketAddr>,
    pub codec: CodecDescription,
    pub crypto: Option<CryptoInfo>,
}

impl MediaDescription {
    pub fn is_active(&self) -> bool {
        self.direction.enabled && !self.direction.on_hold
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn codec() -> CodecDescription {
        CodecDescription {
            name: "VP8".into(),
            payload_type: 96,
            clock_rate: 90_000,
            bitrate_kbps: 500,
            min_bitrate_kbps: 100,
            max_bitrate_kbps: 2000,
            quality: None,
            auto_quality_enabled: true,
        }
    }

    #[test]
    fn enabled_and_not_on_hold_is_active() {
        let md = MediaDescription {
            direction: DirectionFlags { enabled: true, on_hold: false },
            addr: "127.0.0.1:5004".parse().unwrap(),
            rtcp_addr: None,
            codec: codec(),
            crypto: None,
        };
        assert!(md.is_active());
    }

    #[test]
    fn on_hold_is_not_active() {
        let md = MediaDescription {
            direction: DirectionFlags { enabled: true, on_hold: true },
            addr: "127.0.0.1:5004".parse().unwrap(),
            rtcp_addr: None,
            codec: codec(),
            crypto: None,
        };
        assert!(!md.is_active());
    }
}
