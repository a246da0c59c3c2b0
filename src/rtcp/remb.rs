use crate::rtcp::{
    common_header::CommonHeader,
    packet_type::{PT_PSFB, RtcpPacketType},
    rtcp::RtcpPacket,
    rtcp_error::RtcpError,
};

/// Unique identifier for REMB's application-defined FCI: ASCII "REMB".
const REMB_IDENTIFIER: u32 = 0x5245_4D42;
/// Feedback message type carried in the 5-bit FMT field (draft-alvestrand-rmcat-remb).
const REMB_FMT: u8 = 15;
const MAX_MANTISSA: u64 = 0x3_FFFF; // 18 bits

/// Receiver Estimated Maximum Bitrate (RTCP PSFB, PT=206, FMT=15).
///
/// Wire layout (RFC identical to draft-alvestrand-rmcat-remb §2.2):
/// common header, sender SSRC, media SSRC (always 0), 'REMB' identifier,
/// `num_ssrc` (here always 1), a 6-bit exponent + 18-bit mantissa pair, then
/// one feedback SSRC per `num_ssrc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remb {
    pub sender_ssrc: u32,
    pub bitrate_bps: u64,
    pub ssrcs: Vec<u32>,
}

impl Remb {
    pub fn new(sender_ssrc: u32, bitrate_bps: u64, ssrcs: Vec<u32>) -> Self {
        Self {
            sender_ssrc,
            bitrate_bps,
            ssrcs,
        }
    }

    /// Splits `bitrate_bps` into the `(exponent, mantissa)` pair REMB encodes,
    /// right-shifting the mantissa until it fits 18 bits.
    fn exp_mantissa(bitrate_bps: u64) -> (u8, u32) {
        let mut mantissa = bitrate_bps;
        let mut exponent = 0u8;
        while mantissa > MAX_MANTISSA {
            mantissa >>= 1;
            exponent += 1;
        }
        (exponent, mantissa as u32)
    }
}

impl RtcpPacketType for Remb {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        if self.ssrcs.is_empty() || self.ssrcs.len() > u8::MAX as usize {
            return Err(RtcpError::Invalid);
        }
        let start = out.len();
        let hdr = CommonHeader::new(REMB_FMT, PT_PSFB, false);
        hdr.encode_into(out);
        out.extend_from_slice(&self.sender_ssrc.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // media SSRC, always 0
        out.extend_from_slice(&REMB_IDENTIFIER.to_be_bytes());

        let (exponent, mantissa) = Self::exp_mantissa(self.bitrate_bps);
        out.push(self.ssrcs.len() as u8);
        out.push((exponent << 2) | ((mantissa >> 16) as u8 & 0x03));
        out.extend_from_slice(&((mantissa & 0xFFFF) as u16).to_be_bytes());

        for ssrc in &self.ssrcs {
            out.extend_from_slice(&ssrc.to_be_bytes());
        }

        let pad = (4 - (out.len() - start) % 4) % 4;
        if pad != 0 {
            out.extend(std::iter::repeat_n(0u8, pad));
        }
        let total = out.len() - start;
        let len_words = (total / 4) - 1;
        out[start + 2] = ((len_words >> 8) & 0xFF) as u8;
        out[start + 3] = (len_words & 0xFF) as u8;
        Ok(())
    }

    fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<RtcpPacket, RtcpError> {
        if hdr.rc_or_fmt() != REMB_FMT {
            return Err(RtcpError::Invalid);
        }
        if payload.len() < 12 {
            return Err(RtcpError::TooShort);
        }
        let sender_ssrc =
            u32::from_be_bytes(payload[0..4].try_into().map_err(|_| RtcpError::TooShort)?);
        let identifier =
            u32::from_be_bytes(payload[8..12].try_into().map_err(|_| RtcpError::TooShort)?);
        if identifier != REMB_IDENTIFIER {
            return Err(RtcpError::Invalid);
        }
        if payload.len() < 16 {
            return Err(RtcpError::TooShort);
        }
        let num_ssrc = payload[12] as usize;
        let exponent = (payload[13] >> 2) & 0x3F;
        let mantissa = (((payload[13] & 0x03) as u32) << 16)
            | u16::from_be_bytes(payload[14..16].try_into().map_err(|_| RtcpError::TooShort)?)
                as u32;
        let bitrate_bps = (mantissa as u64)
            .checked_shl(exponent as u32)
            .ok_or(RtcpError::Invalid)?;

        let mut idx = 16usize;
        let mut ssrcs = Vec::with_capacity(num_ssrc);
        for _ in 0..num_ssrc {
            if payload.len() < idx + 4 {
                return Err(RtcpError::Truncated);
            }
            ssrcs.push(u32::from_be_bytes(
                payload[idx..idx + 4].try_into().map_err(|_| RtcpError::TooShort)?,
            ));
            idx += 4;
        }

        Ok(RtcpPacket::Remb(Remb {
            sender_ssrc,
            bitrate_bps,
            ssrcs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_small_bitrate() {
        let remb = Remb::new(0x1234_5678, 500_000, vec![0xAABB_CCDD]);
        let mut buf = Vec::new();
        remb.encode_into(&mut buf).expect("encode");
        let (hdr, total) = CommonHeader::decode(&buf).expect("common header");
        assert_eq!(total, buf.len());
        let decoded = Remb::decode(&hdr, &buf[4..]).expect("decode");
        match decoded {
            RtcpPacket::Remb(r) => {
                assert_eq!(r.sender_ssrc, 0x1234_5678);
                assert_eq!(r.ssrcs, vec![0xAABB_CCDD]);
                let diff = r.bitrate_bps.abs_diff(500_000);
                assert!(diff <= 500_000 / (1 << 18).max(1));
            }
            _ => panic!("expected Remb"),
        }
    }

    #[test]
    fn roundtrip_large_bitrate_identity_within_mantissa_rounding() {
        let original = 12_345_678u64;
        let remb = Remb::new(1, original, vec![2]);
        let mut buf = Vec::new();
        remb.encode_into(&mut buf).expect("encode");
        let (hdr, _) = CommonHeader::decode(&buf).expect("common header");
        let decoded = Remb::decode(&hdr, &buf[4..]).expect("decode");
        let RtcpPacket::Remb(r) = decoded else {
            panic!("expected Remb")
        };
        let max_err = original / (1u64 << 18);
        assert!(r.bitrate_bps.abs_diff(original) <= max_err.max(1));
    }

    #[test]
    fn rejects_wrong_fmt() {
        let hdr = CommonHeader::new(1, PT_PSFB, false); // FMT=1 is PLI, not REMB
        let payload = [0u8; 16];
        assert!(Remb::decode(&hdr, &payload).is_err());
    }

    #[test]
    fn rejects_bad_identifier() {
        let hdr = CommonHeader::new(REMB_FMT, PT_PSFB, false);
        let mut payload = vec![0u8; 16];
        payload[8..12].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        assert!(Remb::decode(&hdr, &payload).is_err());
    }
}
