use crate::rtcp::packet_type;

use super::{
    app::App, bye::Bye, common_header::CommonHeader, generic_nack::GenericNack,
    packet_type::RtcpPacketType, picture_loss::PictureLossIndication,
    receiver_report::ReceiverReport, remb::Remb, rtcp_error::RtcpError, sdes::Sdes,
    sender_report::SenderReport,
};

const REMB_FMT: u8 = 15;

/// The union of supported RTCP packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    Sr(SenderReport),
    Rr(ReceiverReport),
    Sdes(Sdes),
    Bye(Bye),
    App(App),
    Nack(GenericNack),          // Transport FB (205/FMT=1)
    Pli(PictureLossIndication), // Payload FB (206/FMT=1)
    Remb(Remb),                 // Payload FB (206/FMT=15)
}

impl RtcpPacket {
    /// Decode a *compound* RTCP buffer into individual packets.
    pub fn decode_compound(buf: &[u8]) -> Result<Vec<RtcpPacket>, RtcpError> {
        let mut out = Vec::new();
        let mut idx = 0usize;
        while idx + 4 <= buf.len() {
            let (hdr, total) = CommonHeader::decode(&buf[idx..])?;
            let pkt_bytes = &buf[idx..idx + total];
            let payload = &pkt_bytes[4..];

            let pkt = match hdr.pt() {
                packet_type::PT_SR => SenderReport::decode(&hdr, payload)?,
                packet_type::PT_RR => ReceiverReport::decode(&hdr, payload)?,
                packet_type::PT_SDES => Sdes::decode(&hdr, payload)?,
                packet_type::PT_BYE => Bye::decode(&hdr, payload)?,
                packet_type::PT_APP => App::decode(&hdr, payload)?,
                packet_type::PT_RTPFB => GenericNack::decode(&hdr, payload)?,
                packet_type::PT_PSFB if hdr.rc_or_fmt() == REMB_FMT => {
                    Remb::decode(&hdr, payload)?
                }
                packet_type::PT_PSFB => PictureLossIndication::decode(&hdr, payload)?,
                other => return Err(RtcpError::UnknownPacketType(other)),
            };
            out.push(pkt);
            idx += total;
        }
        if idx != buf.len() {
            // trailing garbage / partial packet
            return Err(RtcpError::TooShort);
        }
        Ok(out)
    }

    /// Encode a compound RTCP packet (concatenation of packets).
    pub fn encode_compound(pkts: &[RtcpPacket]) -> Result<Vec<u8>, RtcpError> {
        let mut out = Vec::new();
        for pkt in pkts {
            encode_one(pkt, &mut out)?;
        }
        Ok(out)
    }
}

fn encode_one(packet: &RtcpPacket, out: &mut Vec<u8>) -> Result<(), RtcpError> {
    match packet {
        RtcpPacket::Sr(sr) => sr.encode_into(out),
        RtcpPacket::Rr(rr) => rr.encode_into(out),
        RtcpPacket::Sdes(sdes) => sdes.encode_into(out),
        RtcpPacket::Bye(bye) => bye.encode_into(out),
        RtcpPacket::App(app) => app.encode_into(out),
        RtcpPacket::Nack(nack) => nack.encode_into(out),
        RtcpPacket::Pli(pli) => pli.encode_into(out),
        RtcpPacket::Remb(remb) => remb.encode_into(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcp::sender_info::SenderInfo;

    #[test]
    fn compound_roundtrip_sr_sdes() {
        let sr = SenderReport::new(0x1111_1111, SenderInfo::default(), vec![]);
        let sdes = Sdes::cname(0x1111_1111, "host@example");
        let pkts = vec![RtcpPacket::Sr(sr), RtcpPacket::Sdes(sdes)];
        let buf = RtcpPacket::encode_compound(&pkts).expect("encode");
        let decoded = RtcpPacket::decode_compound(&buf).expect("decode");
        assert_eq!(decoded.len(), 2);
        assert!(matches!(decoded[0], RtcpPacket::Sr(_)));
        assert!(matches!(decoded[1], RtcpPacket::Sdes(_)));
    }

    #[test]
    fn compound_roundtrip_includes_remb() {
        let remb = Remb::new(0xAAAA_AAAA, 1_000_000, vec![0xBBBB_BBBB]);
        let pkts = vec![RtcpPacket::Remb(remb)];
        let buf = RtcpPacket::encode_compound(&pkts).expect("encode");
        let decoded = RtcpPacket::decode_compound(&buf).expect("decode");
        assert_eq!(decoded.len(), 1);
        assert!(matches!(decoded[0], RtcpPacket::Remb(_)));
    }

    #[test]
    fn decode_rejects_unknown_packet_type() {
        // common header with pt=199 (not a recognized RTCP type)
        let mut buf = vec![0x80, 199, 0, 0];
        let err = RtcpPacket::decode_compound(&mut buf).unwrap_err();
        assert!(matches!(err, RtcpError::UnknownPacketType(199)));
    }
}
