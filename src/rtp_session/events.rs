use crate::rtcp::remb::Remb;
use crate::rtcp::report_block::ReportBlock;

/// One fully reassembled/deduplicated RTP payload, handed up from a
/// [`RtpRecvStream`](super::rtp_recv_stream::RtpRecvStream)'s jitter buffer to
/// whatever depacketizes and renders it.
#[derive(Debug, Clone)]
pub struct RtpIn {
    pub pt: u8,
    pub marker: bool,
    pub timestamp_90khz: u32,
    pub seq: u16,
    pub ssrc: u32,
    pub payload: Vec<u8>,
    /// 24-bit abs-send-time extension value, if the peer negotiated it.
    pub abs_send_time: Option<u32>,
    /// Local monotonic receive time, for one-way-delay gradient timing.
    pub received_at: std::time::Instant,
}

/// Events a running [`RtpSession`](super::rtp_session::RtpSession) surfaces to its owner.
#[derive(Debug, Clone)]
pub enum RtpSessionEvent {
    RtpIn(RtpIn),
    /// A REMB arrived describing the remote peer's delay-based bandwidth estimate.
    Remb(Remb),
    /// A receiver report block about one of our outbound (sender) SSRCs arrived.
    ReceiverReport(ReportBlock),
    /// The remote peer (via PLI or NACK-all) asked for a keyframe on this SSRC.
    KeyFrameRequest { ssrc: u32 },
    /// Free-form status line (stream bound/torn down, BYE received, ...).
    Status(String),
}
