use std::{
    net::{SocketAddr, UdpSocket},
    sync::{Arc, Mutex},
    time::Instant,
};

use super::rtp_send_error::RtpSendError;
use super::{rtp_codec::RtpCodec, rtp_send_config::RtpSendConfig, tx_tracker::TxTracker};

use crate::log::log_sink::LogSink;
use crate::rtcp::{
    report_block::ReportBlock, sender_info::SenderInfo, sender_report::SenderReport,
};
use crate::rtp::rtp_header_extension::RtpHeaderExtension;
use crate::rtp::rtp_packet::RtpPacket;
use crate::rtp_session::time;
use crate::sink_warn;
use crate::srtp::SrtpContext;

pub struct RtpSendStream {
    pub codec: RtpCodec,
    pub local_ssrc: u32,
    seq: u16,
    last_ts: u32,
    pkt_count: u32,
    octet_count: u32,

    logger: Arc<dyn LogSink>,
    sock: Arc<UdpSocket>,
    peer: SocketAddr,
    srtp_outbound: Option<Arc<Mutex<SrtpContext>>>,

    last_sr_built: Instant,
    last_pkt_sent: Instant,

    pub tx: TxTracker,
}

impl RtpSendStream {
    pub fn new(
        logger: Arc<dyn LogSink>,
        cfg: RtpSendConfig,
        sock: Arc<UdpSocket>,
        peer: SocketAddr,
        srtp_outbound: Option<Arc<Mutex<SrtpContext>>>,
    ) -> Self {
        use rand::{RngCore, rngs::OsRng};
        Self {
            codec: cfg.codec,
            local_ssrc: cfg.local_ssrc,
            seq: (OsRng.next_u32() as u16),
            last_ts: OsRng.next_u32(),
            pkt_count: 0,
            octet_count: 0,
            logger,
            sock,
            peer,
            srtp_outbound,
            last_sr_built: Instant::now(),
            last_pkt_sent: Instant::now(),
            tx: TxTracker::default(),
        }
    }

    /// Encode, optionally SRTP-protect and send one RTP packet.
    ///
    /// `timestamp` and `marker` are caller-supplied because the pacing (audio
    /// sample clock vs. video frame clock vs. repacketized chunk) lives above
    /// this stream, not inside it.
    pub fn send_rtp_payload(
        &mut self,
        payload: &[u8],
        timestamp: u32,
        marker: bool,
    ) -> Result<(), RtpSendError> {
        let mut rtp_packet = RtpPacket::simple(
            self.codec.payload_type,
            marker,
            self.seq,
            timestamp,
            self.local_ssrc,
            payload.into(),
        );
        rtp_packet.header.header_extension = Some(RtpHeaderExtension::abs_send_time(
            time::abs_send_time_now(),
        ));

        let mut encoded = rtp_packet.encode()?;

        if let Some(ctx) = &self.srtp_outbound {
            ctx.lock()
                .map_err(|e| RtpSendError::SRTP(e.to_string()))?
                .protect(self.local_ssrc, &mut encoded)
                .map_err(RtpSendError::SRTP)?;
        }

        self.sock.send_to(&encoded, self.peer)?;
        self.last_pkt_sent = Instant::now();
        self.last_ts = timestamp;

        self.seq = self.seq.wrapping_add(1);
        self.pkt_count = self.pkt_count.wrapping_add(1);
        self.octet_count = self.octet_count.wrapping_add(payload.len() as u32);

        Ok(())
    }

    /// Build a Sender Report if we have sent packets since the last SR.
    /// Also records the compact-NTP identifier so we can compute RTT when RRs arrive.
    pub fn maybe_build_sr(&mut self) -> Option<SenderReport> {
        if self.last_pkt_sent <= self.last_sr_built {
            return None;
        }

        let (ntp_most_sw, now_least_sw) = time::ntp_now();

        self.tx.mark_sr_sent(ntp_most_sw, now_least_sw);

        let sender_info = SenderInfo::new(
            ntp_most_sw,
            now_least_sw,
            self.last_ts,
            self.pkt_count,
            self.octet_count,
        );

        let sr = SenderReport::new(self.local_ssrc, sender_info, vec![]);
        self.last_sr_built = Instant::now();
        Some(sr)
    }

    /// Deliver a ReportBlock (from a remote SR/RR) to this sender stream so it can update outbound metrics/RTT.
    /// `arrival_ntp_compact` is the compact NTP time when *we* received the SR/RR that carried this block.
    pub fn on_report_block(&mut self, rb: &ReportBlock, arrival_ntp_compact: u32) {
        if rb.fraction_lost > 0 || rb.cumulative_lost > 0 {
            sink_warn!(
                self.logger,
                "[RTCP] ssrc={:#010x} remote-reported loss frac={} cum={}",
                self.local_ssrc,
                rb.fraction_lost,
                rb.cumulative_lost
            );
        }
        self.tx.on_report_block(rb, arrival_ntp_compact);
    }

    /// The most recently *sent* sequence number, for a replacement stream
    /// to continue from (`lastSeqValOut()` + 1) instead of restarting at a
    /// fresh random value, preserving sequence continuity across restarts.
    pub fn last_seq_val_out(&self) -> u16 {
        self.seq.wrapping_sub(1)
    }

    /// Seed the next sequence number to send, e.g. `prev.last_seq_val_out() + 1`.
    pub fn seed_seq(&mut self, next_seq: u16) {
        self.seq = next_seq;
    }

    /// Optional: expose some outbound health summary for logging/telemetry.
    pub fn outbound_summary(&self) -> String {
        let rtt = self
            .tx
            .rtt_ms
            .map(|v| format!("{v} ms"))
            .unwrap_or_else(|| "-".into());
        format!(
            "SSRC={:#010x} sent={} pkts, {} bytes; remote_lost={} (frac={}), remote_jitter={}, RTT={}",
            self.local_ssrc,
            self.pkt_count,
            self.octet_count,
            self.tx.remote_cum_lost,
            self.tx.remote_fraction_lost,
            self.tx.remote_jitter,
            rtt,
        )
    }
}
