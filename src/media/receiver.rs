use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver as MpscReceiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::congestion::controller::CongestionControl;
use crate::log::{log_level::LogLevel, log_sink::LogSink};
use crate::rtcp::remb::Remb;
use crate::rtp_session::events::RtpSessionEvent;
use crate::rtp_session::payload::h264_depacketizer::H264Depacketizer;
use crate::{sink_error, sink_info, sink_trace};

use super::codec::Decoder;
use super::frame_bus::FrameBus;

/// Per-frame-boundary timing sample handed to the congestion controller:
/// a one-way-delay gradient emitted to the delay callback on each frame
/// boundary.
#[derive(Debug, Clone, Copy)]
pub struct TimingSample {
    pub recv_delta_ms: f64,
    pub send_delta_ms: f64,
    pub arrival_time: Instant,
}

/// Receive pipeline pump: reads depacketized
/// access units for one remote SSRC off the transport's event channel,
/// decodes, and publishes frames to a [`FrameBus`] for the mixer/sink/
/// recorder. Also derives the per-frame timing gradient the congestion
/// controller consumes.
pub struct ReceiverPump {
    run: Arc<AtomicBool>,
    suppressed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReceiverPump {
    /// `remb_sink`, if set, is `(local_rtcp_ssrc, sender)`: whenever the
    /// congestion controller decides a REMB should go out towards the peer,
    /// the built packet is handed to `sender` for the session to forward
    /// over the transport as delay-based congestion feedback.
    pub fn spawn(
        events: MpscReceiver<RtpSessionEvent>,
        mut decoder: Box<dyn Decoder>,
        decoded_bus: FrameBus,
        mut congestion: Option<CongestionControl>,
        keyframe_request: Option<std::sync::mpsc::Sender<u32>>,
        remb_sink: Option<(u32, std::sync::mpsc::Sender<Remb>)>,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        let run = Arc::new(AtomicBool::new(true));
        let run_clone = Arc::clone(&run);
        let suppressed = Arc::new(AtomicBool::new(false));
        let suppressed_clone = Arc::clone(&suppressed);

        let handle = thread::spawn(move || {
            sink_info!(logger, "[Receiver] pump started");
            let mut depacketizers: HashMap<u32, H264Depacketizer> = HashMap::new();
            let mut last_abs_send_time: HashMap<u32, u32> = HashMap::new();
            let mut last_arrival: HashMap<u32, Instant> = HashMap::new();

            while run_clone.load(Ordering::SeqCst) {
                let evt = match events.recv_timeout(Duration::from_millis(100)) {
                    Ok(e) => e,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };

                let RtpSessionEvent::RtpIn(rtp_in) = evt else { continue };
                let ssrc = rtp_in.ssrc;
                let depkt = depacketizers.entry(ssrc).or_default();

                if let (Some(abs_send), Some(prev_abs), Some(prev_arrival)) = (
                    rtp_in.abs_send_time,
                    last_abs_send_time.get(&ssrc).copied(),
                    last_arrival.get(&ssrc).copied(),
                ) {
                    // abs-send-time is a 24-bit fixed-point field in units
                    // of 1/(2^18) seconds.
                    let send_delta_units = abs_send.wrapping_sub(prev_abs) & 0x00FF_FFFF;
                    let send_delta_ms = (send_delta_units as f64) * 1000.0 / 262_144.0;
                    let recv_delta_ms =
                        rtp_in.received_at.duration_since(prev_arrival).as_secs_f64() * 1000.0;

                    if let Some(cc) = congestion.as_mut()
                        && let Some(intent) = cc.on_sample(recv_delta_ms, send_delta_ms, rtp_in.received_at)
                        && let Some((local_rtcp_ssrc, tx)) = &remb_sink
                    {
                        let remb = CongestionControl::build_remb(*local_rtcp_ssrc, vec![ssrc], intent);
                        let _ = tx.send(remb);
                    }
                    sink_trace!(
                        logger,
                        "[Receiver] ssrc={:#010x} recv_delta={recv_delta_ms:.2}ms send_delta={send_delta_ms:.2}ms",
                        ssrc
                    );
                }
                if let Some(abs_send) = rtp_in.abs_send_time {
                    last_abs_send_time.insert(ssrc, abs_send);
                }
                last_arrival.insert(ssrc, rtp_in.received_at);

                match depkt.push_rtp(&rtp_in.payload, rtp_in.marker, rtp_in.timestamp_90khz, rtp_in.seq) {
                    Some(access_unit) => match decoder.decode(&access_unit) {
                        Ok(Some(frame)) => {
                            if !suppressed_clone.load(Ordering::SeqCst) {
                                decoded_bus.publish(frame);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            sink_error!(logger, "[Receiver] decode failed: {e}");
                            if let Some(tx) = &keyframe_request {
                                let _ = tx.send(ssrc);
                            }
                        }
                    },
                    None => {}
                }
            }
            sink_info!(logger, "[Receiver] pump stopped");
        });

        Self { run, suppressed, handle: Some(handle) }
    }

    /// Mutes/unmutes the receive side without tearing down depacketizer or
    /// timing state: decoding and congestion sampling continue, but decoded
    /// frames stop reaching the frame bus (mixer/sink/recorder) while set.
    pub fn set_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::SeqCst);
    }

    pub fn stop_and_join(mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for ReceiverPump {
    fn drop(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
