use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::log::{log_level::LogLevel, log_sink::LogSink};
use crate::rtp_session::h264_packetizer::H264Packetizer;
use crate::rtp_session::rtp_session::RtpSession;
use crate::{sink_error, sink_info, sink_warn};

use super::codec::Encoder;
use super::frame_bus::FrameBus;

/// Send pipeline pump: one OS thread per active sender. Pulls frames from a
/// [`FrameBus`] subscription
/// (camera, or the mixer's output when in conference), encodes, packetizes,
/// and writes to the transport. Exits cooperatively on an atomic stop flag
/// checked each iteration.
pub struct SenderPump {
    run: Arc<AtomicBool>,
    bitrate_kbps: Arc<AtomicU32>,
    force_keyframe: Arc<AtomicBool>,
    needs_restart: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SenderPump {
    /// `transport`'s send stream for `local_ssrc` must already exist
    /// (`RtpSession::add_send_stream`). `start_seq` seeds sequence-number
    /// continuity across a sender restart.
    pub fn spawn(
        transport: Arc<RtpSession>,
        frame_bus: FrameBus,
        mut encoder: Box<dyn Encoder>,
        local_ssrc: u32,
        start_seq: Option<u16>,
        start_bitrate_kbps: u32,
        mtu: usize,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        let run = Arc::new(AtomicBool::new(true));
        let bitrate_kbps = Arc::new(AtomicU32::new(start_bitrate_kbps));
        let force_keyframe = Arc::new(AtomicBool::new(false));
        let needs_restart = Arc::new(AtomicBool::new(false));

        if let Some(seq) = start_seq {
            let _ = transport.seed_send_seq(local_ssrc, seq);
        }

        let run_clone = Arc::clone(&run);
        let bitrate_clone = Arc::clone(&bitrate_kbps);
        let force_keyframe_clone = Arc::clone(&force_keyframe);
        let needs_restart_clone = Arc::clone(&needs_restart);
        let sub = frame_bus.subscribe();
        let packetizer = H264Packetizer::new(mtu);

        let handle = thread::spawn(move || {
            sink_info!(logger, "[Sender] pump started ssrc={:#010x}", local_ssrc);
            let mut applied_bitrate = start_bitrate_kbps;

            while run_clone.load(Ordering::SeqCst) {
                let Some(frame) = sub.recv() else {
                    break;
                };
                if !run_clone.load(Ordering::SeqCst) {
                    break;
                }

                let wanted = bitrate_clone.load(Ordering::SeqCst);
                if wanted != applied_bitrate && !needs_restart_clone.load(Ordering::SeqCst) {
                    if encoder.set_bitrate_kbps(wanted) {
                        applied_bitrate = wanted;
                    } else {
                        // Encoder can't take a dynamic update; stop trying
                        // and let the session-level orchestrator tear this
                        // pump down and spin up a fresh one.
                        sink_warn!(
                            logger,
                            "[Sender] encoder rejected dynamic bitrate update, restart required"
                        );
                        needs_restart_clone.store(true, Ordering::SeqCst);
                    }
                }
                if force_keyframe_clone.swap(false, Ordering::SeqCst) {
                    encoder.force_keyframe();
                }

                let access_unit = match encoder.encode(&frame) {
                    Ok(Some(au)) => au,
                    Ok(None) => continue,
                    Err(e) => {
                        sink_error!(logger, "[Sender] encode failed: {e}");
                        continue;
                    }
                };

                let chunks = packetizer.packetize_annexb_to_payloads(&access_unit.bytes);
                if let Err(e) = transport.send_rtp_chunks_for_frame(
                    local_ssrc,
                    &chunks,
                    access_unit.timestamp_90khz,
                ) {
                    sink_warn!(logger, "[Sender] transport write failed: {e}");
                }
            }
            sink_info!(logger, "[Sender] pump stopped ssrc={:#010x}", local_ssrc);
        });

        Self { run, bitrate_kbps, force_keyframe, needs_restart, handle: Some(handle) }
    }

    /// Whether the encoder rejected the last dynamic bitrate update and
    /// this pump must be stopped and replaced by a freshly constructed one.
    pub fn needs_restart(&self) -> bool {
        self.needs_restart.load(Ordering::SeqCst)
    }

    /// Dynamic bitrate update applied on the next encode without restarting
    /// the pump, as long as the running encoder accepts it.
    pub fn set_bitrate_kbps(&self, kbps: u32) {
        self.bitrate_kbps.store(kbps, Ordering::SeqCst);
    }

    /// Requests that the next encoded frame be a key frame (PLI response).
    pub fn request_keyframe(&self) {
        self.force_keyframe.store(true, Ordering::SeqCst);
    }

    /// Cooperative stop; blocks (briefly) until the pump thread has exited.
    pub fn stop_and_join(mut self, timeout: Duration) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        let _ = timeout; // join is unconditional; kept for API symmetry with callers that pass one
    }
}

impl Drop for SenderPump {
    fn drop(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
