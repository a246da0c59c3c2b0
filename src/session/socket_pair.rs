use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::log::{log_level::LogLevel, log_sink::LogSink};
use crate::rtcp::remb::Remb;
use crate::rtcp::report_block::ReportBlock;
use crate::rtp_session::events::RtpSessionEvent;
use crate::rtp_session::rtp_session::RtpSession;
use crate::rtp_session::{RtpRecvConfig, RtpSendConfig};
use crate::sink_info;
use crate::srtp::SrtpSessionConfig;

use super::error::SessionError;

/// Bound on each feedback FIFO; on overflow the oldest entry is evicted.
const FEEDBACK_QUEUE_DEPTH: usize = 10;
/// RTCP feedback older than this is ignored when computing loss weighting.
pub const RTCP_FEEDBACK_MAX_AGE: Duration = Duration::from_secs(2);

struct Aged<T> {
    value: T,
    at: Instant,
}

/// Multiplexed RTP+RTCP datagram I/O, SRTP, and RTCP feedback capture.
/// Wraps the low-level [`RtpSession`] transport (which
/// already owns the socket, SRTP contexts, and send/recv streams) and adds
/// the bounded feedback queues, a condition variable for `waitForRTCP`, and
/// the packet-loss/key-frame callback wiring the session-level state machine
/// installs.
pub struct SocketPair {
    transport: Arc<RtpSession>,
    rr_queue: Arc<Mutex<VecDeque<Aged<ReportBlock>>>>,
    remb_queue: Arc<Mutex<VecDeque<Aged<Remb>>>>,
    rtcp_cv: Arc<Condvar>,
    rtcp_lock: Arc<Mutex<u64>>,
    keyframe_rx: Option<Receiver<u32>>,
    drain_run: Arc<AtomicBool>,
    drain_handle: Option<JoinHandle<()>>,
}

impl SocketPair {
    /// Binds `local_addr`, builds the low-level transport, and starts the
    /// feedback-draining thread. Returns [`SessionError::TransportInit`] on
    /// bind failure and [`SessionError::CryptoInit`] if SRTP setup fails.
    pub fn bind(
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        srtp_cfg: Option<SrtpSessionConfig>,
        initial_recv: Vec<RtpRecvConfig>,
        initial_send: Vec<RtpSendConfig>,
        logger: Arc<dyn LogSink>,
    ) -> Result<(Self, Receiver<RtpSessionEvent>), SessionError> {
        let sock = UdpSocket::bind(local_addr)
            .map_err(|e| SessionError::TransportInit(e.to_string()))?;
        let sock = Arc::new(sock);

        let (tx_evt, rx_evt_internal) = channel();
        let (tx_media, rx_media) = channel::<Vec<u8>>();

        // Reader thread: moves datagrams from the socket into the channel
        // RtpSession::new expects, so SRTP/RTCP classification stays inside
        // the transport's own start() loop.
        let reader_sock = Arc::clone(&sock);
        let drain_run = Arc::new(AtomicBool::new(true));
        let reader_run = Arc::clone(&drain_run);
        thread::spawn(move || {
            let mut buf = vec![0u8; 2048];
            reader_sock
                .set_read_timeout(Some(Duration::from_millis(200)))
                .ok();
            while reader_run.load(Ordering::SeqCst) {
                match reader_sock.recv_from(&mut buf) {
                    Ok((n, _from)) => {
                        let _ = tx_media.send(buf[..n].to_vec());
                    }
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(_) => break,
                }
            }
        });

        let mut transport = RtpSession::new(
            Arc::clone(&sock),
            peer_addr,
            tx_evt,
            logger.clone(),
            rx_media,
            initial_recv,
            initial_send,
            srtp_cfg,
        )
        .map_err(|e| match &e {
            crate::rtp_session::rtp_session_error::RtpSessionError::Rtcp(_) => {
                SessionError::CryptoInit(e.to_string())
            }
            _ => SessionError::TransportInit(e.to_string()),
        })?;
        transport.start()?;

        let rr_queue = Arc::new(Mutex::new(VecDeque::with_capacity(FEEDBACK_QUEUE_DEPTH)));
        let remb_queue = Arc::new(Mutex::new(VecDeque::with_capacity(FEEDBACK_QUEUE_DEPTH)));
        let rtcp_cv = Arc::new(Condvar::new());
        let rtcp_lock = Arc::new(Mutex::new(0u64));
        let (keyframe_tx, keyframe_rx) = channel();

        // Forward events both to our own feedback queues/condvar and to an
        // outward channel for RtpIn (handed to a ReceiverPump) and Status.
        let (tx_out, rx_out) = channel();
        let rr_c = Arc::clone(&rr_queue);
        let remb_c = Arc::clone(&remb_queue);
        let cv_c = Arc::clone(&rtcp_cv);
        let lock_c = Arc::clone(&rtcp_lock);
        let kf_tx_c = keyframe_tx.clone();
        let drain_run_c = Arc::clone(&drain_run);
        let drain_logger = logger.clone();

        let drain_handle = thread::spawn(move || {
            loop {
                match rx_evt_internal.recv_timeout(Duration::from_millis(200)) {
                    Ok(evt) => {
                        match &evt {
                            RtpSessionEvent::ReceiverReport(rb) => {
                                push_bounded(&rr_c, Aged { value: rb.clone(), at: Instant::now() });
                                notify_rtcp(&lock_c, &cv_c);
                            }
                            RtpSessionEvent::Remb(remb) => {
                                push_bounded(&remb_c, Aged { value: remb.clone(), at: Instant::now() });
                                notify_rtcp(&lock_c, &cv_c);
                            }
                            RtpSessionEvent::KeyFrameRequest { ssrc } => {
                                let _ = kf_tx_c.send(*ssrc);
                            }
                            _ => {}
                        }
                        if tx_out.send(evt).is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if !drain_run_c.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            sink_info!(drain_logger, "[SocketPair] feedback drain thread stopped");
        });

        Ok((
            Self {
                transport: Arc::new(transport),
                rr_queue,
                remb_queue,
                rtcp_cv,
                rtcp_lock,
                keyframe_rx: Some(keyframe_rx),
                drain_run,
                drain_handle: Some(drain_handle),
            },
            rx_out,
        ))
    }

    pub fn transport(&self) -> Arc<RtpSession> {
        Arc::clone(&self.transport)
    }

    /// Drain and return all queued Receiver Report blocks newer than
    /// [`RTCP_FEEDBACK_MAX_AGE`]; older entries are dropped silently,
    /// matching `getRtcpRR()`.
    pub fn get_rtcp_rr(&self) -> Vec<ReportBlock> {
        drain_fresh(&self.rr_queue)
    }

    /// Drain and return all queued REMB records, mirroring `getRtcpREMB()`.
    pub fn get_rtcp_remb(&self) -> Vec<Remb> {
        drain_fresh(&self.remb_queue)
    }

    /// Blocks until a new RR/REMB record arrives or `duration` elapses.
    pub fn wait_for_rtcp(&self, duration: Duration) {
        let guard = self.rtcp_lock.lock().unwrap_or_else(|e| e.into_inner());
        let generation = *guard;
        let _ = self
            .rtcp_cv
            .wait_timeout_while(guard, duration, |g| *g == generation);
    }

    pub fn force_key_frame(&self, remote_ssrc: u32) {
        self.transport.send_pli(remote_ssrc);
    }

    /// Channel the session-level state machine reads key-frame requests
    /// from, installed as the socket pair's packet-loss callback equivalent.
    pub fn take_keyframe_requests(&mut self) -> Option<Receiver<u32>> {
        self.keyframe_rx.take()
    }

    pub fn last_latency_ms(&self, local_ssrc: u32) -> Option<u32> {
        self.transport.last_latency_ms(local_ssrc).ok().flatten()
    }

    pub fn interrupt(&self) {
        self.drain_run.store(false, Ordering::SeqCst);
        notify_rtcp(&self.rtcp_lock, &self.rtcp_cv);
        self.transport.stop();
    }
}

impl Drop for SocketPair {
    fn drop(&mut self) {
        self.interrupt();
        if let Some(h) = self.drain_handle.take() {
            let _ = h.join();
        }
    }
}

fn push_bounded<T>(queue: &Arc<Mutex<VecDeque<Aged<T>>>>, item: Aged<T>) {
    let mut q = queue.lock().unwrap_or_else(|e| e.into_inner());
    if q.len() >= FEEDBACK_QUEUE_DEPTH {
        q.pop_front();
    }
    q.push_back(item);
}

fn drain_fresh<T>(queue: &Arc<Mutex<VecDeque<Aged<T>>>>) -> Vec<T> {
    let mut q = queue.lock().unwrap_or_else(|e| e.into_inner());
    let now = Instant::now();
    let drained: Vec<Aged<T>> = q.drain(..).collect();
    drained
        .into_iter()
        .filter(|a| now.saturating_duration_since(a.at) <= RTCP_FEEDBACK_MAX_AGE)
        .map(|a| a.value)
        .collect()
}

fn notify_rtcp(lock: &Arc<Mutex<u64>>, cv: &Arc<Condvar>) {
    let mut g = lock.lock().unwrap_or_else(|e| e.into_inner());
    *g = g.wrapping_add(1);
    cv.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_queue_evicts_oldest_on_overflow() {
        let q: Arc<Mutex<VecDeque<Aged<u32>>>> = Arc::new(Mutex::new(VecDeque::new()));
        for i in 0..(FEEDBACK_QUEUE_DEPTH as u32 + 3) {
            push_bounded(&q, Aged { value: i, at: Instant::now() });
        }
        let values = drain_fresh(&q);
        assert_eq!(values.len(), FEEDBACK_QUEUE_DEPTH);
        assert_eq!(values[0], 3); // the 3 oldest (0,1,2) were evicted
    }

    #[test]
    fn stale_entries_are_dropped_on_drain() {
        let q: Arc<Mutex<VecDeque<Aged<u32>>>> = Arc::new(Mutex::new(VecDeque::new()));
        push_bounded(
            &q,
            Aged { value: 1, at: Instant::now() - RTCP_FEEDBACK_MAX_AGE - Duration::from_secs(1) },
        );
        push_bounded(&q, Aged { value: 2, at: Instant::now() });
        let values = drain_fresh(&q);
        assert_eq!(values, vec![2]);
    }
}
