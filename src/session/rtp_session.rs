use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::congestion::controller::{CongestionControl, EstimatorKind};
use crate::log::{log_level::LogLevel, log_sink::LogSink};
use crate::media::codec::{CodecSpec, Decoder, Encoder};
use crate::media::frame::{FrameFormat, MediaStream};
use crate::media::frame_bus::FrameBus;
use crate::media::receiver::ReceiverPump;
use crate::media::sender::SenderPump;
use crate::media::source::{CameraSource, DeviceParams, Source};
use crate::mixer::video_mixer::{SourceId, VideoMixer};
use crate::recorder::{RecorderAttachment, RecorderSink};
use crate::rtcp::remb::Remb;
use crate::rtp_session::rtp_codec::RtpCodec;
use crate::rtp_session::rtp_recv_config::RtpRecvConfig;
use crate::rtp_session::rtp_send_config::RtpSendConfig;
use crate::{sink_error, sink_info, sink_warn};

use super::adaptive_loop::{AdaptiveLoop, BitrateDecision};
use super::bitrate_info::VideoBitrateInfo;
use super::error::SessionError;
use super::media_description::MediaDescription;
use super::socket_pair::SocketPair;

/// Builds an [`Encoder`] for a negotiated codec; installed by the caller so
/// the core never links a concrete codec library, only the abstract
/// encoder/decoder contract.
pub type EncoderFactory =
    Arc<dyn Fn(&CodecSpec) -> Result<Box<dyn Encoder>, SessionError> + Send + Sync>;
/// Mirror of [`EncoderFactory`] for the receive side.
pub type DecoderFactory =
    Arc<dyn Fn(&CodecSpec) -> Result<Box<dyn Decoder>, SessionError> + Send + Sync>;

/// One side of the session, named the way `setMuted(dir, bool)` and the
/// pipeline-rebinding rules address them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

/// Session lifecycle state. An exhaustively matched sum type, not an
/// inheritance hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running { send: bool, recv: bool },
    Conferenced,
    Stopped,
}

fn state_name(s: &SessionState) -> &'static str {
    match s {
        SessionState::Idle => "Idle",
        SessionState::Running { .. } => "Running",
        SessionState::Conferenced => "Conferenced",
        SessionState::Stopped => "Stopped",
    }
}

const DEFAULT_FRAMERATE: u32 = 30;
/// Roughly a keyframe every 2 seconds at the negotiated framerate; the core
/// does not prescribe a bitstream format so this is only an encoder hint.
fn default_keyframe_interval(framerate: u32) -> u32 {
    framerate.max(1) * 2
}

struct Inner {
    state: SessionState,
    socket_pair: Option<Arc<SocketPair>>,
    sender: Option<SenderPump>,
    receiver: Option<ReceiverPump>,
    send_desc: Option<MediaDescription>,
    recv_desc: Option<MediaDescription>,
    device: Option<DeviceParams>,
    bitrate: VideoBitrateInfo,
    local_send_ssrc: Option<u32>,
    remote_recv_ssrc: Option<u32>,
    camera: Option<CameraSource>,
    mixer: Option<Arc<VideoMixer>>,
    mixer_source_id: Option<SourceId>,
    decoded_bus: Option<FrameBus>,
    video_width: u32,
    video_height: u32,
    recorder: Option<Arc<RecorderAttachment>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            socket_pair: None,
            sender: None,
            receiver: None,
            send_desc: None,
            recv_desc: None,
            device: None,
            bitrate: VideoBitrateInfo::new(
                super::bitrate_info::DEFAULT_BITRATE_KBPS,
                super::bitrate_info::DEFAULT_MAX_BITRATE_KBPS,
                super::bitrate_info::DEFAULT_BITRATE_KBPS,
            ),
            local_send_ssrc: None,
            remote_recv_ssrc: None,
            camera: None,
            mixer: None,
            mixer_source_id: None,
            decoded_bus: None,
            video_width: 0,
            video_height: 0,
            recorder: None,
        }
    }

    fn local_media_stream(&self) -> MediaStream {
        MediaStream::new(FrameFormat::Rgb, self.video_width, self.video_height, self.framerate())
    }

    /// The sender's current source bus: the mixer's output while conferenced,
    /// otherwise the local camera. Exactly one of the two feeds the sender at
    /// any time, never both.
    fn active_send_bus(&self) -> Option<FrameBus> {
        if let Some(mixer) = &self.mixer {
            Some(mixer.output_bus())
        } else {
            self.camera.as_ref().map(|c| c.frame_bus())
        }
    }

    fn framerate(&self) -> u32 {
        self.device.as_ref().map(|d| d.framerate).unwrap_or(DEFAULT_FRAMERATE).max(1)
    }
}

struct Workers {
    adaptive_run: Arc<AtomicBool>,
    adaptive_handle: Option<JoinHandle<()>>,
    remb_handle: Option<JoinHandle<()>>,
    /// Peer asked us (PLI/NACK-all) for a key frame on one of our send SSRCs.
    peer_requests_keyframe_handle: Option<JoinHandle<()>>,
    /// Our decoder failed and we ask the peer for a key frame.
    we_request_keyframe_handle: Option<JoinHandle<()>>,
}

impl Workers {
    fn stop_and_join(mut self) {
        self.adaptive_run.store(false, Ordering::SeqCst);
        for h in [
            self.adaptive_handle.take(),
            self.remb_handle.take(),
            self.peer_requests_keyframe_handle.take(),
            self.we_request_keyframe_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = h.join();
        }
    }
}

/// Session-level lifecycle state machine: owns one
/// [`SocketPair`], one sender pump, one receiver pump, an optional mixer
/// attachment, and the adaptive bitrate loop. The single place sender and
/// receiver are started, stopped, and rebound; all public methods serialize
/// through one internal mutex — a plain `Mutex` here since the core never calls back
/// into itself re-entrantly.
pub struct RtpSession {
    inner: Arc<Mutex<Inner>>,
    workers: Mutex<Option<Workers>>,
    encoder_factory: EncoderFactory,
    decoder_factory: DecoderFactory,
    mtu: usize,
    estimator_kind: EstimatorKind,
    logger: Arc<dyn LogSink>,
}

impl RtpSession {
    /// Builds a session whose receive-side delay-based congestion estimator
    /// defaults to [`EstimatorKind::Trendline`]; use
    /// [`RtpSession::with_estimator`] to pin a specific one.
    pub fn new(
        encoder_factory: EncoderFactory,
        decoder_factory: DecoderFactory,
        mtu: usize,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        Self::with_estimator(encoder_factory, decoder_factory, mtu, EstimatorKind::Trendline, logger)
    }

    pub fn with_estimator(
        encoder_factory: EncoderFactory,
        decoder_factory: DecoderFactory,
        mtu: usize,
        estimator_kind: EstimatorKind,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            workers: Mutex::new(None),
            encoder_factory,
            decoder_factory,
            mtu,
            estimator_kind,
            logger,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn bitrate(&self) -> VideoBitrateInfo {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).bitrate.clone()
    }

    pub fn last_latency_ms(&self) -> Option<u32> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let sp = guard.socket_pair.as_ref()?;
        let ssrc = guard.local_send_ssrc?;
        sp.last_latency_ms(ssrc)
    }

    /// The bus feeding the sender: the local camera, or the mixer's output
    /// while conferenced (never both, never neither).
    /// For binding a [`crate::sink::FrameSinkMultiplexer`] "self-view"
    /// surface.
    pub fn outbound_preview_bus(&self) -> Option<FrameBus> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).active_send_bus()
    }

    /// The bus this session's own receiver publishes decoded frames to, for
    /// binding a [`crate::sink::FrameSinkMultiplexer`] "remote-view" surface
    /// or attaching a [`crate::mixer::video_mixer::VideoMixer`] input slot
    /// directly rather than through [`RtpSession::enter_conference`].
    pub fn decoded_bus(&self) -> Option<FrameBus> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).decoded_bus.clone()
    }

    /// `start(rtp, rtcp)`: creates the socket pair, configures
    /// SRTP if crypto is present on either description, starts the sides
    /// whose direction flags are enabled, and binds the pipeline to `device`.
    pub fn start(
        &self,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        send: MediaDescription,
        recv: MediaDescription,
        device: DeviceParams,
    ) -> Result<(), SessionError> {
        {
            let guard = self.inner.lock()?;
            if !matches!(guard.state, SessionState::Idle) {
                return Err(SessionError::InvalidTransition {
                    stimulus: "start",
                    state: state_name(&guard.state),
                });
            }
        }

        let srtp_cfg = build_srtp_config(&send, &recv)?;

        let send_codec = RtpCodec::with_name(
            send.codec.payload_type,
            send.codec.clock_rate,
            send.codec.name.clone(),
        );
        let recv_codec = RtpCodec::with_name(
            recv.codec.payload_type,
            recv.codec.clock_rate,
            recv.codec.name.clone(),
        );
        let send_cfg = RtpSendConfig::new(send_codec);
        let local_send_ssrc = send_cfg.local_ssrc;
        let recv_cfg = RtpRecvConfig::new(recv_codec, None);

        let (mut socket_pair, mut rx_events) = SocketPair::bind(
            local_addr,
            peer_addr,
            srtp_cfg,
            vec![recv_cfg],
            vec![send_cfg],
            self.logger.clone(),
        )?;
        // Must be taken before the pair is shared: `take_keyframe_requests`
        // needs `&mut self` and only ever runs once per session.
        let peer_keyframe_rx = socket_pair
            .take_keyframe_requests()
            .ok_or_else(|| SessionError::Fatal("keyframe request channel already taken".into()))?;
        let socket_pair = Arc::new(socket_pair);

        let mut bitrate = VideoBitrateInfo::new(
            send.codec.min_bitrate_kbps,
            send.codec.max_bitrate_kbps,
            send.codec.bitrate_kbps,
        );
        bitrate.rescale_for_resolution(device.width, device.height);

        let (ready_tx, ready_rx) = crate::media::source::capture_ready_channel();
        let camera = if send.is_active() {
            Some(CameraSource::open(device.clone(), self.logger.clone(), ready_tx))
        } else {
            drop(ready_rx);
            None
        };
        if camera.is_some() {
            let _ = ready_rx.wait(Duration::from_secs(2));
        }

        let sender = if send.is_active() {
            let bus = camera.as_ref().expect("camera opened above").frame_bus();
            let spec = codec_spec(&send, device.width, device.height, device.framerate);
            let encoder = (self.encoder_factory)(&spec)?;
            Some(SenderPump::spawn(
                socket_pair.transport(),
                bus,
                encoder,
                local_send_ssrc,
                None,
                bitrate.current_kbps,
                self.mtu,
                self.logger.clone(),
            ))
        } else {
            None
        };

        let (keyframe_from_decode_tx, keyframe_from_decode_rx) = channel::<u32>();
        let (remb_tx, remb_rx) = channel::<Remb>();
        let local_rtcp_ssrc = socket_pair.transport().local_rtcp_ssrc();
        let decoded_bus = FrameBus::new();

        let receiver = if recv.is_active() {
            let spec = codec_spec(&recv, device.width, device.height, device.framerate);
            let decoder = (self.decoder_factory)(&spec)?;
            // SocketPair's event channel interleaves RtpIn with RTCP/Status
            // notices it already consumes itself; re-filter here so the
            // receiver pump only ever sees RtpIn.
            let (rtp_in_tx, rtp_in_rx) = channel();
            let inner_for_ssrc = Arc::clone(&self.inner);
            thread::spawn(move || {
                while let Ok(evt) = rx_events.recv() {
                    if let crate::rtp_session::events::RtpSessionEvent::RtpIn(ref packet) = evt {
                        let ssrc = packet.ssrc;
                        let mut guard = inner_for_ssrc.lock().unwrap_or_else(|e| e.into_inner());
                        if guard.remote_recv_ssrc != Some(ssrc) {
                            guard.remote_recv_ssrc = Some(ssrc);
                        }
                        drop(guard);
                        if rtp_in_tx.send(evt).is_err() {
                            break;
                        }
                    }
                }
            });
            Some(ReceiverPump::spawn(
                rtp_in_rx,
                decoder,
                decoded_bus.clone(),
                Some(CongestionControl::new(self.estimator_kind)),
                Some(keyframe_from_decode_tx),
                Some((local_rtcp_ssrc, remb_tx)),
                self.logger.clone(),
            ))
        } else {
            None
        };

        {
            let mut guard = self.inner.lock()?;
            guard.state = SessionState::Running {
                send: send.is_active(),
                recv: recv.is_active(),
            };
            guard.socket_pair = Some(Arc::clone(&socket_pair));
            guard.sender = sender;
            guard.receiver = receiver;
            guard.send_desc = Some(send);
            guard.recv_desc = Some(recv);
            guard.device = Some(device);
            guard.bitrate = bitrate;
            guard.local_send_ssrc = Some(local_send_ssrc);
            guard.camera = camera;
            guard.decoded_bus = Some(decoded_bus);
            guard.video_width = guard.device.as_ref().map(|d| d.width).unwrap_or(0);
            guard.video_height = guard.device.as_ref().map(|d| d.height).unwrap_or(0);
        }

        self.spawn_workers(Arc::clone(&socket_pair), keyframe_from_decode_rx, peer_keyframe_rx, remb_rx);

        sink_info!(self.logger, "[RtpSession] started, local_ssrc={local_send_ssrc:#010x}");
        Ok(())
    }

    fn spawn_workers(
        &self,
        socket_pair: Arc<SocketPair>,
        keyframe_from_decode_rx: std::sync::mpsc::Receiver<u32>,
        peer_keyframe_rx: std::sync::mpsc::Receiver<u32>,
        remb_rx: std::sync::mpsc::Receiver<Remb>,
    ) {
        let adaptive_run = Arc::new(AtomicBool::new(true));

        let adaptive_handle = {
            let run = Arc::clone(&adaptive_run);
            let inner = Arc::clone(&self.inner);
            let sp = Arc::clone(&socket_pair);
            let encoder_factory = Arc::clone(&self.encoder_factory);
            let mtu = self.mtu;
            let logger = self.logger.clone();
            thread::spawn(move || adaptive_loop_thread(run, inner, sp, encoder_factory, mtu, logger))
        };

        let remb_handle = {
            let run = Arc::clone(&adaptive_run);
            let sp = Arc::clone(&socket_pair);
            let logger = self.logger.clone();
            thread::spawn(move || {
                while run.load(Ordering::SeqCst) {
                    match remb_rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(remb) => {
                            if let Err(e) = sp.transport().send_remb(&remb) {
                                sink_warn!(logger, "[RtpSession] REMB send failed: {e}");
                            }
                        }
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
        };

        // The peer asked (PLI / NACK-all) for a key frame on one of our send
        // SSRCs; forward it to whichever sender pump is currently active.
        let peer_requests_keyframe_handle = {
            let run = Arc::clone(&adaptive_run);
            let inner = Arc::clone(&self.inner);
            thread::spawn(move || {
                while run.load(Ordering::SeqCst) {
                    match peer_keyframe_rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(_ssrc) => {
                            let guard = inner.lock().unwrap_or_else(|e| e.into_inner());
                            if let Some(sender) = &guard.sender {
                                sender.request_keyframe();
                            }
                        }
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
        };

        let we_request_keyframe_handle = {
            let run = Arc::clone(&adaptive_run);
            let sp = Arc::clone(&socket_pair);
            let logger = self.logger.clone();
            thread::spawn(move || {
                while run.load(Ordering::SeqCst) {
                    match keyframe_from_decode_rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(remote_ssrc) => {
                            sink_info!(logger, "[RtpSession] requesting key frame from peer ssrc={remote_ssrc:#010x}");
                            sp.force_key_frame(remote_ssrc);
                        }
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
        };

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        *workers = Some(Workers {
            adaptive_run,
            adaptive_handle: Some(adaptive_handle),
            remb_handle: Some(remb_handle),
            peer_requests_keyframe_handle: Some(peer_requests_keyframe_handle),
            we_request_keyframe_handle: Some(we_request_keyframe_handle),
        });
    }

    /// `updateMedia(send, recv)`: stores the new descriptions
    /// and rescales bitrate bounds to the (possibly new) resolution. Allowed
    /// from any state.
    pub fn update_media(&self, send: MediaDescription, recv: MediaDescription) -> Result<(), SessionError> {
        let mut guard = self.inner.lock()?;
        let (w, h) = (guard.video_width, guard.video_height);
        guard.bitrate.min_kbps = send.codec.min_bitrate_kbps;
        guard.bitrate.max_kbps = send.codec.max_bitrate_kbps;
        guard.bitrate.rescale_for_resolution(w, h);
        guard.send_desc = Some(send);
        guard.recv_desc = Some(recv);
        Ok(())
    }

    /// `setMuted(dir, bool)`: suppresses or restarts the given
    /// side without tearing down the socket pair. Only valid once `Running`
    /// or `Conferenced`.
    pub fn set_muted(&self, dir: Direction, muted: bool) -> Result<(), SessionError> {
        let mut guard = self.inner.lock()?;
        if !matches!(guard.state, SessionState::Running { .. } | SessionState::Conferenced) {
            return Err(SessionError::InvalidTransition {
                stimulus: "setMuted",
                state: state_name(&guard.state),
            });
        }
        match dir {
            Direction::Send => {
                if let Some(sp) = &guard.socket_pair {
                    sp.transport().set_send_suppressed(muted);
                }
                if muted {
                    if let Some(recorder) = &guard.recorder {
                        recorder.detach_local();
                    }
                } else {
                    let stream = guard.local_media_stream();
                    if let (Some(recorder), Some(bus)) =
                        (guard.recorder.clone(), guard.active_send_bus())
                    {
                        recorder.rebind_local(stream, bus);
                    }
                }
            }
            Direction::Recv => {
                if let Some(receiver) = &guard.receiver {
                    receiver.set_suppressed(muted);
                }
                if muted {
                    if let Some(recorder) = &guard.recorder {
                        recorder.detach_remote();
                    }
                } else {
                    let stream = MediaStream::new(
                        FrameFormat::Rgb,
                        guard.video_width,
                        guard.video_height,
                        guard.framerate(),
                    );
                    if let (Some(recorder), Some(bus)) =
                        (guard.recorder.clone(), guard.decoded_bus.clone())
                    {
                        recorder.rebind_remote(stream, bus);
                    }
                }
            }
        }
        Ok(())
    }

    /// `initRecorder`: queries the local source's and the remote receiver's
    /// current `MediaStream` descriptor and attaches whichever sides `sink`
    /// accepts. Only one recorder may be attached at a time; a prior
    /// attachment is detached first.
    pub fn init_recorder(&self, sink: Arc<dyn RecorderSink>) -> Result<(), SessionError> {
        let (local, remote) = {
            let guard = self.inner.lock()?;
            let local = guard
                .active_send_bus()
                .map(|bus| (guard.local_media_stream(), bus));
            let remote = guard.decoded_bus.clone().map(|bus| {
                (MediaStream::new(FrameFormat::Rgb, guard.video_width, guard.video_height, guard.framerate()), bus)
            });
            (local, remote)
        };
        let attachment = RecorderAttachment::init(sink, local, remote, self.logger.clone())
            .map_err(|e| SessionError::Recorder(e.to_string()))?;
        let mut guard = self.inner.lock()?;
        guard.recorder = Some(Arc::new(attachment));
        Ok(())
    }

    /// `deinitRecorder`: detaches and drops any attached recorder.
    pub fn deinit_recorder(&self) -> Result<(), SessionError> {
        let recorder = self.inner.lock()?.recorder.take();
        if let Some(recorder) = recorder {
            match Arc::try_unwrap(recorder) {
                Ok(attachment) => attachment.deinit(),
                Err(_) => sink_warn!(self.logger, "[RtpSession] deinit_recorder: attachment still referenced"),
            }
        }
        Ok(())
    }

    /// `enterConference(conf)`: detaches the sender
    /// from local capture and attaches it to the mixer's output; detaches
    /// the receiver from its local sink and attaches it to a mixer input
    /// slot. The sender is always restarted — many hardware encoders cannot
    /// cleanly switch input resolution mid-stream.
    /// `peer_source_id` identifies this session's remote stream within the
    /// mixer's `(callId, streamId)` namespace — its decoded frames become
    /// one of the mixer's N inputs.
    ///
    /// Callable from `Running` or `Conferenced`; calling it again while
    /// already conferenced switches to `mixer`, first detaching from
    /// whichever mixer was previously joined. Two successive calls with the
    /// same mixer/source are idempotent.
    pub fn enter_conference(&self, mixer: Arc<VideoMixer>, peer_source_id: SourceId) -> Result<(), SessionError> {
        {
            let guard = self.inner.lock()?;
            if !matches!(guard.state, SessionState::Running { .. } | SessionState::Conferenced) {
                return Err(SessionError::InvalidTransition {
                    stimulus: "enterConference",
                    state: state_name(&guard.state),
                });
            }
        }

        if let Some(sp) = self.current_socket_pair() {
            restart_sender(
                &self.inner,
                &self.encoder_factory,
                self.mtu,
                &sp,
                &self.logger,
                Some(Arc::clone(&mixer)),
            )?;
        }

        let mut guard = self.inner.lock()?;
        if let Some(old_mixer) = guard.mixer.take() {
            if let Some(id) = guard.mixer_source_id.take() {
                old_mixer.remove_source(&id);
            }
        }
        if let Some(decoded_bus) = guard.decoded_bus.clone() {
            mixer.add_video_source(peer_source_id.clone(), decoded_bus);
        }
        guard.mixer = Some(mixer);
        guard.mixer_source_id = Some(peer_source_id);
        guard.state = SessionState::Conferenced;

        // A recording in progress on a 1:1 call must seamlessly continue on
        // the conference's mixed output.
        if let (Some(recorder), Some(bus)) = (guard.recorder.clone(), guard.active_send_bus()) {
            let stream = guard.local_media_stream();
            recorder.rebind_local(stream, bus);
        }
        Ok(())
    }

    /// `exitConference()`: inverse of
    /// [`enter_conference`] — detaches from the mixer and restores the local
    /// source/sink, restarting the sender.
    pub fn exit_conference(&self) -> Result<(), SessionError> {
        {
            let guard = self.inner.lock()?;
            if !matches!(guard.state, SessionState::Conferenced) {
                return Err(SessionError::InvalidTransition {
                    stimulus: "exitConference",
                    state: state_name(&guard.state),
                });
            }
        }

        if let Some(sp) = self.current_socket_pair() {
            restart_sender(&self.inner, &self.encoder_factory, self.mtu, &sp, &self.logger, None)?;
        }

        let mut guard = self.inner.lock()?;
        if let Some(mixer) = guard.mixer.take() {
            if let Some(id) = guard.mixer_source_id.take() {
                mixer.remove_source(&id);
            }
        }
        guard.state = SessionState::Running { send: true, recv: true };

        if let (Some(recorder), Some(bus)) = (guard.recorder.clone(), guard.active_send_bus()) {
            let stream = guard.local_media_stream();
            recorder.rebind_local(stream, bus);
        }
        Ok(())
    }

    fn current_socket_pair(&self) -> Option<Arc<SocketPair>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).socket_pair.clone()
    }

    /// `forceKeyFrame()`: requests an FIR from the peer on
    /// our current receive SSRC, e.g. in response to an unrecoverable loss
    /// detected upstream of the core.
    pub fn force_key_frame(&self) -> Result<(), SessionError> {
        let guard = self.inner.lock()?;
        if let (Some(sp), Some(ssrc)) = (&guard.socket_pair, guard.remote_recv_ssrc) {
            sp.force_key_frame(ssrc);
        }
        Ok(())
    }

    /// `stop()`: stops sender and receiver, interrupts
    /// the socket pair, joins every worker thread, and resets bitrate info
    /// to defaults. Allowed from any state; idempotent once `Stopped`.
    pub fn stop(&self) -> Result<(), SessionError> {
        let (sender, receiver, camera, socket_pair, mixer, mixer_source_id) = {
            let mut guard = self.inner.lock()?;
            if matches!(guard.state, SessionState::Stopped) {
                return Ok(());
            }
            guard.state = SessionState::Stopped;
            guard.bitrate.reset_to_defaults();
            (
                guard.sender.take(),
                guard.receiver.take(),
                guard.camera.take(),
                guard.socket_pair.take(),
                guard.mixer.take(),
                guard.mixer_source_id.take(),
            )
        };

        if let Some(workers) = self.workers.lock().unwrap_or_else(|e| e.into_inner()).take() {
            workers.stop_and_join();
        }
        if let Some(sp) = &socket_pair {
            sp.interrupt();
        }
        if let Some(sender) = sender {
            sender.stop_and_join(Duration::from_secs(1));
        }
        if let Some(receiver) = receiver {
            receiver.stop_and_join();
        }
        if let Some(camera) = camera {
            camera.stop();
        }
        if let (Some(mixer), Some(id)) = (mixer, mixer_source_id) {
            mixer.remove_source(&id);
        }

        sink_info!(self.logger, "[RtpSession] stopped");
        Ok(())
    }
}

fn codec_spec(desc: &MediaDescription, width: u32, height: u32, framerate: u32) -> CodecSpec {
    let framerate = if framerate == 0 { DEFAULT_FRAMERATE } else { framerate };
    CodecSpec {
        name: desc.codec.name.clone(),
        width,
        height,
        framerate,
        bitrate_kbps: desc.codec.bitrate_kbps,
        keyframe_interval: default_keyframe_interval(framerate),
    }
}

fn build_srtp_config(
    send: &MediaDescription,
    recv: &MediaDescription,
) -> Result<Option<crate::srtp::SrtpSessionConfig>, SessionError> {
    match (&send.crypto, &recv.crypto) {
        (Some(out_crypto), Some(in_crypto)) => {
            let (profile, outbound) =
                out_crypto.resolve().map_err(|e| SessionError::CryptoInit(e.0))?;
            let (_in_profile, inbound) =
                in_crypto.resolve().map_err(|e| SessionError::CryptoInit(e.0))?;
            Ok(Some(crate::srtp::SrtpSessionConfig { profile, outbound, inbound }))
        }
        (None, None) => Ok(None),
        _ => Err(SessionError::CryptoInit(
            "crypto must be set on both directions or neither".into(),
        )),
    }
}

/// Stops the current [`SenderPump`] and starts a fresh one reading from
/// either the local camera (`mixer = None`) or `mixer`'s output, seeding the
/// new pump's sequence number from the torn-down transport's last value so
/// the peer sees a continuous stream.
fn restart_sender(
    inner: &Arc<Mutex<Inner>>,
    encoder_factory: &EncoderFactory,
    mtu: usize,
    socket_pair: &Arc<SocketPair>,
    logger: &Arc<dyn LogSink>,
    mixer: Option<Arc<VideoMixer>>,
) -> Result<(), SessionError> {
    let (ssrc, bus, desc, width, height, framerate, current_kbps) = {
        let mut guard = inner.lock()?;
        if let Some(old) = guard.sender.take() {
            old.stop_and_join(Duration::from_secs(1));
        }
        let Some(desc) = guard.send_desc.clone() else {
            return Ok(());
        };
        let ssrc = guard
            .local_send_ssrc
            .ok_or_else(|| SessionError::Fatal("sender restart with no local ssrc".into()))?;
        let bus = if let Some(m) = &mixer {
            m.output_bus()
        } else {
            guard
                .active_send_bus()
                .ok_or_else(|| SessionError::Fatal("sender restart with no source attached".into()))?
        };
        let framerate = guard.framerate();
        (ssrc, bus, desc, guard.video_width, guard.video_height, framerate, guard.bitrate.current_kbps)
    };

    let next_seq = socket_pair
        .transport()
        .last_seq_val_out(ssrc)
        .ok()
        .map(|s| s.wrapping_add(1));

    let spec = codec_spec(&desc, width, height, framerate);
    let encoder = (encoder_factory)(&spec)?;
    let new_sender = SenderPump::spawn(
        socket_pair.transport(),
        bus,
        encoder,
        ssrc,
        next_seq,
        current_kbps,
        mtu,
        logger.clone(),
    );

    let mut guard = inner.lock()?;
    guard.sender = Some(new_sender);
    sink_info!(logger, "[RtpSession] sender restarted, seq continuity preserved");
    Ok(())
}

fn adaptive_loop_thread(
    run: Arc<AtomicBool>,
    inner: Arc<Mutex<Inner>>,
    socket_pair: Arc<SocketPair>,
    encoder_factory: EncoderFactory,
    mtu: usize,
    logger: Arc<dyn LogSink>,
) {
    let mut loop_state = AdaptiveLoop::new(Instant::now());
    sink_info!(logger, "[RtpSession] adaptive loop started");

    while run.load(Ordering::SeqCst) {
        // `waitForRTCP(4s)` acts as both interval and event.
        socket_pair.wait_for_rtcp(Duration::from_secs(4));
        if !run.load(Ordering::SeqCst) {
            break;
        }

        let rr = socket_pair.get_rtcp_rr();
        let remb = socket_pair.get_rtcp_remb();
        if rr.is_empty() && remb.is_empty() {
            continue;
        }

        let (decision, needs_restart) = {
            let mut guard = match inner.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            if !matches!(guard.state, SessionState::Running { .. } | SessionState::Conferenced) {
                continue;
            }
            let auto = guard
                .send_desc
                .as_ref()
                .map(|d| d.codec.auto_quality_enabled)
                .unwrap_or(false);
            if !auto {
                continue;
            }
            let now = Instant::now();
            let decision = loop_state.tick(&mut guard.bitrate, &rr, &remb, now);
            if let BitrateDecision::Applied { new_kbps, .. } = decision
                && let Some(sender) = &guard.sender
            {
                sender.set_bitrate_kbps(new_kbps);
            }
            let needs_restart = guard.sender.as_ref().map(|s| s.needs_restart()).unwrap_or(false);
            (decision, needs_restart)
        };

        if let BitrateDecision::Applied { new_kbps, reason } = decision {
            sink_info!(logger, "[RtpSession] adaptive loop -> {new_kbps}kbps ({reason})");
        }

        if needs_restart {
            let mixer = inner.lock().unwrap_or_else(|e| e.into_inner()).mixer.clone();
            match restart_sender(&inner, &encoder_factory, mtu, &socket_pair, &logger, mixer) {
                Ok(()) => loop_state.note_restart(Instant::now()),
                Err(e) => sink_error!(logger, "[RtpSession] encoder-forced sender restart failed: {e}"),
            }
        }
    }
    sink_info!(logger, "[RtpSession] adaptive loop stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use base64::Engine;
    use crate::log::noop_log_sink::NoopLogSink;
    use crate::mixer::Layout;
    use crate::session::media_description::{CodecDescription, CryptoInfo, DirectionFlags};

    fn codec(name: &str) -> CodecDescription {
        CodecDescription {
            name: name.into(),
            payload_type: 96,
            clock_rate: 90_000,
            bitrate_kbps: 500,
            min_bitrate_kbps: 100,
            max_bitrate_kbps: 2000,
            quality: None,
            auto_quality_enabled: true,
        }
    }

    fn media(active: bool, crypto: Option<CryptoInfo>) -> MediaDescription {
        MediaDescription {
            direction: DirectionFlags { enabled: active, on_hold: false },
            addr: "127.0.0.1:0".parse().unwrap(),
            rtcp_addr: None,
            codec: codec("VP8"),
            crypto,
        }
    }

    fn crypto() -> CryptoInfo {
        CryptoInfo {
            suite: "AES_CM_128_HMAC_SHA1_80".into(),
            key_info_b64: base64::engine::general_purpose::STANDARD.encode([7u8; 30]),
        }
    }

    fn session() -> RtpSession {
        let enc: EncoderFactory = Arc::new(|_spec| {
            Err(SessionError::EncoderInit("no encoder in test harness".into()))
        });
        let dec: DecoderFactory = Arc::new(|_spec| {
            Err(SessionError::DecoderInit("no decoder in test harness".into()))
        });
        RtpSession::new(enc, dec, 1200, Arc::new(NoopLogSink))
    }

    #[test]
    fn starts_idle() {
        assert_eq!(session().state(), SessionState::Idle);
    }

    #[test]
    fn preview_and_decoded_buses_are_unset_before_start() {
        let s = session();
        assert!(s.outbound_preview_bus().is_none());
        assert!(s.decoded_bus().is_none());
    }

    #[test]
    fn set_muted_before_start_is_rejected() {
        let s = session();
        let err = s.set_muted(Direction::Send, true).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { stimulus: "setMuted", .. }));
    }

    #[test]
    fn enter_conference_before_start_is_rejected() {
        let s = session();
        let (sources_updated_tx, _sources_updated_rx) = channel();
        let mixer = Arc::new(VideoMixer::new(
            Layout::Grid,
            1280,
            720,
            30,
            sources_updated_tx,
            Arc::new(NoopLogSink),
        ));
        let err = s
            .enter_conference(mixer, SourceId::new("call", "stream"))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { stimulus: "enterConference", .. }));
    }

    #[test]
    fn exit_conference_without_entering_is_rejected() {
        let s = session();
        let err = s.exit_conference().unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { stimulus: "exitConference", .. }));
    }

    #[test]
    fn force_key_frame_before_start_is_a_harmless_noop() {
        let s = session();
        assert!(s.force_key_frame().is_ok());
    }

    #[test]
    fn stop_before_start_is_idempotent() {
        let s = session();
        assert!(s.stop().is_ok());
        assert!(s.stop().is_ok());
        assert_eq!(s.state(), SessionState::Stopped);
    }

    #[test]
    fn update_media_rescales_bitrate_bounds() {
        let s = session();
        let mut send = media(true, None);
        send.codec.min_bitrate_kbps = 50;
        send.codec.max_bitrate_kbps = 1500;
        s.update_media(send, media(true, None)).unwrap();
        let bitrate = s.bitrate();
        assert_eq!(bitrate.min_kbps, 50);
        assert_eq!(bitrate.max_kbps, 1500);
    }

    #[test]
    fn build_srtp_config_requires_crypto_on_both_sides_or_neither() {
        let plain_send = media(true, None);
        let plain_recv = media(true, None);
        assert!(build_srtp_config(&plain_send, &plain_recv).unwrap().is_none());

        let crypto_send = media(true, Some(crypto()));
        let err = build_srtp_config(&crypto_send, &plain_recv).unwrap_err();
        assert!(matches!(err, SessionError::CryptoInit(_)));

        let crypto_recv = media(true, Some(crypto()));
        let config = build_srtp_config(&crypto_send, &crypto_recv).unwrap();
        assert!(config.is_some());
    }

    #[test]
    fn codec_spec_falls_back_to_default_framerate_and_derives_keyframe_interval() {
        let desc = media(true, None);
        let spec = codec_spec(&desc, 1280, 720, 0);
        assert_eq!(spec.framerate, DEFAULT_FRAMERATE);
        assert_eq!(spec.keyframe_interval, DEFAULT_FRAMERATE * 2);
        assert_eq!(spec.width, 1280);
        assert_eq!(spec.height, 720);
    }

    #[test]
    fn device_params_default_framerate_is_respected_when_nonzero() {
        let desc = media(true, None);
        let spec = codec_spec(&desc, 640, 480, 24);
        assert_eq!(spec.framerate, 24);
        assert_eq!(spec.keyframe_interval, 48);
    }

    struct AcceptAllSink;
    impl crate::recorder::RecorderSink for AcceptAllSink {
        fn accepts(&self, _source: crate::recorder::RecordSource, _stream: &crate::media::frame::MediaStream) -> bool {
            true
        }
        fn on_frame(&self, _source: crate::recorder::RecordSource, _frame: &crate::media::frame::VideoFrame) {}
    }

    #[test]
    fn init_recorder_before_start_has_no_stream_to_offer() {
        let s = session();
        let err = s.init_recorder(Arc::new(AcceptAllSink)).unwrap_err();
        assert!(matches!(err, SessionError::Recorder(_)));
    }

    #[test]
    fn deinit_recorder_without_attachment_is_a_harmless_noop() {
        let s = session();
        assert!(s.deinit_recorder().is_ok());
    }

    #[test]
    fn unknown_crypto_suite_is_rejected() {
        let mut bad = crypto();
        bad.suite = "SOMETHING_ELSE".into();
        let send = media(true, Some(bad));
        let recv = media(true, Some(crypto()));
        let err = build_srtp_config(&send, &recv).unwrap_err();
        assert!(matches!(err, SessionError::CryptoInit(_)));
    }
}
