//! Attach/detach inbound and outbound streams to a media-recorder sink.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::log::log_sink::LogSink;
use crate::media::frame::{MediaStream, VideoFrame};
use crate::media::frame_bus::FrameBus;
use crate::{sink_info, sink_warn};

/// Which side of a session a recorded frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    /// Neither side had a stream to offer at `init` time.
    NoStream,
    /// The sink's `accepts` returned false for every offered side.
    Rejected,
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::NoStream => write!(f, "no stream available to attach"),
            RecorderError::Rejected => write!(f, "recorder rejected every offered stream"),
        }
    }
}

impl std::error::Error for RecorderError {}

/// External media-recorder contract: decides whether to accept a stream at
/// attach time, then receives every subsequent frame as an observer.
/// Implemented by the caller; this crate only calls it.
pub trait RecorderSink: Send + Sync {
    /// Called once per side at attach/rebind time with the stream's current
    /// format/resolution/framerate.
    fn accepts(&self, source: RecordSource, stream: &MediaStream) -> bool;
    fn on_frame(&self, source: RecordSource, frame: &VideoFrame);
}

/// One side's observer thread, mirroring `SenderPump`/`ReceiverPump`'s
/// cooperative-stop shape.
struct Feed {
    run: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Feed {
    fn spawn(
        source: RecordSource,
        bus: FrameBus,
        sink: Arc<dyn RecorderSink>,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        let run = Arc::new(AtomicBool::new(true));
        let run_clone = Arc::clone(&run);
        let sub = bus.subscribe();

        let handle = thread::spawn(move || {
            sink_info!(logger, "[Recorder] {source:?} feed started");
            while run_clone.load(Ordering::SeqCst) {
                let Some(frame) = sub.recv() else {
                    break;
                };
                if !run_clone.load(Ordering::SeqCst) {
                    break;
                }
                sink.on_frame(source, &frame);
            }
            sink_info!(logger, "[Recorder] {source:?} feed stopped");
        });

        Self { run, handle: Some(handle) }
    }

    fn stop_and_join(mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Tracks a recorder's attachment to a session's local (sent) and remote
/// (received) streams. `rebind_local`/`rebind_remote` swap the feed's source
/// bus without tearing down the attachment, so a recording in progress
/// continues seamlessly across `enterConference`/`exitConference` onto the
/// conference's mixed output.
pub struct RecorderAttachment {
    sink: Arc<dyn RecorderSink>,
    logger: Arc<dyn LogSink>,
    local: Mutex<Option<Feed>>,
    remote: Mutex<Option<Feed>>,
}

impl RecorderAttachment {
    /// `initRecorder`: queries the local source's and the remote receiver's
    /// current `MediaStream` descriptor and attaches whichever sides the
    /// recorder accepts. Fails only if no side was offered, or the recorder
    /// accepted neither.
    pub fn init(
        sink: Arc<dyn RecorderSink>,
        local: Option<(MediaStream, FrameBus)>,
        remote: Option<(MediaStream, FrameBus)>,
        logger: Arc<dyn LogSink>,
    ) -> Result<Self, RecorderError> {
        if local.is_none() && remote.is_none() {
            return Err(RecorderError::NoStream);
        }

        let attachment = Self {
            sink: Arc::clone(&sink),
            logger: logger.clone(),
            local: Mutex::new(None),
            remote: Mutex::new(None),
        };

        if let Some((stream, bus)) = local {
            if sink.accepts(RecordSource::Local, &stream) {
                let feed = Feed::spawn(RecordSource::Local, bus, Arc::clone(&sink), logger.clone());
                *attachment.local.lock().unwrap_or_else(|e| e.into_inner()) = Some(feed);
            }
        }
        if let Some((stream, bus)) = remote {
            if sink.accepts(RecordSource::Remote, &stream) {
                let feed = Feed::spawn(RecordSource::Remote, bus, Arc::clone(&sink), logger.clone());
                *attachment.remote.lock().unwrap_or_else(|e| e.into_inner()) = Some(feed);
            }
        }

        if !attachment.has_local() && !attachment.has_remote() {
            return Err(RecorderError::Rejected);
        }

        sink_info!(attachment.logger, "[Recorder] attached");
        Ok(attachment)
    }

    /// `deinitRecorder`: detaches both sides. The sink itself outlives this
    /// call; the caller owns it.
    pub fn deinit(self) {
        if let Some(feed) = self.local.into_inner().unwrap_or_else(|e| e.into_inner()) {
            feed.stop_and_join();
        }
        if let Some(feed) = self.remote.into_inner().unwrap_or_else(|e| e.into_inner()) {
            feed.stop_and_join();
        }
        sink_info!(self.logger, "[Recorder] detached");
    }

    /// Detaches the local side only, leaving the remote feed running. Called
    /// from `setMuted` to detach the recorder's local attachment when present.
    pub fn detach_local(&self) {
        if let Some(feed) = self.local.lock().unwrap_or_else(|e| e.into_inner()).take() {
            feed.stop_and_join();
        }
    }

    pub fn detach_remote(&self) {
        if let Some(feed) = self.remote.lock().unwrap_or_else(|e| e.into_inner()).take() {
            feed.stop_and_join();
        }
    }

    /// Rebinds the local feed onto `bus` (the mixer's output, or the local
    /// camera again on conference exit) without detaching the recorder.
    /// No-op if the sink rejects the new stream's descriptor, leaving the
    /// previous feed (if any) attached.
    pub fn rebind_local(&self, stream: MediaStream, bus: FrameBus) {
        self.rebind(&self.local, RecordSource::Local, stream, bus);
    }

    /// Rebinds the remote feed, used when the receiver's sink moves between
    /// a 1:1 decode path and a mixer input slot.
    pub fn rebind_remote(&self, stream: MediaStream, bus: FrameBus) {
        self.rebind(&self.remote, RecordSource::Remote, stream, bus);
    }

    fn rebind(&self, slot: &Mutex<Option<Feed>>, source: RecordSource, stream: MediaStream, bus: FrameBus) {
        if !self.sink.accepts(source, &stream) {
            sink_warn!(self.logger, "[Recorder] rebind rejected by sink for {source:?}");
            return;
        }
        let feed = Feed::spawn(source, bus, Arc::clone(&self.sink), self.logger.clone());
        let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = guard.take() {
            old.stop_and_join();
        }
        *guard = Some(feed);
    }

    pub fn has_local(&self) -> bool {
        self.local.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn has_remote(&self) -> bool {
        self.remote.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::log::noop_log_sink::NoopLogSink;
    use crate::media::frame::{FrameFormat, VideoFrame};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingSink {
        accept: bool,
        frames: StdMutex<Vec<(RecordSource, u32)>>,
    }

    impl RecorderSink for RecordingSink {
        fn accepts(&self, _source: RecordSource, _stream: &MediaStream) -> bool {
            self.accept
        }
        fn on_frame(&self, source: RecordSource, frame: &VideoFrame) {
            self.frames.lock().unwrap().push((source, frame.width));
        }
    }

    fn stream() -> MediaStream {
        MediaStream::new(FrameFormat::Rgb, 640, 480, 30)
    }

    #[test]
    fn init_with_no_streams_fails() {
        let sink = Arc::new(RecordingSink { accept: true, frames: StdMutex::new(Vec::new()) });
        let err = RecorderAttachment::init(sink, None, None, Arc::new(NoopLogSink)).unwrap_err();
        assert_eq!(err, RecorderError::NoStream);
    }

    #[test]
    fn init_fails_when_sink_rejects_every_stream() {
        let sink = Arc::new(RecordingSink { accept: false, frames: StdMutex::new(Vec::new()) });
        let bus = FrameBus::new();
        let err = RecorderAttachment::init(sink, Some((stream(), bus)), None, Arc::new(NoopLogSink))
            .unwrap_err();
        assert_eq!(err, RecorderError::Rejected);
    }

    #[test]
    fn attached_local_feed_forwards_frames_to_sink() {
        let sink = Arc::new(RecordingSink { accept: true, frames: StdMutex::new(Vec::new()) });
        let bus = FrameBus::new();
        let attachment = RecorderAttachment::init(
            Arc::clone(&sink) as Arc<dyn RecorderSink>,
            Some((stream(), bus.clone())),
            None,
            Arc::new(NoopLogSink),
        )
        .unwrap();
        assert!(attachment.has_local());
        assert!(!attachment.has_remote());

        bus.publish(VideoFrame::synthetic(8, 8, 1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.frames.lock().unwrap().len(), 1);
        assert_eq!(sink.frames.lock().unwrap()[0].0, RecordSource::Local);

        attachment.deinit();
    }

    #[test]
    fn rebind_local_swaps_bus_without_detaching() {
        let sink = Arc::new(RecordingSink { accept: true, frames: StdMutex::new(Vec::new()) });
        let camera_bus = FrameBus::new();
        let attachment = RecorderAttachment::init(
            Arc::clone(&sink) as Arc<dyn RecorderSink>,
            Some((stream(), camera_bus.clone())),
            None,
            Arc::new(NoopLogSink),
        )
        .unwrap();

        let mixer_bus = FrameBus::new();
        attachment.rebind_local(stream(), mixer_bus.clone());
        assert!(attachment.has_local());

        mixer_bus.publish(VideoFrame::synthetic(16, 16, 2));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.frames.lock().unwrap().len(), 1);
        assert_eq!(sink.frames.lock().unwrap()[0].1, 16);

        attachment.deinit();
    }

    #[test]
    fn detach_local_leaves_remote_attached() {
        let sink = Arc::new(RecordingSink { accept: true, frames: StdMutex::new(Vec::new()) });
        let local_bus = FrameBus::new();
        let remote_bus = FrameBus::new();
        let attachment = RecorderAttachment::init(
            Arc::clone(&sink) as Arc<dyn RecorderSink>,
            Some((stream(), local_bus)),
            Some((stream(), remote_bus)),
            Arc::new(NoopLogSink),
        )
        .unwrap();

        attachment.detach_local();
        assert!(!attachment.has_local());
        assert!(attachment.has_remote());

        attachment.deinit();
    }
}
