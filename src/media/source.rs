use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};
use std::thread;
use std::time::Duration;

use crate::log::{log_level::LogLevel, log_sink::LogSink};
use crate::sink_info;

use super::frame::VideoFrame;
use super::frame_bus::FrameBus;

/// Scheme of a capture source URI. Direct
/// capture-format overrides (`avfoundation`, `v4l2`, `vfwcap`, `dxgigrab`,
/// `x11grab`) are folded into `Camera` with the scheme name kept verbatim,
/// since the core treats them identically (opaque to everything but the
/// capture backend it never owns).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUri {
    Camera { backend: String, name: String },
    Display { id: String, width: u32, height: u32 },
    File { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUriError(pub String);

impl fmt::Display for SourceUriError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid source uri: {}", self.0)
    }
}
impl std::error::Error for SourceUriError {}

impl SourceUri {
    /// Parses a `scheme://location` source URI. `display`
    /// URIs carry a `ID WxH` suffix selecting capture geometry.
    pub fn parse(uri: &str) -> Result<Self, SourceUriError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| SourceUriError(uri.to_string()))?;
        match scheme {
            "camera" | "avfoundation" | "v4l2" | "vfwcap" | "dxgigrab" | "x11grab" => {
                Ok(SourceUri::Camera { backend: scheme.to_string(), name: rest.to_string() })
            }
            "display" => {
                let mut parts = rest.splitn(2, ' ');
                let id = parts.next().unwrap_or_default().to_string();
                let (w, h) = parts
                    .next()
                    .and_then(|geom| geom.split_once('x').or_else(|| geom.split_once('X')))
                    .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)))
                    .unwrap_or((0, 0));
                Ok(SourceUri::Display { id, width: w, height: h })
            }
            "file" => Ok(SourceUri::File { path: rest.to_string() }),
            other => Err(SourceUriError(format!("unknown scheme '{other}'"))),
        }
    }
}

/// Capture descriptor. Set per input switch; may
/// change mid-session when the user switches camera or starts a file-based
/// share.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParams {
    pub uri: SourceUri,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub looping: bool,
}

impl DeviceParams {
    pub fn new(uri: SourceUri, width: u32, height: u32, framerate: u32) -> Self {
        Self { uri, format: String::new(), width, height, framerate, looping: false }
    }
}

/// One-shot "camera opened" handshake: the capture thread discovers the
/// device's actual resolution/framerate and reports it once; the session
/// awaits it before declaring the send side ready.
pub struct CaptureReadyRx(std::sync::mpsc::Receiver<DeviceParams>);
pub struct CaptureReadyTx(std::sync::mpsc::SyncSender<DeviceParams>);

pub fn capture_ready_channel() -> (CaptureReadyTx, CaptureReadyRx) {
    let (tx, rx) = std::sync::mpsc::sync_channel(1);
    (CaptureReadyTx(tx), CaptureReadyRx(rx))
}

impl CaptureReadyTx {
    pub fn send(self, params: DeviceParams) {
        let _ = self.0.send(params);
    }
}

impl CaptureReadyRx {
    pub fn wait(self, timeout: Duration) -> Option<DeviceParams> {
        self.0.recv_timeout(timeout).ok()
    }
}

/// A frame producer the sender pump pulls from. Implemented by the camera
/// capture worker and by the video mixer; the two are mutually exclusive
/// sources for a session's sender, never both at once.
pub trait Source: Send {
    fn frame_bus(&self) -> FrameBus;
    fn stop(&self);
}

/// Spawns a worker thread producing synthetic frames at `params.framerate`,
/// standing in for OS camera/file-capture plumbing out of scope for this
/// crate. Real backends plug in behind the same [`Source`] trait without
/// touching the sender pipeline.
pub struct CameraSource {
    bus: FrameBus,
    run: Arc<AtomicBool>,
}

impl CameraSource {
    pub fn open(params: DeviceParams, logger: Arc<dyn LogSink>, ready: CaptureReadyTx) -> Self {
        let bus = FrameBus::new();
        let run = Arc::new(AtomicBool::new(true));

        let bus_clone = bus.clone();
        let run_clone = Arc::clone(&run);
        let frame_interval = Duration::from_millis(1000 / params.framerate.max(1) as u64);
        let (w, h) = (params.width, params.height);

        thread::spawn(move || {
            sink_info!(logger, "[Source] camera worker started {w}x{h}");
            ready.send(DeviceParams::new(params.uri, w, h, params.framerate));
            let mut tick: u8 = 0;
            while run_clone.load(Ordering::SeqCst) {
                bus_clone.publish(VideoFrame::synthetic(w, h, tick));
                tick = tick.wrapping_add(1);
                thread::sleep(frame_interval);
            }
            sink_info!(logger, "[Source] camera worker stopped");
        });

        Self { bus, run }
    }
}

impl Source for CameraSource {
    fn frame_bus(&self) -> FrameBus {
        self.bus.clone()
    }

    fn stop(&self) {
        self.run.store(false, Ordering::SeqCst);
    }
}

/// Channel-backed notification a mixer/source uses to tell the conference
/// layer its participant set changed.
pub type SourcesUpdatedTx = Sender<()>;
pub fn sources_updated_channel() -> (SourcesUpdatedTx, std::sync::mpsc::Receiver<()>) {
    channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camera_uri() {
        let uri = SourceUri::parse("camera://front0").unwrap();
        assert_eq!(uri, SourceUri::Camera { backend: "camera".into(), name: "front0".into() });
    }

    #[test]
    fn parses_display_uri_with_geometry() {
        let uri = SourceUri::parse("display://1 1920x1080").unwrap();
        assert_eq!(uri, SourceUri::Display { id: "1".into(), width: 1920, height: 1080 });
    }

    #[test]
    fn parses_direct_backend_override() {
        let uri = SourceUri::parse("v4l2://dev0").unwrap();
        assert_eq!(uri, SourceUri::Camera { backend: "v4l2".into(), name: "dev0".into() });
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(SourceUri::parse("ftp://x").is_err());
    }

    #[test]
    fn rejects_missing_scheme_delimiter() {
        assert!(SourceUri::parse("camera-front0").is_err());
    }
}
