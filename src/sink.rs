//! Publishes decoded/mixed frames to a shared in-process surface for
//! embedded or remote UI consumption.
//!
//! Unlike [`FrameBus`], which is a push multiplexer for pipeline-internal
//! consumers (mixer, recorder), this is a pull surface: each named slot
//! (e.g. "self-view", "remote-view", "mixer-output") keeps only its most
//! recently published frame, readable without blocking or missing frames a
//! slow UI thread didn't get to in time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::log::log_sink::LogSink;
use crate::media::frame::VideoFrame;
use crate::media::frame_bus::FrameBus;
use crate::sink_info;

struct Surface {
    run: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<VideoFrame>>>,
    handle: Option<JoinHandle<()>>,
}

impl Surface {
    fn spawn(name: String, bus: FrameBus, logger: Arc<dyn LogSink>) -> Self {
        let run = Arc::new(AtomicBool::new(true));
        let latest: Arc<Mutex<Option<VideoFrame>>> = Arc::new(Mutex::new(None));

        let run_clone = Arc::clone(&run);
        let latest_clone = Arc::clone(&latest);
        let sub = bus.subscribe();

        let handle = thread::spawn(move || {
            sink_info!(logger, "[Sink] surface '{name}' bound");
            while run_clone.load(Ordering::SeqCst) {
                let Some(frame) = sub.recv() else {
                    break;
                };
                if !run_clone.load(Ordering::SeqCst) {
                    break;
                }
                *latest_clone.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
            }
            sink_info!(logger, "[Sink] surface '{name}' unbound");
        });

        Self { run, latest, handle: Some(handle) }
    }

    fn snapshot(&self) -> Option<VideoFrame> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn stop_and_join(mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Registry of named, swappable read surfaces fed by [`FrameBus`]es
/// (camera preview, the peer's decoded stream, the mixer's composed
/// output, ...). A UI layer calls [`FrameSinkMultiplexer::snapshot`] on its
/// own render tick rather than subscribing to the pipeline directly.
#[derive(Clone)]
pub struct FrameSinkMultiplexer {
    surfaces: Arc<Mutex<HashMap<String, Surface>>>,
    logger: Arc<dyn LogSink>,
}

impl FrameSinkMultiplexer {
    pub fn new(logger: Arc<dyn LogSink>) -> Self {
        Self { surfaces: Arc::new(Mutex::new(HashMap::new())), logger }
    }

    /// Binds `name` to `bus`, replacing whatever surface previously held
    /// that name (e.g. swapping "self-view" from the camera bus to the
    /// mixer's output bus on `enterConference`).
    pub fn bind(&self, name: impl Into<String>, bus: FrameBus) {
        let name = name.into();
        let surface = Surface::spawn(name.clone(), bus, self.logger.clone());
        let mut surfaces = self.surfaces.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = surfaces.insert(name, surface) {
            old.stop_and_join();
        }
    }

    /// Removes `name`, stopping its forwarder thread. A no-op if unbound.
    pub fn unbind(&self, name: &str) {
        let removed = self.surfaces.lock().unwrap_or_else(|e| e.into_inner()).remove(name);
        if let Some(surface) = removed {
            surface.stop_and_join();
        }
    }

    /// The most recently published frame on `name`, or `None` if the
    /// surface is unbound or has not received a frame yet.
    pub fn snapshot(&self, name: &str) -> Option<VideoFrame> {
        self.surfaces.lock().unwrap_or_else(|e| e.into_inner()).get(name)?.snapshot()
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.surfaces.lock().unwrap_or_else(|e| e.into_inner()).contains_key(name)
    }

    pub fn surface_names(&self) -> Vec<String> {
        self.surfaces.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::log::noop_log_sink::NoopLogSink;
    use std::time::Duration;

    fn multiplexer() -> FrameSinkMultiplexer {
        FrameSinkMultiplexer::new(Arc::new(NoopLogSink))
    }

    #[test]
    fn unbound_surface_has_no_snapshot() {
        let mux = multiplexer();
        assert!(mux.snapshot("self-view").is_none());
        assert!(!mux.is_bound("self-view"));
    }

    #[test]
    fn bound_surface_reflects_published_frames() {
        let mux = multiplexer();
        let bus = FrameBus::new();
        mux.bind("self-view", bus.clone());
        bus.publish(VideoFrame::synthetic(4, 4, 1));
        thread::sleep(Duration::from_millis(50));
        let frame = mux.snapshot("self-view").expect("frame published");
        assert_eq!(frame.width, 4);
    }

    #[test]
    fn rebinding_replaces_the_previous_source() {
        let mux = multiplexer();
        let camera_bus = FrameBus::new();
        mux.bind("self-view", camera_bus.clone());
        camera_bus.publish(VideoFrame::synthetic(4, 4, 1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(mux.snapshot("self-view").unwrap().width, 4);

        let mixer_bus = FrameBus::new();
        mux.bind("self-view", mixer_bus.clone());
        mixer_bus.publish(VideoFrame::synthetic(8, 8, 2));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(mux.snapshot("self-view").unwrap().width, 8);
    }

    #[test]
    fn unbind_removes_surface_and_stops_feed() {
        let mux = multiplexer();
        let bus = FrameBus::new();
        mux.bind("remote-view", bus);
        assert!(mux.is_bound("remote-view"));
        mux.unbind("remote-view");
        assert!(!mux.is_bound("remote-view"));
        assert!(mux.snapshot("remote-view").is_none());
    }

    #[test]
    fn surface_names_lists_all_bound_surfaces() {
        let mux = multiplexer();
        mux.bind("self-view", FrameBus::new());
        mux.bind("remote-view", FrameBus::new());
        let mut names = mux.surface_names();
        names.sort();
        assert_eq!(names, vec!["remote-view".to_string(), "self-view".to_string()]);
    }
}
