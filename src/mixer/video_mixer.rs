use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::log::{log_level::LogLevel, log_sink::LogSink};
use crate::media::frame::{FrameFormat, VideoFrame};
use crate::media::frame_bus::{FrameBus, FrameSubscription};
use crate::sink_info;

use super::layout::Layout;

/// Default conference output resolution.
pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;

/// A registered mixer input, keyed by a `(callId, streamId)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId {
    pub call_id: String,
    pub stream_id: String,
}

impl SourceId {
    pub fn new(call_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), stream_id: stream_id.into() }
    }
}

enum InputKind {
    Video { sub: FrameSubscription, last_frame: Option<VideoFrame> },
    /// Contributes a placeholder tile with participant metadata instead of
    /// a decoded frame.
    AudioOnly { participant: String, voice_activity: bool },
}

struct MixerInput {
    kind: InputKind,
}

#[derive(Default)]
struct ActiveSelection {
    pinned: Option<SourceId>,
    auto: Option<SourceId>,
}

impl ActiveSelection {
    fn effective(&self) -> Option<&SourceId> {
        self.pinned.as_ref().or(self.auto.as_ref())
    }
}

/// N-source, 1-sink frame compositor. Runs its own
/// composition thread timed to the output framerate; sources are registered
/// and torn down from signaling/session code while the thread only reads.
pub struct VideoMixer {
    inputs: Arc<Mutex<HashMap<SourceId, MixerInput>>>,
    order: Arc<Mutex<Vec<SourceId>>>,
    active: Arc<Mutex<ActiveSelection>>,
    layout: Arc<Mutex<Layout>>,
    output: FrameBus,
    sources_updated: Sender<Vec<SourceId>>,
    run: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    width: u32,
    height: u32,
}

impl VideoMixer {
    pub fn new(
        layout: Layout,
        width: u32,
        height: u32,
        framerate: u32,
        sources_updated: Sender<Vec<SourceId>>,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        let inputs: Arc<Mutex<HashMap<SourceId, MixerInput>>> = Arc::new(Mutex::new(HashMap::new()));
        let order: Arc<Mutex<Vec<SourceId>>> = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(Mutex::new(ActiveSelection::default()));
        let layout_state = Arc::new(Mutex::new(layout));
        let output = FrameBus::new();
        let run = Arc::new(AtomicBool::new(true));

        let inputs_c = Arc::clone(&inputs);
        let order_c = Arc::clone(&order);
        let active_c = Arc::clone(&active);
        let layout_c = Arc::clone(&layout_state);
        let output_c = output.clone();
        let run_c = Arc::clone(&run);
        let frame_interval = Duration::from_millis(1000 / framerate.max(1) as u64);

        let handle = thread::spawn(move || {
            sink_info!(logger, "[Mixer] composition thread started {width}x{height}@{framerate}");
            while run_c.load(Ordering::SeqCst) {
                let frame = compose_once(&inputs_c, &order_c, &active_c, &layout_c, width, height);
                output_c.publish(frame);
                thread::sleep(frame_interval);
            }
            sink_info!(logger, "[Mixer] composition thread stopped");
        });

        Self {
            inputs,
            order,
            active,
            layout: layout_state,
            output,
            sources_updated,
            run,
            handle: Some(handle),
            width,
            height,
        }
    }

    pub fn output_bus(&self) -> FrameBus {
        self.output.clone()
    }

    pub fn set_layout(&self, layout: Layout) {
        *self.layout.lock().unwrap_or_else(|e| e.into_inner()) = layout;
    }

    /// Register a video source feeding decoded frames from `bus`.
    pub fn add_video_source(&self, id: SourceId, bus: FrameBus) {
        let sub = bus.subscribe();
        self.insert(id, InputKind::Video { sub, last_frame: None });
    }

    /// Register an audio-only participant, contributing a placeholder tile.
    pub fn add_audio_only_source(&self, id: SourceId, participant: String) {
        self.insert(id, InputKind::AudioOnly { participant, voice_activity: false });
    }

    fn insert(&self, id: SourceId, kind: InputKind) {
        {
            let mut inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
            inputs.insert(id.clone(), MixerInput { kind });
        }
        {
            let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
            if !order.contains(&id) {
                order.push(id);
            }
        }
        self.notify_sources_updated();
    }

    pub fn remove_source(&self, id: &SourceId) {
        self.inputs.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
        self.order.lock().unwrap_or_else(|e| e.into_inner()).retain(|x| x != id);
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.pinned.as_ref() == Some(id) {
            active.pinned = None;
        }
        if active.auto.as_ref() == Some(id) {
            active.auto = None;
        }
        drop(active);
        self.notify_sources_updated();
    }

    /// Pin or release the active stream. Pinning is exclusive: at most one
    /// stream is pinned at a time.
    pub fn set_active_stream(&self, id: &SourceId, active: bool) {
        let mut sel = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active {
            sel.pinned = Some(id.clone());
        } else if sel.pinned.as_ref() == Some(id) {
            sel.pinned = None;
        }
    }

    /// Releases any pin and returns to voice-activity auto-selection.
    pub fn reset_active_stream(&self) {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).pinned = None;
    }

    /// Voice-activity report feeding auto-selection when no stream is
    /// pinned (see `report_voice_activity`).
    pub fn report_voice_activity(&self, id: &SourceId, active: bool) {
        let mut inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(input) = inputs.get_mut(id) {
            if let InputKind::AudioOnly { voice_activity, .. } = &mut input.kind {
                *voice_activity = active;
            }
        }
        drop(inputs);
        if active {
            let mut sel = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if sel.pinned.is_none() {
                sel.auto = Some(id.clone());
            }
        }
    }

    pub fn source_count(&self) -> usize {
        self.order.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn notify_sources_updated(&self) {
        let order = self.order.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let _ = self.sources_updated.send(order);
    }
}

impl Drop for VideoMixer {
    fn drop(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn compose_once(
    inputs: &Arc<Mutex<HashMap<SourceId, MixerInput>>>,
    order: &Arc<Mutex<Vec<SourceId>>>,
    active: &Arc<Mutex<ActiveSelection>>,
    layout: &Arc<Mutex<Layout>>,
    width: u32,
    height: u32,
) -> VideoFrame {
    let order = order.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let mut inputs = inputs.lock().unwrap_or_else(|e| e.into_inner());
    let active_idx = {
        let sel = active.lock().unwrap_or_else(|e| e.into_inner());
        sel.effective().and_then(|id| order.iter().position(|x| x == id))
    };
    let layout = *layout.lock().unwrap_or_else(|e| e.into_inner());

    let tiles = layout.compute_tiles(order.len(), active_idx, width, height);
    let mut canvas = vec![0u8; (width as usize) * (height as usize) * 3];

    for (id, tile) in order.iter().zip(tiles.iter()) {
        if tile.width == 0 || tile.height == 0 {
            continue;
        }
        let Some(input) = inputs.get_mut(id) else { continue };
        match &mut input.kind {
            InputKind::Video { sub, last_frame } => {
                if let Some(f) = sub.try_latest() {
                    *last_frame = Some(f);
                }
                if let Some(frame) = last_frame {
                    blit(&mut canvas, width, frame, *tile);
                }
            }
            InputKind::AudioOnly { .. } => {
                fill(&mut canvas, width, *tile, [32, 32, 32]);
            }
        }
    }

    VideoFrame::new(width, height, FrameFormat::Rgb, canvas)
}

fn fill(canvas: &mut [u8], canvas_width: u32, tile: super::layout::TileRect, rgb: [u8; 3]) {
    for y in tile.y..(tile.y + tile.height) {
        for x in tile.x..(tile.x + tile.width) {
            let idx = ((y * canvas_width + x) * 3) as usize;
            if idx + 3 <= canvas.len() {
                canvas[idx..idx + 3].copy_from_slice(&rgb);
            }
        }
    }
}

/// Nearest-neighbor blit of `frame` into `tile`'s region of `canvas`.
fn blit(canvas: &mut [u8], canvas_width: u32, frame: &VideoFrame, tile: super::layout::TileRect) {
    if frame.width == 0 || frame.height == 0 {
        return;
    }
    for ty in 0..tile.height {
        let src_y = (ty * frame.height) / tile.height.max(1);
        for tx in 0..tile.width {
            let src_x = (tx * frame.width) / tile.width.max(1);
            let src_idx = ((src_y * frame.width + src_x) * 3) as usize;
            if src_idx + 3 > frame.bytes.len() {
                continue;
            }
            let dst_idx = (((tile.y + ty) * canvas_width + (tile.x + tx)) * 3) as usize;
            if dst_idx + 3 <= canvas.len() {
                canvas[dst_idx..dst_idx + 3].copy_from_slice(&frame.bytes[src_idx..src_idx + 3]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn mixer() -> VideoMixer {
        let (tx, _rx) = channel();
        VideoMixer::new(
            Layout::Grid,
            64,
            64,
            30,
            tx,
            Arc::new(crate::log::noop_log_sink::NoopLogSink),
        )
    }

    #[test]
    fn registering_sources_updates_count_and_notifies() {
        let (tx, rx) = channel();
        let m = VideoMixer::new(Layout::Grid, 64, 64, 30, tx, Arc::new(crate::log::noop_log_sink::NoopLogSink));
        let bus = FrameBus::new();
        m.add_video_source(SourceId::new("call1", "local"), bus);
        assert_eq!(m.source_count(), 1);
        let updated = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(updated.len(), 1);
    }

    #[test]
    fn pin_then_reset_returns_to_auto() {
        let m = mixer();
        let a = SourceId::new("c", "a");
        let b = SourceId::new("c", "b");
        m.add_audio_only_source(a.clone(), "Alice".into());
        m.add_audio_only_source(b.clone(), "Bob".into());
        m.set_active_stream(&a, true);
        {
            let sel = m.active.lock().unwrap();
            assert_eq!(sel.pinned.as_ref(), Some(&a));
        }
        m.reset_active_stream();
        let sel = m.active.lock().unwrap();
        assert!(sel.pinned.is_none());
    }

    #[test]
    fn output_bus_produces_composed_frames() {
        let m = mixer();
        let bus = FrameBus::new();
        m.add_video_source(SourceId::new("c", "a"), bus.clone());
        let sub = m.output_bus().subscribe();
        bus.publish(VideoFrame::synthetic(64, 64, 3));
        let frame = sub.recv().expect("composed frame");
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 64);
    }
}
