use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Pixel layout of a [`VideoFrame`]'s backing bytes. The core never decodes
/// or re-samples pixels itself; this only lets sinks/mixer know how to read
/// the buffer they were handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Rgb,
    Rgba,
    I420,
    Nv12,
}

/// One decoded or captured video frame. Frame bytes are reference-counted so
/// a slow consumer (mixer input slot, recorder, renderer) can hold its last
/// frame without blocking the producer or forcing a copy per fan-out
/// (observer pattern over typed channels).
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub timestamp_ms: u128,
    pub bytes: Arc<[u8]>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, format: FrameFormat, bytes: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_ms: now_millis(),
            bytes: Arc::from(bytes),
        }
    }

    /// Deterministic placeholder frame, used by synthetic sources and tests.
    pub fn synthetic(width: u32, height: u32, tick: u8) -> Self {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x as u8) ^ tick);
                data.push((y as u8) ^ tick);
                data.push((x.wrapping_add(y) as u8) ^ tick);
            }
        }
        Self::new(width, height, FrameFormat::Rgb, data)
    }
}

pub(crate) fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Format/resolution/framerate triple exchanged between a source or receiver
/// and the recorder at `initRecorder` time.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaStream {
    pub format: FrameFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl MediaStream {
    pub fn new(format: FrameFormat, width: u32, height: u32, framerate: u32) -> Self {
        Self { format, width, height, framerate }
    }
}
