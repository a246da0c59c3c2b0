use std::fmt;

use super::frame::VideoFrame;

/// Negotiated codec parameters handed to an encoder/decoder at construction.
/// The wire-level bitstream format (H.264, VP8, ...) is opaque to the core:
/// only this small set of knobs and the byte streams that flow through
/// [`Encoder`]/[`Decoder`] are visible here.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
    pub keyframe_interval: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError(pub String);

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "codec error: {}", self.0)
    }
}
impl std::error::Error for CodecError {}

/// One encoded access unit plus whether it is a key frame, so the session's
/// sender can packetize it and the congestion loop can tell whether a
/// requested key frame was honored.
#[derive(Debug, Clone)]
pub struct EncodedAccessUnit {
    pub bytes: Vec<u8>,
    pub is_keyframe: bool,
    pub timestamp_90khz: u32,
}

/// Abstract encoder contract. A real implementation wraps a 3rd-party codec
/// library; this crate only depends on this trait.
pub trait Encoder: Send {
    /// Encode one captured frame. Returns `None` if the encoder buffers
    /// internally and has not yet produced an access unit.
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedAccessUnit>, CodecError>;

    /// Request the next encoded frame be a key frame (FIR/PLI response, or
    /// the adaptive loop's `forceKeyFrame`).
    fn force_keyframe(&mut self);

    /// Apply a new bitrate without tearing down the encoder, if supported.
    /// Returns `false` when the encoder cannot accept a dynamic update and
    /// must be recreated, in which case the caller restarts the sender.
    fn set_bitrate_kbps(&mut self, kbps: u32) -> bool;
}

/// Abstract decoder contract, the receive-side mirror of [`Encoder`].
pub trait Decoder: Send {
    /// Decode one access unit. Returns `None` while more data is needed
    /// (should not normally happen once depacketization completes a frame).
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<VideoFrame>, CodecError>;
}

/// Reference codec used by tests and as the synthetic stand-in when no real
/// codec library is linked: treats the frame bytes as the encoded payload
/// (a fixed-size header distinguishes key frames).
pub struct PassthroughEncoder {
    spec: CodecSpec,
    force_next_keyframe: bool,
    frames_since_keyframe: u32,
}

impl PassthroughEncoder {
    pub fn new(spec: CodecSpec) -> Self {
        Self { spec, force_next_keyframe: true, frames_since_keyframe: 0 }
    }
}

impl Encoder for PassthroughEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedAccessUnit>, CodecError> {
        let is_keyframe = self.force_next_keyframe
            || self.frames_since_keyframe >= self.spec.keyframe_interval;
        self.force_next_keyframe = false;
        self.frames_since_keyframe =
            if is_keyframe { 0 } else { self.frames_since_keyframe + 1 };

        let mut bytes = Vec::with_capacity(frame.bytes.len() + 1);
        bytes.push(is_keyframe as u8);
        bytes.extend_from_slice(&frame.bytes);

        Ok(Some(EncodedAccessUnit {
            bytes,
            is_keyframe,
            timestamp_90khz: (frame.timestamp_ms as u64 * 90) as u32,
        }))
    }

    fn force_keyframe(&mut self) {
        self.force_next_keyframe = true;
    }

    fn set_bitrate_kbps(&mut self, kbps: u32) -> bool {
        self.spec.bitrate_kbps = kbps;
        true
    }
}

pub struct PassthroughDecoder {
    width: u32,
    height: u32,
}

impl PassthroughDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Decoder for PassthroughDecoder {
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<VideoFrame>, CodecError> {
        let Some((_is_keyframe, payload)) = access_unit.split_first() else {
            return Err(CodecError("empty access unit".into()));
        };
        Ok(Some(VideoFrame::new(
            self.width,
            self.height,
            super::frame::FrameFormat::Rgb,
            payload.to_vec(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CodecSpec {
        CodecSpec {
            name: "passthrough".into(),
            width: 4,
            height: 4,
            framerate: 30,
            bitrate_kbps: 500,
            keyframe_interval: 30,
        }
    }

    #[test]
    fn first_frame_is_always_a_keyframe() {
        let mut enc = PassthroughEncoder::new(spec());
        let au = enc.encode(&VideoFrame::synthetic(4, 4, 0)).unwrap().unwrap();
        assert!(au.is_keyframe);
    }

    #[test]
    fn force_keyframe_overrides_interval() {
        let mut enc = PassthroughEncoder::new(spec());
        let _ = enc.encode(&VideoFrame::synthetic(4, 4, 0)).unwrap();
        enc.force_keyframe();
        let au = enc.encode(&VideoFrame::synthetic(4, 4, 1)).unwrap().unwrap();
        assert!(au.is_keyframe);
    }

    #[test]
    fn encode_then_decode_roundtrips_frame_bytes() {
        let mut enc = PassthroughEncoder::new(spec());
        let mut dec = PassthroughDecoder::new(4, 4);
        let frame = VideoFrame::synthetic(4, 4, 7);
        let au = enc.encode(&frame).unwrap().unwrap();
        let decoded = dec.decode(&au.bytes).unwrap().unwrap();
        assert_eq!(decoded.bytes.as_ref(), frame.bytes.as_ref());
    }
}
