//! Frame model, capture/codec contracts, and the send/receive pipeline pumps.

pub mod codec;
pub mod frame;
pub mod frame_bus;
pub mod receiver;
pub mod sender;
pub mod source;

pub use codec::{CodecSpec, Decoder, Encoder};
pub use frame::{FrameFormat, MediaStream, VideoFrame};
pub use frame_bus::{FrameBus, FrameSubscription};
pub use receiver::ReceiverPump;
pub use sender::SenderPump;
pub use source::{CameraSource, DeviceParams, Source, SourceUri};
