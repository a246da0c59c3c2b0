//! Session-level lifecycle state machine, transport instrumentation, and
//! adaptive bitrate loop.

pub mod adaptive_loop;
pub mod bitrate_info;
pub mod error;
pub mod media_description;
pub mod rtp_session;
pub mod socket_pair;

pub use bitrate_info::VideoBitrateInfo;
pub use error::SessionError;
pub use media_description::{CodecDescription, CryptoInfo, DirectionFlags, MediaDescription};
pub use rtp_session::{Direction, RtpSession, SessionState};
pub use socket_pair::SocketPair;
