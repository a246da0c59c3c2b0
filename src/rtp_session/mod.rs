pub mod events;
pub mod h264_packetizer;
pub mod outbound_track_handle;
pub mod payload;
pub mod rtp_codec;
pub mod rtp_recv_config;
pub mod rtp_recv_error;
pub mod rtp_recv_stream;
pub mod rtp_send_config;
pub mod rtp_send_error;
pub mod rtp_send_stream;
pub mod rtp_session;
pub mod rtp_session_error;
pub mod rx_tracker;
pub mod rx_tracker_error;
pub mod seq_ext;
pub mod time;
pub mod tx_tracker;

pub use events::{RtpIn, RtpSessionEvent};
pub use outbound_track_handle::OutboundTrackHandle;
pub use rtp_codec::RtpCodec;
pub use rtp_recv_config::RtpRecvConfig;
pub use rtp_send_config::RtpSendConfig;
pub use rtp_session::RtpSession;
pub use rtp_session_error::RtpSessionError;
