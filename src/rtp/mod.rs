/// RTP protocol constants (version).
pub mod config;
/// RTP header and packet encode/decode per RFC 3550.
pub mod rtp_header;
/// Generic one-byte-ID RFC 3550 header extension.
pub mod rtp_header_extension;
/// Complete RTP packet model (header + payload + padding).
pub mod rtp_packet;
/// NTP timestamp helpers used by RTCP Sender Reports.
pub mod time;

pub use config::RTP_VERSION;
pub use rtp_header::RtpHeader;
pub use rtp_header_extension::RtpHeaderExtension;
pub use rtp_packet::RtpPacket;
