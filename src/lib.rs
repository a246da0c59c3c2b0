//! Core of a peer-to-peer real-time video communication stack: the video RTP
//! session and its adaptive bitrate controller.
//!
//! Given two endpoints that have already negotiated media parameters (codec,
//! crypto, transport addresses) through an out-of-band signaling layer, this
//! crate captures or receives frames through a pluggable media source,
//! packetizes and transmits them over an RTP/RTCP socket pair, decodes
//! inbound RTP and dispatches frames to sinks, and continuously adapts the
//! sender bitrate from RTCP feedback and packet-arrival timing. It also
//! supports splicing into a many-to-many conference through a central video
//! mixer.
//!
//! Signaling, account management, GUI, OS audio/camera backend selection,
//! and the codec library itself are external collaborators; this crate only
//! references their abstract contracts.

/// Process-wide configuration surface (INI-style sections).
pub mod config;
/// Delay-based congestion estimators (Kalman, trendline) and REMB policy.
pub mod congestion;
/// Logging utilities: `LogSink` trait, levels, and macros.
pub mod log;
/// Frame model, capture/codec contracts, and the send/receive pipeline pumps.
pub mod media;
/// N-input, single-output video compositor for conference calls.
pub mod mixer;
/// Attach/detach inbound and outbound streams to a media-recorder sink.
pub mod recorder;
/// RTCP packet parsing and building (RR, SR, SDES, BYE, REMB, PLI, NACK).
pub mod rtcp;
/// RTP packet parsing and building per RFC 3550.
pub mod rtp;
/// Crate-wide RTP error type.
pub mod rtp_error;
/// Low-level RTP/RTCP transport session: send/recv streams, sequence and
/// jitter tracking, H.264 packetization.
pub mod rtp_session;
/// Session-level lifecycle state machine, socket pair, and adaptive loop.
pub mod session;
/// Publishes decoded/mixed frames to a shared in-process surface for
/// embedded or remote UI consumption.
pub mod sink;
/// SRTP (Secure RTP) encryption/authentication.
pub mod srtp;
