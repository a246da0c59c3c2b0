use std::fmt;

use crate::rtp_session::rtp_session_error::RtpSessionError;

/// Errors surfaced by the session-level lifecycle state machine.
/// Transport/crypto setup failures are recoverable and leave the session in
/// a usable state; only `Fatal` forces a transition to `Stopped`.
#[derive(Debug)]
pub enum SessionError {
    /// Socket creation/bind failed; the session stays `Idle`.
    TransportInit(String),
    /// SRTP setup failed for one direction; that direction is disabled.
    CryptoInit(String),
    /// The codec refused the requested parameters.
    EncoderInit(String),
    DecoderInit(String),
    /// The stimulus is not allowed from the session's current state.
    InvalidTransition { stimulus: &'static str, state: &'static str },
    /// Propagated from the low-level transport.
    RtpSession(RtpSessionError),
    /// `initRecorder` found no stream to offer, or the sink accepted neither.
    Recorder(String),
    /// Thread join failure or invariant violation; the session moves to `Stopped`.
    Fatal(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SessionError::*;
        match self {
            TransportInit(msg) => write!(f, "transport init failed: {msg}"),
            CryptoInit(msg) => write!(f, "crypto init failed: {msg}"),
            EncoderInit(msg) => write!(f, "encoder init failed: {msg}"),
            DecoderInit(msg) => write!(f, "decoder init failed: {msg}"),
            InvalidTransition { stimulus, state } => {
                write!(f, "stimulus '{stimulus}' not allowed from state '{state}'")
            }
            RtpSession(e) => write!(f, "transport error: {e}"),
            Recorder(msg) => write!(f, "recorder attach failed: {msg}"),
            Fatal(msg) => write!(f, "fatal session error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<RtpSessionError> for SessionError {
    fn from(e: RtpSessionError) -> Self {
        Self::RtpSession(e)
    }
}

impl<T> From<std::sync::PoisonError<T>> for SessionError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Fatal(format!("poisoned lock: {e}"))
    }
}
