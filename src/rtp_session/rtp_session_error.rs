use super::rtp_recv_error::RtpRecvError;
use super::rtp_send_error::RtpSendError;
use crate::rtcp::rtcp_error::RtcpError;
use crate::rtp::rtp_error::RtpError;
use std::fmt;

#[derive(Debug)]
pub enum RtpSessionError {
    Rtcp(RtcpError),
    Rtp(RtpError),
    /// `start()` called twice, or before construction finished handing us a receiver.
    EmptyMediaReceiver,
    SendStreamMissing {
        ssrc: u32,
    },
    SendStream {
        source: RtpSendError,
        ssrc: u32,
    },
    RecvStream {
        source: RtpRecvError,
        ssrc: u32,
    },
    /// A shared lock was poisoned by a panicking thread.
    Lock(String),
}

impl fmt::Display for RtpSessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RtpSessionError::*;
        match self {
            Rtcp(e) => write!(f, "RTCP error: {e}"),
            Rtp(e) => write!(f, "RTP error: {e}"),
            EmptyMediaReceiver => write!(f, "RTP session has no media receiver to run"),
            SendStreamMissing { ssrc } => write!(f, "no send stream registered for ssrc={ssrc:#010x}"),
            SendStream { source, ssrc } => {
                write!(f, "send stream error on ssrc={ssrc:#010x}: {source}")
            }
            RecvStream { source, ssrc } => {
                write!(f, "recv stream error on ssrc={ssrc:#010x}: {source}")
            }
            Lock(msg) => write!(f, "poisoned lock: {msg}"),
        }
    }
}

impl std::error::Error for RtpSessionError {}

impl From<RtcpError> for RtpSessionError {
    fn from(e: RtcpError) -> Self {
        Self::Rtcp(e)
    }
}

impl From<RtpError> for RtpSessionError {
    fn from(e: RtpError) -> Self {
        Self::Rtp(e)
    }
}

impl<T> From<std::sync::PoisonError<T>> for RtpSessionError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
