/// RTP protocol version carried in the top two bits of every packet (RFC 3550 §5.1).
pub const RTP_VERSION: u8 = 2;
