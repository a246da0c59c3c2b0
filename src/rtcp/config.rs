/// RTCP protocol version carried in the top two bits of every compound packet header.
pub const RTCP_VERSION: u8 = 2;
