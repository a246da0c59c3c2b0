pub mod app;
pub mod bye;
pub mod common_header;
pub mod config;
pub mod generic_nack;
pub mod packet_type;
pub mod picture_loss;
pub mod receiver_report;
pub mod remb;
pub mod report_block;
pub mod rtcp;
pub mod rtcp_error;
pub mod sdes;
pub mod sender_info;
pub mod sender_report;

pub use app::App;
pub use bye::Bye;
pub use common_header::CommonHeader;
pub use config::RTCP_VERSION;
pub use generic_nack::GenericNack;
pub use packet_type::RtcpPacketType;
pub use picture_loss::PictureLossIndication;
pub use receiver_report::ReceiverReport;
pub use remb::Remb;
pub use report_block::ReportBlock;
pub use rtcp::RtcpPacket;
pub use rtcp_error::RtcpError;
pub use sdes::{Sdes, SdesChunk, SdesItem};
pub use sender_info::SenderInfo;
pub use sender_report::SenderReport;
