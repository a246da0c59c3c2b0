use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rtp_video_core::log::log_sink::LogSink;
use rtp_video_core::log::logger::Logger;
use rtp_video_core::media::codec::{PassthroughDecoder, PassthroughEncoder};
use rtp_video_core::media::source::{DeviceParams, SourceUri};
use rtp_video_core::session::media_description::{CodecDescription, DirectionFlags, MediaDescription};
use rtp_video_core::session::rtp_session::{DecoderFactory, EncoderFactory, RtpSession};

/// Minimal demonstration of the session orchestrator wired to the reference
/// passthrough codec: starts two loopback sessions pointed at each other,
/// lets them exchange a few seconds of synthetic video, then stops both.
fn main() {
    let process_logger = Logger::start_default("rtp-video-core-demo", 256, 64, 1);
    let logger: Arc<dyn LogSink> = Arc::new(process_logger.handle());

    let encoder_factory: EncoderFactory =
        Arc::new(|spec| Ok(Box::new(PassthroughEncoder::new(spec.clone()))));
    let decoder_factory: DecoderFactory =
        Arc::new(|spec| Ok(Box::new(PassthroughDecoder::new(spec.width, spec.height))));

    let alice = RtpSession::new(
        Arc::clone(&encoder_factory),
        Arc::clone(&decoder_factory),
        1200,
        Arc::clone(&logger),
    );
    let bob = RtpSession::new(encoder_factory, decoder_factory, 1200, logger);

    let alice_addr: SocketAddr = "127.0.0.1:15004".parse().unwrap();
    let bob_addr: SocketAddr = "127.0.0.1:15006".parse().unwrap();

    let device = DeviceParams::new(SourceUri::Camera { backend: "camera".into(), name: "demo0".into() }, 640, 480, 30);

    alice
        .start(
            alice_addr,
            bob_addr,
            media(true, 96),
            media(true, 96),
            device.clone(),
        )
        .expect("alice session start");
    bob.start(bob_addr, alice_addr, media(true, 96), media(true, 96), device)
        .expect("bob session start");

    println!("sessions running, state alice={:?} bob={:?}", alice.state(), bob.state());
    thread::sleep(Duration::from_secs(3));
    println!("alice last latency: {:?}ms", alice.last_latency_ms());

    alice.stop().expect("alice session stop");
    bob.stop().expect("bob session stop");
}

fn media(active: bool, payload_type: u8) -> MediaDescription {
    MediaDescription {
        direction: DirectionFlags { enabled: active, on_hold: false },
        addr: "0.0.0.0:0".parse().unwrap(),
        rtcp_addr: None,
        codec: CodecDescription {
            name: "passthrough".into(),
            payload_type,
            clock_rate: 90_000,
            bitrate_kbps: 500,
            min_bitrate_kbps: 150,
            max_bitrate_kbps: 2000,
            quality: None,
            auto_quality_enabled: true,
        },
        crypto: None,
    }
}
