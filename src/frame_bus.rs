//! Single-slot handoff of the latest [`Frame`] from the control loop.
//!
//! Publishing never blocks and never queues: a frame nobody has taken yet is
//! replaced by the next one. Consumers see frames in publish order but may
//! skip some.

use crate::frame::Frame;
use tokio::sync::watch;

/// Publishing side, owned by the control loop.
#[derive(Debug)]
pub struct FrameBus {
    tx: watch::Sender<Option<Frame>>,
}

impl FrameBus {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Replace the slot contents. Never blocks, even with no consumers.
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Some(frame));
    }

    /// A consumer that only sees frames published after this call.
    pub fn subscribe(&self) -> FrameReceiver {
        FrameReceiver { rx: self.tx.subscribe() }
    }

    /// The most recently published frame.
    pub fn latest(&self) -> Option<Frame> {
        self.tx.borrow().clone()
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Consuming side of the bus. Clones track "taken" state independently.
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    rx: watch::Receiver<Option<Frame>>,
}

impl FrameReceiver {
    /// Take the pending frame, if one was published since the last take.
    pub fn try_take(&mut self) -> Option<Frame> {
        if !self.rx.borrow().has_changed() {
            return None;
        }
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the next frame. `None` once the bus is closed and the last
    /// frame has been taken.
    pub async fn next(&mut self) -> Option<Frame> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }

    /// Passive read of the latest frame; does not mark it taken.
    pub fn latest(&self) -> Option<Frame> {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(fire_time_ms: u64) -> Frame {
        Frame {
            temperature: 70.0,
            target: 80.0,
            window_start: Utc::now(),
            window_duration_ms: 1000,
            fire_time_ms,
        }
    }

    #[test]
    fn test_publish_without_consumers_does_not_block() {
        let bus = FrameBus::new();
        for i in 0..1000 {
            bus.publish(frame(i));
        }
        assert_eq!(bus.latest().unwrap().fire_time_ms, 999);
    }

    #[test]
    fn test_only_latest_frame_is_retained() {
        let bus = FrameBus::new();
        let mut rx = bus.subscribe();
        assert!(rx.try_take().is_none());
        for i in 0..50 {
            bus.publish(frame(i));
        }
        assert_eq!(rx.try_take().unwrap().fire_time_ms, 49);
        assert!(rx.try_take().is_none());
        assert_eq!(rx.latest().unwrap().fire_time_ms, 49);
    }

    #[test]
    fn test_receivers_take_independently() {
        let bus = FrameBus::new();
        let mut a = bus.subscribe();
        let mut b = a.clone();
        bus.publish(frame(7));
        assert_eq!(a.try_take().unwrap().fire_time_ms, 7);
        assert_eq!(b.try_take().unwrap().fire_time_ms, 7);
        assert!(a.try_take().is_none());
    }

    #[tokio::test]
    async fn test_next_delivers_in_order_and_ends_when_closed() {
        let bus = FrameBus::new();
        let mut rx = bus.subscribe();
        bus.publish(frame(1));
        assert_eq!(rx.next().await.unwrap().fire_time_ms, 1);
        bus.publish(frame(2));
        bus.publish(frame(3));
        drop(bus);
        // The last unseen frame survives the close
        assert_eq!(rx.next().await.unwrap().fire_time_ms, 3);
        assert!(rx.next().await.is_none());
    }
}
