//! Push-based sink feeding the HTTP response body.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::chat::engine::frames::{DataEvent, StreamFrame};

/// Writer half of a turn's response stream.
///
/// Writes never block and never fail: once the reader is gone (client
/// disconnected) or the sink was closed, frames are dropped and the turn
/// keeps running so its messages are still persisted.
#[derive(Clone, Debug)]
pub struct StreamSink {
    tx: UnboundedSender<StreamFrame>,
    open: Arc<AtomicBool>,
}

impl StreamSink {
    /// Create a sink and the receiver the response body reads from.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<StreamFrame>) {
        let (tx, rx) = unbounded_channel();
        let sink = Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
        };
        (sink, rx)
    }

    /// Push a frame. Returns `false` if it was dropped.
    pub fn send(&self, frame: StreamFrame) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        if self.tx.send(frame).is_err() {
            if self.open.swap(false, Ordering::AcqRel) {
                tracing::debug!("response receiver dropped, continuing turn without a reader");
            }
            return false;
        }
        true
    }

    /// Push a side-channel data event.
    pub fn data(&self, event: DataEvent) -> bool {
        self.send(StreamFrame::Data(event))
    }

    /// Whether frames are still being delivered.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Stop delivering frames. Every clone of this sink is affected.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_arrive_in_order() {
        let (sink, mut rx) = StreamSink::channel();
        assert!(sink.send(StreamFrame::Text("a".to_string())));
        assert!(sink.send(StreamFrame::Text("b".to_string())));
        assert_eq!(rx.try_recv().unwrap(), StreamFrame::Text("a".to_string()));
        assert_eq!(rx.try_recv().unwrap(), StreamFrame::Text("b".to_string()));
    }

    #[test]
    fn dropped_receiver_is_detected_without_failing() {
        let (sink, rx) = StreamSink::channel();
        drop(rx);
        assert!(!sink.send(StreamFrame::Text("lost".to_string())));
        assert!(!sink.is_open());
    }

    #[test]
    fn closing_stops_every_clone() {
        let (sink, mut rx) = StreamSink::channel();
        let clone = sink.clone();
        sink.close();
        assert!(!clone.send(StreamFrame::Text("late".to_string())));
        assert!(rx.try_recv().is_err());
    }
}
