//! Inter-stage handoff: try-send, and on full drop and record.
//!
//! A producer never waits for its consumer. If the queue has no free slot
//! the item is discarded on the spot, counted against the consumer stage,
//! and the producer moves on to the next frame. Receivers race the
//! cancellation token against the queue with the token winning ties.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::Stage;
use super::frame::FrameSize;
use super::stats::StatsAggregator;

/// Result of offering an item to the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    Delivered,
    /// Consumer was busy; the item was discarded.
    Dropped,
    /// Consumer has exited.
    Closed,
}

impl Handoff {
    pub fn is_closed(self) -> bool {
        self == Handoff::Closed
    }
}

/// Create a queue feeding `consumer`. A `capacity` of 0 is treated as 1.
pub fn handoff<T: FrameSize>(
    capacity: usize,
    consumer: Stage,
    stats: Arc<StatsAggregator>,
) -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        HandoffSender {
            tx,
            consumer,
            stats,
        },
        HandoffReceiver { rx },
    )
}

pub struct HandoffSender<T> {
    tx: mpsc::Sender<T>,
    consumer: Stage,
    stats: Arc<StatsAggregator>,
}

impl<T: FrameSize> HandoffSender<T> {
    /// Hand `item` over if the consumer has room, never blocking.
    pub fn offer(&self, item: T) -> Handoff {
        match self.tx.try_send(item) {
            Ok(()) => Handoff::Delivered,
            Err(TrySendError::Full(item)) => {
                info!(
                    "{} not ready, dropped {} samples ({} bytes)",
                    self.consumer,
                    item.sample_count(),
                    item.byte_len()
                );
                self.stats.record_drop(self.consumer, item.sample_count());
                Handoff::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!("{} has exited, discarding frame", self.consumer);
                Handoff::Closed
            }
        }
    }
}

pub struct HandoffReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> HandoffReceiver<T> {
    /// Next item, or `None` once cancelled or once every sender is gone.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame::{CodecPayload, PcmFrame};
    use crate::pipeline::stats::DropCount;
    use std::time::Duration;

    fn stats() -> Arc<StatsAggregator> {
        Arc::new(StatsAggregator::new(Duration::from_secs(3600)))
    }

    #[test]
    fn test_drop_when_full() {
        let stats = stats();
        let (tx, _rx) = handoff::<PcmFrame>(1, Stage::Encoder, stats.clone());

        assert_eq!(tx.offer(PcmFrame::new(vec![0; 960], 0)), Handoff::Delivered);
        assert_eq!(tx.offer(PcmFrame::new(vec![0; 960], 1)), Handoff::Dropped);
        assert_eq!(tx.offer(PcmFrame::new(vec![0; 960], 2)), Handoff::Dropped);

        let drops = stats.snapshot().dropped(Stage::Encoder);
        assert_eq!(drops.frames, 2);
        assert_eq!(drops.samples, 1920);
    }

    #[test]
    fn test_payload_drop_counts_interleaved_samples() {
        let stats = stats();
        let (tx, _rx) = handoff::<CodecPayload>(1, Stage::Decoder, stats.clone());
        let stereo = |seq| CodecPayload::new(vec![0u8; 4], 960, seq).with_channels(2);

        assert_eq!(tx.offer(stereo(0)), Handoff::Delivered);
        assert_eq!(tx.offer(stereo(1)), Handoff::Dropped);

        let drops = stats.snapshot().dropped(Stage::Decoder);
        assert_eq!(drops, DropCount { frames: 1, samples: 1920 });
    }

    #[test]
    fn test_closed_after_receiver_dropped() {
        let (tx, rx) = handoff::<PcmFrame>(1, Stage::Sink, stats());
        drop(rx);
        assert!(tx.offer(PcmFrame::new(vec![1], 0)).is_closed());
    }

    #[tokio::test]
    async fn test_order_preserved_with_gaps() {
        let (tx, mut rx) = handoff::<PcmFrame>(2, Stage::Decoder, stats());
        let cancel = CancellationToken::new();

        tx.offer(PcmFrame::new(vec![0], 0));
        tx.offer(PcmFrame::new(vec![0], 1));
        tx.offer(PcmFrame::new(vec![0], 2)); // dropped
        assert_eq!(rx.recv(&cancel).await.unwrap().sequence(), 0);
        tx.offer(PcmFrame::new(vec![0], 3));
        assert_eq!(rx.recv(&cancel).await.unwrap().sequence(), 1);
        assert_eq!(rx.recv(&cancel).await.unwrap().sequence(), 3);
    }

    #[tokio::test]
    async fn test_cancel_wins_over_ready_data() {
        let (tx, mut rx) = handoff::<PcmFrame>(1, Stage::Encoder, stats());
        let cancel = CancellationToken::new();
        tx.offer(PcmFrame::new(vec![0], 0));
        cancel.cancel();
        assert!(rx.recv(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_recv_none_when_senders_gone() {
        let (tx, mut rx) = handoff::<PcmFrame>(1, Stage::Encoder, stats());
        drop(tx);
        assert!(rx.recv(&CancellationToken::new()).await.is_none());
    }
}
