//! Sink stage: the end of the pipeline.
//!
//! A [`FrameSink`] is anything that consumes the final item type: the local
//! playback device in loopback mode, the WebRTC track in relay mode, or a
//! plain channel in tests. The stage owns the sink and closes it exactly
//! once, whatever ended the loop.

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::frame::{FrameSize, PcmFrame};
use super::queue::HandoffReceiver;
use crate::audio::PlaybackDevice;
use crate::error::{PipelineError, Result};

#[async_trait]
pub trait FrameSink<T: Send + 'static>: Send {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Consume one item. An error here is fatal to the pipeline.
    async fn deliver(&mut self, item: T) -> Result<()>;

    /// Flush and release the destination.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct SinkStage<T, S> {
    input: HandoffReceiver<T>,
    sink: S,
}

impl<T, S> SinkStage<T, S>
where
    T: FrameSize + Send + 'static,
    S: FrameSink<T>,
{
    pub fn new(input: HandoffReceiver<T>, sink: S) -> Self {
        Self { input, sink }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut delivered = 0u64;
        let result = loop {
            let Some(item) = self.input.recv(&cancel).await else {
                break Ok(());
            };
            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                result = self.sink.deliver(item) => result,
            };
            if let Err(e) = delivery {
                break Err(e);
            }
            delivered += 1;
        };

        let closed = self.sink.close().await;
        info!(
            "quitting {} sink after {} frames",
            self.sink.name(),
            delivered
        );
        match (result, closed) {
            (Err(e), Err(close_err)) => {
                warn!("{} sink close failed: {}", self.sink.name(), close_err);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

// ======================== Playback ========================

/// Plays PCM frames on a blocking device.
///
/// Every device call runs on the blocking pool under the device lock. A
/// write abandoned by cancellation keeps the lock until it returns, so the
/// closing drain always runs after it.
pub struct PlaybackSink<P> {
    device: Arc<Mutex<P>>,
    closed: bool,
}

impl<P: PlaybackDevice + 'static> PlaybackSink<P> {
    pub fn new(device: P) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            closed: false,
        }
    }

    async fn with_device<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&mut P) -> Result<()> + Send + 'static,
    {
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || op(&mut device.lock()))
            .await
            .map_err(|e| PipelineError::Stage {
                stage: "sink",
                reason: e.to_string(),
            })?
    }
}

#[async_trait]
impl<P: PlaybackDevice + 'static> FrameSink<PcmFrame> for PlaybackSink<P> {
    fn name(&self) -> &str {
        "playback"
    }

    async fn deliver(&mut self, frame: PcmFrame) -> Result<()> {
        if self.closed {
            return Err(PipelineError::Stage {
                stage: "sink",
                reason: "playback device already closed".into(),
            });
        }
        let bytes = frame.to_le_bytes();
        self.with_device(move |device| device.write_all(&bytes)).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        // Drained once; later closes are no-ops.
        self.closed = true;
        self.with_device(|device| device.drain()).await
    }
}

// ======================== Channel ========================

/// Forwards every item to a tokio mpsc channel.
pub struct ChannelSink<T> {
    sender: mpsc::Sender<T>,
}

impl<T> ChannelSink<T> {
    pub fn new(sender: mpsc::Sender<T>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl<T: Send + 'static> FrameSink<T> for ChannelSink<T> {
    fn name(&self) -> &str {
        "channel"
    }

    async fn deliver(&mut self, item: T) -> Result<()> {
        self.sender
            .send(item)
            .await
            .map_err(|_| PipelineError::Transport("channel sink receiver dropped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockPlayback;
    use crate::pipeline::Stage;
    use crate::pipeline::queue::handoff;
    use crate::pipeline::stats::StatsAggregator;
    use std::time::Duration;

    fn stats() -> Arc<StatsAggregator> {
        Arc::new(StatsAggregator::new(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn test_playback_writes_and_drains_once() {
        let stats = stats();
        let (tx, rx) = handoff(4, Stage::Sink, stats);
        let playback = MockPlayback::new();
        let probe = playback.probe();

        tx.offer(PcmFrame::new(vec![1, -1], 0));
        tx.offer(PcmFrame::new(vec![2, -2], 1));
        drop(tx);

        SinkStage::new(rx, PlaybackSink::new(playback))
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            probe.writes(),
            vec![vec![1, 0, 0xff, 0xff], vec![2, 0, 0xfe, 0xff]]
        );
        assert_eq!(probe.drains(), 1);
    }

    #[tokio::test]
    async fn test_playback_failure_is_fatal_and_still_closes() {
        let stats = stats();
        let (tx, rx) = handoff(4, Stage::Sink, stats);
        let playback = MockPlayback::failing();
        let probe = playback.probe();
        tx.offer(PcmFrame::new(vec![0; 4], 0));

        let err = SinkStage::new(rx, PlaybackSink::new(playback))
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Device(_)));
        assert_eq!(probe.drains(), 1);
    }

    #[tokio::test]
    async fn test_close_twice_drains_once() {
        let playback = MockPlayback::new();
        let probe = playback.probe();
        let mut sink = PlaybackSink::new(playback);
        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(probe.drains(), 1);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let stats = stats();
        let (tx, rx) = handoff(4, Stage::Sink, stats);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        tx.offer(PcmFrame::new(vec![7; 3], 9));

        let cancel = CancellationToken::new();
        let stage = tokio::spawn(SinkStage::new(rx, ChannelSink::new(out_tx)).run(cancel.clone()));

        let frame = out_rx.recv().await.unwrap();
        assert_eq!(frame.sequence(), 9);
        assert_eq!(frame.samples(), &[7, 7, 7]);

        cancel.cancel();
        stage.await.unwrap().unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_delivery() {
        let (tx, rx) = handoff(4, Stage::Sink, stats());
        // Receiver stays alive but never reads, so the second send waits.
        let (out_tx, _out_rx) = mpsc::channel(1);
        for seq in 0..3 {
            tx.offer(PcmFrame::new(vec![0; 2], seq));
        }

        let cancel = CancellationToken::new();
        let stage = tokio::spawn(SinkStage::new(rx, ChannelSink::new(out_tx)).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stage.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), stage)
            .await
            .expect("sink stage stops while delivery is blocked")
            .unwrap()
            .unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn test_cancel_mid_write_still_drains_after_it() {
        let (tx, rx) = handoff(4, Stage::Sink, stats());
        let playback = MockPlayback::new().paced(Duration::from_millis(300));
        let probe = playback.probe();
        tx.offer(PcmFrame::new(vec![0; 4], 0));

        let cancel = CancellationToken::new();
        let stage =
            tokio::spawn(SinkStage::new(rx, PlaybackSink::new(playback)).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.write_count(), 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), stage)
            .await
            .expect("sink stage stops while a write is in flight")
            .unwrap()
            .unwrap();
        // The abandoned write finished before the single drain.
        assert_eq!(probe.write_count(), 1);
        assert_eq!(probe.drains(), 1);
        drop(tx);
    }
}
