//! Bounded ingest queue between a session and its order book sink.
//!
//! The queue is the backpressure boundary: when the sink falls behind, the
//! producing session blocks on [`IngestProducer::push`] instead of growing
//! memory or discarding frames.

use crate::{FeedError, QueueItem};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Create a bounded queue. A capacity of zero is rounded up to one.
pub fn bounded(capacity: usize) -> (IngestProducer, IngestConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (IngestProducer { tx, next_seq: 0 }, IngestConsumer { rx })
}

/// Producing half. Not cloneable: each queue has exactly one session feeding it.
#[derive(Debug)]
pub struct IngestProducer {
    tx: mpsc::Sender<QueueItem>,
    next_seq: u64,
}

impl IngestProducer {
    /// Enqueue a decoded frame, waiting for room if the queue is full.
    pub async fn push(&mut self, payload: Value) -> Result<(), FeedError> {
        let permit = self.tx.reserve().await.map_err(|_| FeedError::QueueClosed)?;
        permit.send(QueueItem::new(self.next_seq, payload));
        self.next_seq += 1;
        Ok(())
    }

    /// Enqueue a frame, giving up with [`FeedError::ProducerStalled`] after `max_wait`.
    ///
    /// `None` waits indefinitely. A stalled frame is not enqueued.
    pub async fn push_within(
        &mut self,
        payload: Value,
        max_wait: Option<Duration>,
    ) -> Result<(), FeedError> {
        let Some(max_wait) = max_wait else {
            return self.push(payload).await;
        };

        let permit = match tokio::time::timeout(max_wait, self.tx.reserve()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(FeedError::QueueClosed),
            Err(_) => return Err(FeedError::ProducerStalled(max_wait)),
        };
        permit.send(QueueItem::new(self.next_seq, payload));
        self.next_seq += 1;
        Ok(())
    }

    /// Total capacity of the queue.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// Number of items pushed so far.
    pub fn pushed(&self) -> u64 {
        self.next_seq
    }

    /// Check if the consuming half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming half, owned by the sink side.
#[derive(Debug)]
pub struct IngestConsumer {
    rx: mpsc::Receiver<QueueItem>,
}

impl IngestConsumer {
    /// Wait for the next item. Returns `None` once the producer is gone and
    /// the queue is drained.
    pub async fn pop(&mut self) -> Option<QueueItem> {
        self.rx.recv().await
    }

    /// Take the next item if one is ready.
    pub fn try_pop(&mut self) -> Option<QueueItem> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently queued.
    pub fn drain(&mut self) -> Vec<QueueItem> {
        let mut items = Vec::new();
        while let Some(item) = self.try_pop() {
            items.push(item);
        }
        items
    }
}
