//! Bounded hand-off queue between the capture loop and the transport.
//!
//! The capture loop pushes complete batches without blocking; the transport
//! drains them at network speed. When the network falls behind, the oldest
//! queued batch is dropped so the viewer always converges on the most recent
//! screen state. A dropped batch never causes divergence: the engine diffs
//! against its own retained previous frame, so later batches resend anything
//! still on screen.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use crate::capture::encoder::FrameBatch;

/// Default queue depth before old batches are shed.
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Bounded FIFO of frame batches with a drop-oldest overflow policy.
pub struct BatchQueue {
    inner: Mutex<VecDeque<FrameBatch>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl BatchQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a batch, shedding the oldest entry when full.
    pub fn push(&self, batch: FrameBatch) {
        {
            let mut queue = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.len() == self.capacity {
                queue.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "outbound frame queue full, dropping oldest batch");
            }
            queue.push_back(batch);
        }
        self.notify.notify_one();
    }

    /// Dequeue the next batch, waiting until one is available.
    pub async fn pop(&self) -> FrameBatch {
        loop {
            let notified = self.notify.notified();
            if let Some(batch) = self.try_pop() {
                return batch;
            }
            notified.await;
        }
    }

    /// Dequeue the next batch if one is queued.
    pub fn try_pop(&self) -> Option<FrameBatch> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Number of batches currently queued.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total batches shed since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::encoder::FrameRegion;
    use crate::capture::types::Rect;
    use bytes::Bytes;

    fn batch(tag: u8) -> FrameBatch {
        FrameBatch::new(vec![FrameRegion {
            data: Bytes::from(vec![tag]),
            is_full_frame: false,
            rect: Rect::new(0, 0, 1, 1),
        }])
    }

    #[test]
    fn fifo_order() {
        let q = BatchQueue::new(4);
        q.push(batch(1));
        q.push(batch(2));
        assert_eq!(q.try_pop().unwrap().regions[0].data[0], 1);
        assert_eq!(q.try_pop().unwrap().regions[0].data[0], 2);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn overflow_drops_oldest() {
        let q = BatchQueue::new(2);
        q.push(batch(1));
        q.push(batch(2));
        q.push(batch(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.try_pop().unwrap().regions[0].data[0], 2);
        assert_eq!(q.try_pop().unwrap().regions[0].data[0], 3);
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let q = std::sync::Arc::new(BatchQueue::new(2));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.push(batch(7));
        let got = waiter.await.unwrap();
        assert_eq!(got.regions[0].data[0], 7);
    }
}
