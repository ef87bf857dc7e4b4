//! Bounded frame queue between the capture loop and the consumer

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;

use crate::capture::Frame;

/// Lock-free FIFO handoff; when full, the oldest frame is dropped
pub struct FrameQueue {
    ring: ArrayQueue<Frame>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub written: u64,
    pub read: u64,
    pub dropped: u64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: ArrayQueue::new(capacity.max(1)),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: append a frame, returning the oldest one if it had to be evicted
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let evicted = self.ring.force_push(frame);
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);

        if evicted.is_some() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("kestrel_frames_dropped_total").increment(1);
        }
        evicted
    }

    /// Consumer: pop the oldest frame
    pub fn pop(&self) -> Option<Frame> {
        let frame = self.ring.pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMetadata, PixelFormat};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn frame(sequence: u64) -> Frame {
        Frame {
            data: Bytes::from_static(&[0; 4]),
            meta: Arc::new(FrameMetadata {
                sequence,
                frame_id: sequence,
                width: 2,
                height: 2,
                stride: 2,
                format: PixelFormat::Mono8,
                complete: true,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(4);
        for i in 1..=3 {
            assert!(queue.push(frame(i)).is_none());
        }

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop())
            .map(|f| f.meta.sequence)
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1));
        queue.push(frame(2));
        let evicted = queue.push(frame(3)).unwrap();

        assert_eq!(evicted.meta.sequence, 1);
        assert_eq!(queue.pop().unwrap().meta.sequence, 2);
        assert_eq!(
            queue.stats(),
            QueueStats {
                written: 3,
                read: 1,
                dropped: 1
            }
        );
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let queue = Arc::new(FrameQueue::new(1024));
        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            for i in 0..500 {
                producer_queue.push(frame(i));
            }
        });

        let mut received = Vec::new();
        while received.len() < 500 {
            match queue.pop() {
                Some(f) => received.push(f.meta.sequence),
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();

        assert!(received.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(queue.stats().dropped, 0);
    }
}
