//! Drain loop on the consumer side of the frame queue.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::queue::FrameQueue;
use crate::capture::Frame;
use crate::control::CaptureControl;
use crate::error::ConvertError;

/// Post-processing step applied to frames selected by the convert trigger.
pub trait FrameProcessor: Send {
    fn process(&mut self, frame: &Frame) -> Result<(), ConvertError>;
}

/// Polls the queue, drains everything available, then idles.
pub struct Consumer<P: FrameProcessor> {
    queue: Arc<FrameQueue>,
    control: Arc<CaptureControl>,
    processor: P,
    read_interval: Duration,
    consumed: u64,
    processed: u64,
}

impl<P: FrameProcessor> Consumer<P> {
    pub fn new(
        queue: Arc<FrameQueue>,
        control: Arc<CaptureControl>,
        processor: P,
        read_interval: Duration,
    ) -> Self {
        Self {
            queue,
            control,
            processor,
            read_interval,
            consumed: 0,
            processed: 0,
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Frames handed to the processor.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Pop every frame currently queued. Returns how many were taken.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Some(frame) = self.queue.pop() {
            drained += 1;
            self.consumed += 1;

            if self.control.take_convert() {
                self.processed += 1;
                if let Err(e) = self.processor.process(&frame) {
                    warn!(sequence = frame.meta.sequence, error = %e, "Frame processing failed");
                }
            }
        }
        drained
    }

    #[instrument(name = "consumer", skip(self))]
    pub fn run(&mut self) {
        while !self.control.is_stopped() {
            let drained = self.drain();
            if drained > 0 {
                debug!(drained, "Queue drained");
            }
            std::thread::sleep(self.read_interval);
        }
        // Frames left behind at shutdown are discarded with the queue.
        debug!(consumed = self.consumed, "Consumer finished");
    }
}
