pub mod consumer;
pub mod convert;
pub mod queue;

pub use consumer::{Consumer, FrameProcessor};
pub use convert::BgrConverter;
pub use queue::{FrameQueue, QueueStats};
