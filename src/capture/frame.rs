use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::RawFrame;

/// Frame data owned by the core, detached from the SDK buffer it was copied from
#[derive(Debug, Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub complete: bool,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Mono16,
    BayerRg8,
    Rgb8,
    Bgr8,
    Yuyv,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Mono8 | PixelFormat::BayerRg8 => 1,
            PixelFormat::Mono16 | PixelFormat::Yuyv => 2,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }

    /// GenICam symbolic name of the format.
    pub fn symbolic(&self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono16 => "Mono16",
            PixelFormat::BayerRg8 => "BayerRG8",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Bgr8 => "BGR8",
            PixelFormat::Yuyv => "YUV422_8",
        }
    }

    pub fn from_symbolic(name: &str) -> Option<Self> {
        [
            PixelFormat::Mono8,
            PixelFormat::Mono16,
            PixelFormat::BayerRg8,
            PixelFormat::Rgb8,
            PixelFormat::Bgr8,
            PixelFormat::Yuyv,
        ]
        .into_iter()
        .find(|format| format.symbolic() == name)
    }
}

impl Frame {
    /// Deep-copy a device buffer. The SDK buffer can be released right after.
    pub fn copy_from<B: RawFrame>(raw: &B, sequence: u64) -> Self {
        let format = raw.pixel_format();
        let meta = FrameMetadata {
            sequence,
            frame_id: raw.frame_id(),
            width: raw.width(),
            height: raw.height(),
            stride: raw.width() * format.bytes_per_pixel() as u32,
            format,
            complete: !raw.is_incomplete(),
            device_timestamp: raw.device_timestamp(),
        };

        Self {
            data: Bytes::copy_from_slice(raw.data()),
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    /// Expected payload size for the frame geometry.
    pub fn expected_len(&self) -> usize {
        self.meta.stride as usize * self.meta.height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Buffer {
        data: Vec<u8>,
    }

    impl RawFrame for Buffer {
        fn is_incomplete(&self) -> bool {
            false
        }
        fn status(&self) -> u32 {
            0
        }
        fn data(&self) -> &[u8] {
            &self.data
        }
        fn width(&self) -> u32 {
            4
        }
        fn height(&self) -> u32 {
            2
        }
        fn pixel_format(&self) -> PixelFormat {
            PixelFormat::Rgb8
        }
        fn frame_id(&self) -> u64 {
            17
        }
        fn device_timestamp(&self) -> Option<Duration> {
            Some(Duration::from_micros(1500))
        }
    }

    #[test]
    fn test_copy_from_detaches_data() {
        let mut raw = Buffer {
            data: (0..24).collect(),
        };
        let frame = Frame::copy_from(&raw, 3);
        raw.data.iter_mut().for_each(|b| *b = 0);

        assert_eq!(frame.data.len(), 24);
        assert_eq!(frame.data[23], 23);
        assert_eq!(frame.meta.sequence, 3);
        assert_eq!(frame.meta.frame_id, 17);
        assert_eq!(frame.meta.stride, 12);
        assert!(frame.meta.complete);
        assert_eq!(frame.expected_len(), 24);
    }

    #[test]
    fn test_symbolic_names() {
        assert_eq!(PixelFormat::BayerRg8.symbolic(), "BayerRG8");
        assert_eq!(PixelFormat::from_symbolic("Mono16"), Some(PixelFormat::Mono16));
        assert_eq!(PixelFormat::from_symbolic("Bogus"), None);
    }
}
