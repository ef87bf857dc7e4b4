//! Pixel-format conversion to BGR8.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use image::{ImageBuffer, Rgb};
use tracing::info;

use super::consumer::FrameProcessor;
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::ConvertError;

fn checked(frame: &Frame) -> Result<&[u8], ConvertError> {
    let expected = frame.meta.width as usize
        * frame.meta.height as usize
        * frame.meta.format.bytes_per_pixel();
    if frame.data.len() < expected {
        return Err(ConvertError::Truncated {
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(&frame.data[..expected])
}

fn clamp(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Nearest-neighbour demosaic of an RGGB mosaic: each 2x2 cell shares one colour.
fn demosaic_rggb(data: &[u8], width: usize, height: usize, out: &mut Vec<u8>) {
    let at = |x: usize, y: usize| data[y.min(height - 1) * width + x.min(width - 1)];
    for y in 0..height {
        for x in 0..width {
            let (cx, cy) = (x & !1, y & !1);
            let r = at(cx, cy);
            let g = ((at(cx + 1, cy) as u16 + at(cx, cy + 1) as u16) / 2) as u8;
            let b = at(cx + 1, cy + 1);
            out.extend_from_slice(&[b, g, r]);
        }
    }
}

fn yuyv_to_bgr(data: &[u8], out: &mut Vec<u8>) {
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            let c = y as f32 - 16.0;
            let d = u as f32 - 128.0;
            let e = v as f32 - 128.0;
            let r = clamp(1.164 * c + 1.596 * e);
            let g = clamp(1.164 * c - 0.392 * d - 0.813 * e);
            let b = clamp(1.164 * c + 2.017 * d);
            out.extend_from_slice(&[b, g, r]);
        }
    }
}

/// Convert any supported format to packed BGR8.
pub fn to_bgr8(frame: &Frame) -> Result<Frame, ConvertError> {
    let width = frame.meta.width as usize;
    let height = frame.meta.height as usize;
    let data = checked(frame)?;
    let mut out = Vec::with_capacity(width * height * 3);

    match frame.meta.format {
        PixelFormat::Bgr8 => out.extend_from_slice(data),
        PixelFormat::Rgb8 => {
            for px in data.chunks_exact(3) {
                out.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        PixelFormat::Mono8 => {
            for &v in data {
                out.extend_from_slice(&[v, v, v]);
            }
        }
        PixelFormat::Mono16 => {
            // little-endian, keep the high byte
            for px in data.chunks_exact(2) {
                out.extend_from_slice(&[px[1], px[1], px[1]]);
            }
        }
        PixelFormat::BayerRg8 => {
            if width > 0 && height > 0 {
                demosaic_rggb(data, width, height, &mut out)
            }
        }
        PixelFormat::Yuyv => yuyv_to_bgr(data, &mut out),
    }

    let meta = FrameMetadata {
        stride: frame.meta.width * 3,
        format: PixelFormat::Bgr8,
        ..(*frame.meta).clone()
    };
    Ok(Frame {
        data: Bytes::from(out),
        meta: Arc::new(meta),
        timestamp: frame.timestamp,
    })
}

/// Write a BGR8 frame as PNG.
pub fn save_png(frame: &Frame, path: &Path) -> Result<(), ConvertError> {
    if frame.meta.format != PixelFormat::Bgr8 {
        return Err(ConvertError::Unsupported(frame.meta.format));
    }
    let data = checked(frame)?;
    let rgb: Vec<u8> = data
        .chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect();

    let buffer = ImageBuffer::<Rgb<u8>, _>::from_raw(frame.meta.width, frame.meta.height, rgb)
        .ok_or(ConvertError::Truncated {
            expected: data.len(),
            actual: 0,
        })?;
    buffer.save(path)?;
    Ok(())
}

/// Converts the selected frame to BGR8 and optionally saves it.
#[derive(Debug, Default)]
pub struct BgrConverter {
    snapshot_dir: Option<PathBuf>,
    last: Option<Frame>,
}

impl BgrConverter {
    pub fn new(snapshot_dir: Option<PathBuf>) -> Self {
        Self {
            snapshot_dir,
            last: None,
        }
    }

    /// The most recent conversion result.
    pub fn last(&self) -> Option<&Frame> {
        self.last.as_ref()
    }
}

impl FrameProcessor for BgrConverter {
    fn process(&mut self, frame: &Frame) -> Result<(), ConvertError> {
        info!(sequence = frame.meta.sequence, "Converting");
        let converted = to_bgr8(frame)?;

        if let Some(dir) = &self.snapshot_dir {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("frame-{:08}.png", frame.meta.sequence));
            save_png(&converted, &path)?;
            info!(path = %path.display(), "Snapshot written");
        }

        self.last = Some(converted);
        Ok(())
    }
}
