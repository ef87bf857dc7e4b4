//! Error types for device, property, configuration and capture operations.

use std::time::Duration;

use crate::capture::frame::PixelFormat;
use crate::device::Namespace;

/// Failures reported by the device-control or property capability.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no camera session is open")]
    NotConnected,

    #[error("camera disconnected: {0}")]
    Disconnected(String),

    #[error("no frame delivered within {0:?}")]
    Timeout(Duration),

    #[error("node '{name}' not found in {namespace} node map")]
    NodeNotFound { namespace: Namespace, name: String },

    #[error("node '{name}' holds {actual}, not {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{operation} failed: {message}")]
    Sdk {
        operation: &'static str,
        message: String,
    },
}

impl DeviceError {
    pub fn sdk(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Sdk {
            operation,
            message: message.into(),
        }
    }
}

/// Failures of a single typed property write.
#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    #[error("cannot set: {0}")]
    NotWritable(String),

    #[error("{name} {entry} not available")]
    EntryUnavailable { name: String, entry: String },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Reasons a configuration pass stopped early.
#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    #[error("cannot get write access to camera")]
    WriteLocked,

    #[error("step {index} ({name}) failed: {source}")]
    Setting {
        index: usize,
        name: String,
        #[source]
        source: PropertyError,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors surfaced to threads coordinating with the capture loop.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture was stopped")]
    Stopped,
}

/// Pixel-format conversion failures.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("unsupported pixel format: {0:?}")]
    Unsupported(PixelFormat),

    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    Truncated { expected: usize, actual: usize },

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
