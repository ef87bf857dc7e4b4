//! Capabilities consumed from the camera SDK.
//!
//! The core never talks to a vendor library directly. A backend provides:
//! - [`CameraSystem`]: the system singleton and device discovery
//! - [`Camera`]: one device's lifecycle and frame delivery
//! - [`NodeMap`]: typed access to the device's configuration nodes
//!
//! [`sim::SimulatedSystem`] is an in-process backend used by tests and by the
//! binary when no hardware is present.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::frame::PixelFormat;
use crate::error::DeviceError;

pub mod sim;
#[cfg(feature = "v4l2")]
pub mod v4l2;

/// Node namespaces reachable through an open camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Transport-layer device information (model, vendor, serial).
    #[serde(rename = "transport")]
    TransportLayer,
    /// Main device control.
    #[default]
    Device,
    /// Stream control (buffer handling).
    Stream,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::TransportLayer => write!(f, "transport-layer"),
            Namespace::Device => write!(f, "device"),
            Namespace::Stream => write!(f, "stream"),
        }
    }
}

/// Current value of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    /// Symbolic name of the current enumeration entry.
    Enumeration(String),
    /// Read-only informational string.
    Text(String),
}

impl NodeValue {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeValue::Float(_) => "float",
            NodeValue::Integer(_) => "integer",
            NodeValue::Boolean(_) => "boolean",
            NodeValue::Enumeration(_) => "enumeration",
            NodeValue::Text(_) => "string",
        }
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Float(v) => write!(f, "{}", v),
            NodeValue::Integer(v) => write!(f, "{}", v),
            NodeValue::Boolean(v) => write!(f, "{}", v),
            NodeValue::Enumeration(v) | NodeValue::Text(v) => f.write_str(v),
        }
    }
}

/// Access mode reported for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAccess {
    pub available: bool,
    pub readable: bool,
    pub writable: bool,
}

impl NodeAccess {
    pub const READ_WRITE: NodeAccess = NodeAccess {
        available: true,
        readable: true,
        writable: true,
    };

    pub const READ_ONLY: NodeAccess = NodeAccess {
        available: true,
        readable: true,
        writable: false,
    };

    pub const UNAVAILABLE: NodeAccess = NodeAccess {
        available: false,
        readable: false,
        writable: false,
    };

    pub fn is_writable(&self) -> bool {
        self.available && self.writable
    }

    pub fn is_readable(&self) -> bool {
        self.available && self.readable
    }
}

/// One entry of an enumeration node.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumEntry {
    pub symbolic: String,
    pub value: i64,
    pub access: NodeAccess,
}

/// Typed access to a device's configuration node space.
///
/// Enumerations cannot be assigned by symbolic name: callers resolve the entry
/// with [`NodeMap::enum_entry`] and assign its integer value with
/// [`NodeMap::write_enum`].
pub trait NodeMap {
    fn access(&self, namespace: Namespace, name: &str) -> Result<NodeAccess, DeviceError>;

    fn read(&self, namespace: Namespace, name: &str) -> Result<NodeValue, DeviceError>;

    /// Writes a float, integer or boolean node.
    fn write(&mut self, namespace: Namespace, name: &str, value: NodeValue)
        -> Result<(), DeviceError>;

    fn enum_entry(
        &self,
        namespace: Namespace,
        name: &str,
        symbolic: &str,
    ) -> Result<Option<EnumEntry>, DeviceError>;

    fn write_enum(&mut self, namespace: Namespace, name: &str, value: i64)
        -> Result<(), DeviceError>;

    /// Names of the nodes in a namespace, in device order.
    fn features(&self, namespace: Namespace) -> Result<Vec<String>, DeviceError>;
}

/// A frame buffer owned by the SDK until passed back to [`Camera::release_frame`].
pub trait RawFrame {
    fn is_incomplete(&self) -> bool;

    /// Device-specific image status, meaningful when incomplete.
    fn status(&self) -> u32;

    fn data(&self) -> &[u8];

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn pixel_format(&self) -> PixelFormat;

    fn frame_id(&self) -> u64;

    fn device_timestamp(&self) -> Option<Duration>;
}

/// Lifecycle and frame delivery of one device.
pub trait Camera: NodeMap + Send {
    type Buffer: RawFrame;

    fn init(&mut self) -> Result<(), DeviceError>;

    fn deinit(&mut self) -> Result<(), DeviceError>;

    fn begin_acquisition(&mut self) -> Result<(), DeviceError>;

    fn end_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Blocks for at most `timeout`, returning [`DeviceError::Timeout`] if nothing arrived.
    fn next_frame(&mut self, timeout: Duration) -> Result<Self::Buffer, DeviceError>;

    fn release_frame(&mut self, buffer: Self::Buffer) -> Result<(), DeviceError>;
}

/// The SDK's system singleton.
pub trait CameraSystem: Send {
    type Camera: Camera;

    /// Retrieves the singleton; paired with [`CameraSystem::release_instance`].
    fn acquire_instance(&mut self) -> Result<(), DeviceError>;

    /// Enumerates attached cameras. An empty list is not an error.
    fn cameras(&mut self) -> Result<Vec<Self::Camera>, DeviceError>;

    fn release_instance(&mut self) -> Result<(), DeviceError>;
}
