//! V4L2 capture backend
//!
//! Maps a kernel capture node onto the camera capabilities:
//! - driver capabilities become the transport-layer namespace
//! - `Width`, `Height`, `PixelFormat` and the driver's integer, boolean and
//!   menu controls form the device namespace
//! - the mmap buffer count lives in the stream namespace
//!
//! Geometry and format can only change while the stream is off.

use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};
use v4l::buffer::{Flags as BufferFlags, Type};
use v4l::capability::Flags as CapFlags;
use v4l::control::{self, Control, MenuItem};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::{Camera, CameraSystem, EnumEntry, Namespace, NodeAccess, NodeMap, NodeValue, RawFrame};
use crate::capture::frame::PixelFormat;
use crate::error::DeviceError;

const MAX_NODES: usize = 10;
const ENODEV: i32 = 19;

fn fourcc(format: PixelFormat) -> Option<FourCC> {
    match format {
        PixelFormat::Mono8 => Some(FourCC::new(b"GREY")),
        PixelFormat::Mono16 => Some(FourCC::new(b"Y16 ")),
        PixelFormat::BayerRg8 => Some(FourCC::new(b"RGGB")),
        PixelFormat::Rgb8 => Some(FourCC::new(b"RGB3")),
        PixelFormat::Bgr8 => Some(FourCC::new(b"BGR3")),
        PixelFormat::Yuyv => Some(FourCC::new(b"YUYV")),
    }
}

fn from_fourcc(code: FourCC) -> Option<PixelFormat> {
    [
        PixelFormat::Mono8,
        PixelFormat::Mono16,
        PixelFormat::BayerRg8,
        PixelFormat::Rgb8,
        PixelFormat::Bgr8,
        PixelFormat::Yuyv,
    ]
    .into_iter()
    .find(|format| fourcc(*format) == Some(code))
}

fn fourcc_value(code: FourCC) -> i64 {
    i64::from(u32::from_le_bytes(code.repr))
}

fn io_error(operation: &'static str, e: io::Error) -> DeviceError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DeviceError::Timeout(Duration::ZERO),
        _ if e.raw_os_error() == Some(ENODEV) => DeviceError::Disconnected(e.to_string()),
        _ => DeviceError::sdk(operation, e.to_string()),
    }
}

/// Format fields are unsigned 32-bit; node values arrive as i64.
fn format_field(name: &str, value: i64) -> Result<u32, DeviceError> {
    u32::try_from(value)
        .map_err(|_| DeviceError::sdk("set_format", format!("{} out of range: {}", name, value)))
}

/// "Exposure Time, Absolute" -> "ExposureTimeAbsolute"
fn node_name(control_name: &str) -> String {
    control_name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Scans `/dev/video0` .. `/dev/video9` for capture nodes.
#[derive(Debug, Default)]
pub struct V4l2System {
    instance_held: bool,
    buffer_count: u32,
}

impl V4l2System {
    pub fn new(buffer_count: u32) -> Self {
        Self {
            instance_held: false,
            buffer_count: buffer_count.max(1),
        }
    }
}

impl CameraSystem for V4l2System {
    type Camera = V4l2Camera;

    fn acquire_instance(&mut self) -> Result<(), DeviceError> {
        self.instance_held = true;
        Ok(())
    }

    fn cameras(&mut self) -> Result<Vec<V4l2Camera>, DeviceError> {
        if !self.instance_held {
            return Err(DeviceError::sdk("cameras", "system instance not acquired"));
        }

        let mut found = Vec::new();
        for i in 0..MAX_NODES {
            let path = format!("/dev/video{}", i);
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(device) = Device::with_path(&path) else {
                continue;
            };
            match device.query_caps() {
                Ok(caps) if caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) => {
                    debug!(%path, card = %caps.card, "Found capture node");
                    found.push(V4l2Camera::new(path, self.buffer_count));
                }
                _ => {}
            }
        }
        Ok(found)
    }

    fn release_instance(&mut self) -> Result<(), DeviceError> {
        self.instance_held = false;
        Ok(())
    }
}

struct ControlNode {
    name: String,
    description: control::Description,
}

/// One V4L2 capture node.
pub struct V4l2Camera {
    path: String,
    buffer_count: i64,
    device: Option<Device>,
    controls: Vec<ControlNode>,
    stream: Option<MmapStream<'static>>,
}

impl V4l2Camera {
    fn new(path: String, buffer_count: u32) -> Self {
        Self {
            path,
            buffer_count: i64::from(buffer_count),
            device: None,
            controls: Vec::new(),
            stream: None,
        }
    }

    fn device(&self) -> Result<&Device, DeviceError> {
        self.device.as_ref().ok_or(DeviceError::NotConnected)
    }

    fn control(&self, name: &str) -> Option<&ControlNode> {
        self.controls.iter().find(|c| c.name == name)
    }

    fn not_found(namespace: Namespace, name: &str) -> DeviceError {
        DeviceError::NodeNotFound {
            namespace,
            name: name.to_string(),
        }
    }

    fn transport_value(&self, name: &str) -> Result<NodeValue, DeviceError> {
        let caps = self
            .device()?
            .query_caps()
            .map_err(|e| io_error("query_caps", e))?;
        let text = match name {
            "DeviceVendorName" => caps.driver,
            "DeviceModelName" => caps.card,
            "DeviceSerialNumber" => caps.bus,
            "DeviceVersion" => format!("{}.{}.{}", caps.version.0, caps.version.1, caps.version.2),
            _ => return Err(Self::not_found(Namespace::TransportLayer, name)),
        };
        Ok(NodeValue::Text(text))
    }

    fn control_access(node: &ControlNode) -> NodeAccess {
        let flags = node.description.flags;
        if flags.contains(control::Flags::DISABLED) {
            return NodeAccess::UNAVAILABLE;
        }
        NodeAccess {
            available: !flags.contains(control::Flags::INACTIVE),
            readable: !flags.contains(control::Flags::WRITE_ONLY),
            writable: !flags.contains(control::Flags::READ_ONLY)
                && !flags.contains(control::Flags::GRABBED),
        }
    }

    fn menu_entries(node: &ControlNode) -> Vec<(String, i64)> {
        node.description
            .items
            .iter()
            .flatten()
            .filter_map(|(index, item)| match item {
                MenuItem::Name(name) => Some((name.clone(), i64::from(*index))),
                MenuItem::Value(_) => None,
            })
            .collect()
    }

    fn set_control(&self, id: u32, value: control::Value) -> Result<(), DeviceError> {
        self.device()?
            .set_control(Control { id, value })
            .map_err(|e| io_error("set_control", e))
    }
}

impl NodeMap for V4l2Camera {
    fn access(&self, namespace: Namespace, name: &str) -> Result<NodeAccess, DeviceError> {
        self.device()?;
        let streaming = self.stream.is_some();
        match (namespace, name) {
            (Namespace::TransportLayer, _) => {
                self.transport_value(name)?;
                Ok(NodeAccess::READ_ONLY)
            }
            (Namespace::Device, "Width" | "Height" | "PixelFormat")
            | (Namespace::Stream, "StreamBufferCountManual") => Ok(if streaming {
                NodeAccess::READ_ONLY
            } else {
                NodeAccess::READ_WRITE
            }),
            (Namespace::Device, _) => self
                .control(name)
                .map(Self::control_access)
                .ok_or_else(|| Self::not_found(namespace, name)),
            (Namespace::Stream, _) => Err(Self::not_found(namespace, name)),
        }
    }

    fn read(&self, namespace: Namespace, name: &str) -> Result<NodeValue, DeviceError> {
        let device = self.device()?;
        match (namespace, name) {
            (Namespace::TransportLayer, _) => self.transport_value(name),
            (Namespace::Device, "Width" | "Height" | "PixelFormat") => {
                let format = device.format().map_err(|e| io_error("format", e))?;
                Ok(match name {
                    "Width" => NodeValue::Integer(i64::from(format.width)),
                    "Height" => NodeValue::Integer(i64::from(format.height)),
                    _ => NodeValue::Enumeration(
                        from_fourcc(format.fourcc)
                            .map(|f| f.symbolic().to_string())
                            .unwrap_or_else(|| format.fourcc.to_string()),
                    ),
                })
            }
            (Namespace::Stream, "StreamBufferCountManual") => {
                Ok(NodeValue::Integer(self.buffer_count))
            }
            (Namespace::Device, _) => {
                let node = self
                    .control(name)
                    .ok_or_else(|| Self::not_found(namespace, name))?;
                let current = device
                    .control(node.description.id)
                    .map_err(|e| io_error("control", e))?;
                match (&node.description.typ, current.value) {
                    (control::Type::Menu, control::Value::Integer(index)) => {
                        let entry = Self::menu_entries(node)
                            .into_iter()
                            .find(|(_, value)| *value == index)
                            .map(|(symbolic, _)| symbolic)
                            .unwrap_or_else(|| index.to_string());
                        Ok(NodeValue::Enumeration(entry))
                    }
                    (_, control::Value::Integer(v)) => Ok(NodeValue::Integer(v)),
                    (_, control::Value::Boolean(v)) => Ok(NodeValue::Boolean(v)),
                    (_, control::Value::String(v)) => Ok(NodeValue::Text(v)),
                    _ => Err(DeviceError::sdk("control", format!("{} has no scalar value", name))),
                }
            }
            (Namespace::Stream, _) => Err(Self::not_found(namespace, name)),
        }
    }

    fn write(
        &mut self,
        namespace: Namespace,
        name: &str,
        value: NodeValue,
    ) -> Result<(), DeviceError> {
        let mismatch = |actual: &NodeValue| DeviceError::TypeMismatch {
            name: name.to_string(),
            expected: "integer",
            actual: actual.kind(),
        };

        match (namespace, name) {
            (Namespace::Device, "Width" | "Height") => {
                let NodeValue::Integer(v) = value else {
                    return Err(mismatch(&value));
                };
                let device = self.device()?;
                let mut format = device.format().map_err(|e| io_error("format", e))?;
                let v = format_field(name, v)?;
                if name == "Width" {
                    format.width = v;
                } else {
                    format.height = v;
                }
                device
                    .set_format(&format)
                    .map_err(|e| io_error("set_format", e))?;
                Ok(())
            }
            (Namespace::Stream, "StreamBufferCountManual") => {
                let NodeValue::Integer(v) = value else {
                    return Err(mismatch(&value));
                };
                self.buffer_count = v.max(1);
                Ok(())
            }
            (Namespace::Device, _) => {
                let id = self
                    .control(name)
                    .ok_or_else(|| Self::not_found(namespace, name))?
                    .description
                    .id;
                let value = match value {
                    NodeValue::Integer(v) => control::Value::Integer(v),
                    NodeValue::Boolean(v) => control::Value::Boolean(v),
                    other => return Err(mismatch(&other)),
                };
                self.set_control(id, value)
            }
            _ => Err(Self::not_found(namespace, name)),
        }
    }

    fn enum_entry(
        &self,
        namespace: Namespace,
        name: &str,
        symbolic: &str,
    ) -> Result<Option<EnumEntry>, DeviceError> {
        let entry = |value| EnumEntry {
            symbolic: symbolic.to_string(),
            value,
            access: NodeAccess::READ_ONLY,
        };

        if (namespace, name) == (Namespace::Device, "PixelFormat") {
            let Some(code) = PixelFormat::from_symbolic(symbolic).and_then(fourcc) else {
                return Ok(None);
            };
            let formats = self
                .device()?
                .enum_formats()
                .map_err(|e| io_error("enum_formats", e))?;
            return Ok(formats
                .iter()
                .any(|f| f.fourcc == code)
                .then(|| entry(fourcc_value(code))));
        }

        let node = self
            .control(name)
            .ok_or_else(|| Self::not_found(namespace, name))?;
        Ok(Self::menu_entries(node)
            .into_iter()
            .find(|(entry_name, _)| node_name(entry_name) == node_name(symbolic))
            .map(|(_, value)| entry(value)))
    }

    fn write_enum(&mut self, namespace: Namespace, name: &str, value: i64) -> Result<(), DeviceError> {
        if (namespace, name) == (Namespace::Device, "PixelFormat") {
            let device = self.device()?;
            let code = format_field(name, value)?;
            let mut format = device.format().map_err(|e| io_error("format", e))?;
            format.fourcc = FourCC::new(&code.to_le_bytes());
            device
                .set_format(&format)
                .map_err(|e| io_error("set_format", e))?;
            return Ok(());
        }

        let id = self
            .control(name)
            .ok_or_else(|| Self::not_found(namespace, name))?
            .description
            .id;
        self.set_control(id, control::Value::Integer(value))
    }

    fn features(&self, namespace: Namespace) -> Result<Vec<String>, DeviceError> {
        self.device()?;
        Ok(match namespace {
            Namespace::TransportLayer => [
                "DeviceVendorName",
                "DeviceModelName",
                "DeviceSerialNumber",
                "DeviceVersion",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            Namespace::Device => ["Width", "Height", "PixelFormat"]
                .iter()
                .map(|s| s.to_string())
                .chain(self.controls.iter().map(|c| c.name.clone()))
                .collect(),
            Namespace::Stream => vec!["StreamBufferCountManual".to_string()],
        })
    }
}

/// Frame copied out of an mmap buffer.
pub struct V4l2Buffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    sequence: u64,
    error: bool,
    timestamp: Duration,
}

impl RawFrame for V4l2Buffer {
    fn is_incomplete(&self) -> bool {
        self.error
    }

    fn status(&self) -> u32 {
        u32::from(self.error)
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn frame_id(&self) -> u64 {
        self.sequence
    }

    fn device_timestamp(&self) -> Option<Duration> {
        Some(self.timestamp)
    }
}

impl Camera for V4l2Camera {
    type Buffer = V4l2Buffer;

    fn init(&mut self) -> Result<(), DeviceError> {
        let device = Device::with_path(&self.path).map_err(|e| io_error("open", e))?;
        let caps = device.query_caps().map_err(|e| io_error("query_caps", e))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        self.controls = device
            .query_controls()
            .map_err(|e| io_error("query_controls", e))?
            .into_iter()
            .filter(|d| {
                matches!(
                    d.typ,
                    control::Type::Integer | control::Type::Boolean | control::Type::Menu
                )
            })
            .map(|description| ControlNode {
                name: node_name(&description.name),
                description,
            })
            .collect();
        self.device = Some(device);
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), DeviceError> {
        self.stream = None;
        self.controls.clear();
        self.device = None;
        Ok(())
    }

    fn begin_acquisition(&mut self) -> Result<(), DeviceError> {
        let device = self.device()?;
        let buffers = u32::try_from(self.buffer_count).unwrap_or(u32::MAX);
        let mut stream = MmapStream::with_buffers(device, Type::VideoCapture, buffers)
            .map_err(|e| io_error("stream", e))?;
        stream.set_timeout(Duration::from_secs(1));
        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), DeviceError> {
        if self.stream.take().is_none() {
            return Err(DeviceError::sdk("end_acquisition", "not streaming"));
        }
        Ok(())
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<V4l2Buffer, DeviceError> {
        let format = self.device()?.format().map_err(|e| io_error("format", e))?;
        let pixel_format = from_fourcc(format.fourcc)
            .ok_or_else(|| DeviceError::sdk("next_frame", format!("unsupported format {}", format.fourcc)))?;

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DeviceError::sdk("next_frame", "acquisition not started"))?;
        stream.set_timeout(timeout);

        let (buf, meta) = stream.next().map_err(|e| match io_error("next_frame", e) {
            DeviceError::Timeout(_) => DeviceError::Timeout(timeout),
            other => other,
        })?;

        Ok(V4l2Buffer {
            data: buf[..(meta.bytesused as usize).min(buf.len())].to_vec(),
            width: format.width,
            height: format.height,
            format: pixel_format,
            sequence: u64::from(meta.sequence),
            error: meta.flags.contains(BufferFlags::ERROR),
            timestamp: Duration::from_secs(meta.timestamp.sec as u64)
                + Duration::from_micros(meta.timestamp.usec as u64),
        })
    }

    fn release_frame(&mut self, _buffer: V4l2Buffer) -> Result<(), DeviceError> {
        // The mmap buffer is re-queued by the next dequeue.
        Ok(())
    }
}
