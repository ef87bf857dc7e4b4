//! In-process camera SDK.
//!
//! [`SimulatedSystem`] implements the system, camera and node-map capabilities
//! against shared state, so tests can script discovery results, node access
//! and frame delivery, then inspect what the core did through the event
//! journal. The binary falls back to it when no hardware backend is selected.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::{Camera, CameraSystem, EnumEntry, Namespace, NodeAccess, NodeMap, NodeValue, RawFrame};
use crate::capture::frame::PixelFormat;
use crate::error::DeviceError;
use crate::SimulatorConfig;

/// Outcome of one scripted frame pull.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePlan {
    Complete,
    /// Delivered with the incomplete flag and the given image status.
    Incomplete(u32),
    Timeout,
    /// The pull fails with an SDK error.
    Fail(String),
    /// The pull reports the device as gone.
    Disconnect,
}

/// Journal entry recorded for every SDK call that changes state.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    AcquireInstance,
    ReleaseInstance,
    Enumerate(usize),
    Init,
    Deinit,
    BeginAcquisition,
    EndAcquisition,
    Write {
        namespace: Namespace,
        name: String,
        value: NodeValue,
    },
    FrameDelivered {
        frame_id: u64,
        complete: bool,
    },
    FrameReleased(u64),
}

#[derive(Debug, Clone)]
struct SimNode {
    namespace: Namespace,
    name: String,
    value: NodeValue,
    access: NodeAccess,
    locked_while_acquiring: bool,
    entries: Vec<EnumEntry>,
}

impl SimNode {
    fn new(namespace: Namespace, name: &str, value: NodeValue) -> Self {
        Self {
            namespace,
            name: name.to_string(),
            value,
            access: NodeAccess::READ_WRITE,
            locked_while_acquiring: false,
            entries: Vec::new(),
        }
    }

    fn enumeration(namespace: Namespace, name: &str, current: &str, entries: &[&str]) -> Self {
        let mut node = Self::new(namespace, name, NodeValue::Enumeration(current.to_string()));
        node.entries = entries
            .iter()
            .enumerate()
            .map(|(i, symbolic)| EnumEntry {
                symbolic: symbolic.to_string(),
                value: i as i64,
                access: NodeAccess::READ_ONLY,
            })
            .collect();
        node
    }

    fn read_only(mut self) -> Self {
        self.access = NodeAccess::READ_ONLY;
        self
    }

    fn locked(mut self) -> Self {
        self.locked_while_acquiring = true;
        self
    }
}

#[derive(Debug)]
struct SimState {
    settings: SimulatorConfig,
    discovery_plan: VecDeque<usize>,
    frame_plan: VecDeque<FramePlan>,
    nodes: Vec<SimNode>,
    events: Vec<SimEvent>,
    failing_nodes: HashSet<String>,
    end_failures: usize,
    instance_held: bool,
    initialized: bool,
    acquiring: bool,
    write_locked: bool,
    next_frame_id: u64,
    outstanding: usize,
}

impl SimState {
    fn node(&self, namespace: Namespace, name: &str) -> Result<&SimNode, DeviceError> {
        self.nodes
            .iter()
            .find(|n| n.namespace == namespace && n.name == name)
            .ok_or_else(|| DeviceError::NodeNotFound {
                namespace,
                name: name.to_string(),
            })
    }

    fn node_mut(&mut self, namespace: Namespace, name: &str) -> Result<&mut SimNode, DeviceError> {
        self.nodes
            .iter_mut()
            .find(|n| n.namespace == namespace && n.name == name)
            .ok_or_else(|| DeviceError::NodeNotFound {
                namespace,
                name: name.to_string(),
            })
    }

    fn effective_access(&self, node: &SimNode) -> NodeAccess {
        let mut access = node.access;
        if self.write_locked || (node.locked_while_acquiring && self.acquiring) {
            access.writable = false;
        }
        access
    }

    fn require_initialized(&self) -> Result<(), DeviceError> {
        if self.initialized {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }

    fn check_writable(&self, namespace: Namespace, name: &str) -> Result<(), DeviceError> {
        self.require_initialized()?;
        if self.failing_nodes.contains(name) {
            return Err(DeviceError::sdk("write", format!("{} rejected the value", name)));
        }
        let node = self.node(namespace, name)?;
        if !self.effective_access(node).is_writable() {
            return Err(DeviceError::sdk("write", format!("{} is not writable", name)));
        }
        Ok(())
    }

    fn current_format(&self) -> PixelFormat {
        match self.node(Namespace::Device, "PixelFormat").map(|n| &n.value) {
            Ok(NodeValue::Enumeration(symbolic)) => {
                PixelFormat::from_symbolic(symbolic).unwrap_or(self.settings.pixel_format)
            }
            _ => self.settings.pixel_format,
        }
    }

    fn current_dimension(&self, name: &str, fallback: u32) -> u32 {
        match self.node(Namespace::Device, name).map(|n| &n.value) {
            Ok(NodeValue::Integer(v)) if *v > 0 => u32::try_from(*v).unwrap_or(fallback),
            _ => fallback,
        }
    }
}

fn default_nodes(settings: &SimulatorConfig) -> Vec<SimNode> {
    use Namespace::{Device, Stream, TransportLayer};

    vec![
        SimNode::new(TransportLayer, "DeviceVendorName", NodeValue::Text("Kestrel".into()))
            .read_only(),
        SimNode::new(TransportLayer, "DeviceModelName", NodeValue::Text("Simulated".into()))
            .read_only(),
        SimNode::new(TransportLayer, "DeviceSerialNumber", NodeValue::Text("SIM0001".into()))
            .read_only(),
        SimNode::new(TransportLayer, "DeviceVersion", NodeValue::Text("1.0".into())).read_only(),
        SimNode::new(Device, "DeviceUptime", NodeValue::Integer(0)).read_only(),
        SimNode::new(Device, "LinkUptime", NodeValue::Integer(0)).read_only(),
        SimNode::new(Device, "PowerSupplyVoltage", NodeValue::Float(12.0)).read_only(),
        SimNode::new(Device, "PowerSupplyCurrent", NodeValue::Float(0.25)).read_only(),
        SimNode::enumeration(
            Device,
            "PixelFormat",
            settings.pixel_format.symbolic(),
            &["Mono8", "Mono16", "BayerRG8", "RGB8", "BGR8", "YUV422_8"],
        )
        .locked(),
        SimNode::enumeration(Device, "AdcBitDepth", "Bit8", &["Bit8", "Bit10", "Bit12"]).locked(),
        SimNode::enumeration(Device, "BalanceWhiteAuto", "Off", &["Off", "Once", "Continuous"]),
        SimNode::enumeration(Device, "GainAuto", "Continuous", &["Off", "Once", "Continuous"]),
        SimNode::enumeration(
            Device,
            "ExposureAuto",
            "Continuous",
            &["Off", "Once", "Continuous"],
        ),
        SimNode::enumeration(
            Device,
            "AcquisitionMode",
            "SingleFrame",
            &["Continuous", "SingleFrame", "MultiFrame"],
        )
        .locked(),
        SimNode::new(Device, "ReverseX", NodeValue::Boolean(false)).locked(),
        SimNode::new(Device, "ReverseY", NodeValue::Boolean(false)).locked(),
        SimNode::new(Device, "ExposureTime", NodeValue::Float(5000.0)),
        SimNode::new(Device, "AcquisitionFrameRateEnable", NodeValue::Boolean(true)),
        SimNode::new(
            Device,
            "AcquisitionFrameRate",
            NodeValue::Float(f64::from(settings.fps)),
        ),
        SimNode::new(Device, "Gain", NodeValue::Float(0.0)),
        SimNode::new(Device, "Width", NodeValue::Integer(i64::from(settings.width))).locked(),
        SimNode::new(Device, "Height", NodeValue::Integer(i64::from(settings.height))).locked(),
        SimNode::new(Device, "OffsetX", NodeValue::Integer(0)).locked(),
        SimNode::new(Device, "OffsetY", NodeValue::Integer(0)).locked(),
        SimNode::enumeration(
            Stream,
            "StreamBufferHandlingMode",
            "NewestOnly",
            &["OldestFirst", "OldestFirstOverwrite", "NewestOnly", "NewestFirst"],
        )
        .locked(),
        SimNode::enumeration(Stream, "StreamBufferCountMode", "Auto", &["Auto", "Manual"])
            .locked(),
        SimNode::new(Stream, "StreamBufferCountManual", NodeValue::Integer(3)).locked(),
    ]
}

/// Simulated SDK system singleton. Clones share the same device.
#[derive(Debug, Clone)]
pub struct SimulatedSystem {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSystem {
    pub fn new(settings: SimulatorConfig) -> Self {
        let nodes = default_nodes(&settings);
        Self {
            state: Arc::new(Mutex::new(SimState {
                settings,
                discovery_plan: VecDeque::new(),
                frame_plan: VecDeque::new(),
                nodes,
                events: Vec::new(),
                failing_nodes: HashSet::new(),
                end_failures: 0,
                instance_held: false,
                initialized: false,
                acquiring: false,
                write_locked: false,
                next_frame_id: 0,
                outstanding: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Camera counts returned by successive discoveries before falling back to the configured count.
    pub fn script_discovery(&self, counts: impl IntoIterator<Item = usize>) {
        self.lock().discovery_plan.extend(counts);
    }

    /// Outcomes of successive frame pulls before falling back to complete frames.
    pub fn script_frames(&self, plans: impl IntoIterator<Item = FramePlan>) {
        self.lock().frame_plan.extend(plans);
    }

    /// Deny every write until an acquisition begin/end cycle.
    pub fn lock_writes(&self) {
        self.lock().write_locked = true;
    }

    /// Make every write to `name` fail with an SDK error.
    pub fn fail_writes_to(&self, name: &str) {
        self.lock().failing_nodes.insert(name.to_string());
    }

    /// Make the next `count` end-acquisition calls fail, leaving the device streaming.
    pub fn fail_end_acquisition(&self, count: usize) {
        self.lock().end_failures = count;
    }

    pub fn set_access(&self, namespace: Namespace, name: &str, access: NodeAccess) {
        if let Ok(node) = self.lock().node_mut(namespace, name) {
            node.access = access;
        }
    }

    pub fn node_value(&self, namespace: Namespace, name: &str) -> Option<NodeValue> {
        self.lock().node(namespace, name).ok().map(|n| n.value.clone())
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().events.clone()
    }

    pub fn count(&self, predicate: impl Fn(&SimEvent) -> bool) -> usize {
        self.lock().events.iter().filter(|e| predicate(e)).count()
    }

    /// Number of device writes that targeted `name`.
    pub fn writes_to(&self, name: &str) -> usize {
        self.count(|e| matches!(e, SimEvent::Write { name: n, .. } if n == name))
    }

    pub fn is_acquiring(&self) -> bool {
        self.lock().acquiring
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn holds_instance(&self) -> bool {
        self.lock().instance_held
    }

    /// Buffers handed out by `next_frame` and not yet released.
    pub fn outstanding_buffers(&self) -> usize {
        self.lock().outstanding
    }
}

impl Default for SimulatedSystem {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl CameraSystem for SimulatedSystem {
    type Camera = SimulatedCamera;

    fn acquire_instance(&mut self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.instance_held = true;
        state.events.push(SimEvent::AcquireInstance);
        Ok(())
    }

    fn cameras(&mut self) -> Result<Vec<SimulatedCamera>, DeviceError> {
        let mut state = self.lock();
        if !state.instance_held {
            return Err(DeviceError::sdk("cameras", "system instance not acquired"));
        }
        let count = match state.discovery_plan.pop_front() {
            Some(count) => count,
            None => state.settings.cameras,
        };
        state.events.push(SimEvent::Enumerate(count));
        drop(state);

        Ok((0..count)
            .map(|index| SimulatedCamera {
                state: Arc::clone(&self.state),
                index,
            })
            .collect())
    }

    fn release_instance(&mut self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if !state.instance_held {
            return Err(DeviceError::sdk("release_instance", "instance not held"));
        }
        state.instance_held = false;
        state.events.push(SimEvent::ReleaseInstance);
        Ok(())
    }
}

/// One simulated device. Every handle from the same system shares its nodes.
#[derive(Debug)]
pub struct SimulatedCamera {
    state: Arc<Mutex<SimState>>,
    index: usize,
}

impl SimulatedCamera {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NodeMap for SimulatedCamera {
    fn access(&self, namespace: Namespace, name: &str) -> Result<NodeAccess, DeviceError> {
        let state = self.lock();
        state.require_initialized()?;
        match state.node(namespace, name) {
            Ok(node) => Ok(state.effective_access(node)),
            Err(DeviceError::NodeNotFound { .. }) => Ok(NodeAccess::UNAVAILABLE),
            Err(e) => Err(e),
        }
    }

    fn read(&self, namespace: Namespace, name: &str) -> Result<NodeValue, DeviceError> {
        let state = self.lock();
        state.require_initialized()?;
        Ok(state.node(namespace, name)?.value.clone())
    }

    fn write(
        &mut self,
        namespace: Namespace,
        name: &str,
        value: NodeValue,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.check_writable(namespace, name)?;

        let node = state.node_mut(namespace, name)?;
        let compatible = matches!(
            (&node.value, &value),
            (NodeValue::Float(_), NodeValue::Float(_))
                | (NodeValue::Integer(_), NodeValue::Integer(_))
                | (NodeValue::Boolean(_), NodeValue::Boolean(_))
        );
        if !compatible {
            return Err(DeviceError::TypeMismatch {
                name: name.to_string(),
                expected: node.value.kind(),
                actual: value.kind(),
            });
        }
        node.value = value.clone();
        state.events.push(SimEvent::Write {
            namespace,
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    fn enum_entry(
        &self,
        namespace: Namespace,
        name: &str,
        symbolic: &str,
    ) -> Result<Option<EnumEntry>, DeviceError> {
        let state = self.lock();
        state.require_initialized()?;
        let node = state.node(namespace, name)?;
        Ok(node.entries.iter().find(|e| e.symbolic == symbolic).cloned())
    }

    fn write_enum(
        &mut self,
        namespace: Namespace,
        name: &str,
        value: i64,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.check_writable(namespace, name)?;

        let node = state.node_mut(namespace, name)?;
        let symbolic = node
            .entries
            .iter()
            .find(|e| e.value == value)
            .map(|e| e.symbolic.clone())
            .ok_or_else(|| DeviceError::sdk("write_enum", format!("{} has no entry {}", name, value)))?;
        node.value = NodeValue::Enumeration(symbolic.clone());
        state.events.push(SimEvent::Write {
            namespace,
            name: name.to_string(),
            value: NodeValue::Enumeration(symbolic),
        });
        Ok(())
    }

    fn features(&self, namespace: Namespace) -> Result<Vec<String>, DeviceError> {
        let state = self.lock();
        state.require_initialized()?;
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.namespace == namespace)
            .map(|n| n.name.clone())
            .collect())
    }
}

/// Frame buffer handed out by [`SimulatedCamera::next_frame`].
#[derive(Debug)]
pub struct SimBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_id: u64,
    status: u32,
    timestamp: Duration,
}

impl RawFrame for SimBuffer {
    fn is_incomplete(&self) -> bool {
        self.status != 0
    }

    fn status(&self) -> u32 {
        self.status
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
        self.frame_id
    }

    fn device_timestamp(&self) -> Option<Duration> {
        Some(self.timestamp)
    }
}

/// Image status reported for frames made incomplete by `incomplete_every`.
const STATUS_MISSING_PACKETS: u32 = 3;

fn test_pattern(width: u32, height: u32, format: PixelFormat, frame_id: u64) -> Vec<u8> {
    let bpp = format.bytes_per_pixel();
    let mut data = Vec::with_capacity(width as usize * height as usize * bpp);
    for y in 0..height as u64 {
        for x in 0..width as u64 {
            let level = ((x + y + frame_id) & 0xff) as u8;
            for channel in 0..bpp {
                data.push(level.wrapping_add((channel * 85) as u8));
            }
        }
    }
    data
}

impl Camera for SimulatedCamera {
    type Buffer = SimBuffer;

    fn init(&mut self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if !state.instance_held {
            return Err(DeviceError::sdk("init", "system instance not acquired"));
        }
        state.initialized = true;
        state.events.push(SimEvent::Init);
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if !state.initialized {
            return Err(DeviceError::sdk("deinit", "camera not initialized"));
        }
        state.initialized = false;
        state.acquiring = false;
        state.events.push(SimEvent::Deinit);
        Ok(())
    }

    fn begin_acquisition(&mut self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.require_initialized()?;
        if state.acquiring {
            return Err(DeviceError::sdk("begin_acquisition", "already streaming"));
        }
        state.acquiring = true;
        state.events.push(SimEvent::BeginAcquisition);
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if !state.acquiring {
            return Err(DeviceError::sdk("end_acquisition", "not streaming"));
        }
        if state.end_failures > 0 {
            state.end_failures -= 1;
            return Err(DeviceError::sdk("end_acquisition", "device busy"));
        }
        state.acquiring = false;
        state.write_locked = false;
        state.events.push(SimEvent::EndAcquisition);
        Ok(())
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<SimBuffer, DeviceError> {
        let (plan, interval) = {
            let mut state = self.lock();
            if !state.acquiring {
                return Err(DeviceError::sdk("next_frame", "acquisition not started"));
            }
            let every = u64::from(state.settings.incomplete_every);
            let plan = match state.frame_plan.pop_front() {
                Some(plan) => plan,
                None if every > 0 && state.next_frame_id % every == every - 1 => {
                    FramePlan::Incomplete(STATUS_MISSING_PACKETS)
                }
                None => FramePlan::Complete,
            };
            let interval = Duration::from_secs(1) / state.settings.fps.max(1);
            (plan, interval)
        };

        match plan {
            FramePlan::Timeout => {
                thread::sleep(timeout);
                return Err(DeviceError::Timeout(timeout));
            }
            FramePlan::Fail(message) => return Err(DeviceError::sdk("next_frame", message)),
            FramePlan::Disconnect => {
                let mut state = self.lock();
                state.acquiring = false;
                return Err(DeviceError::Disconnected(format!(
                    "simulated camera {} unplugged",
                    self.index
                )));
            }
            FramePlan::Complete | FramePlan::Incomplete(_) => {}
        }

        if interval > timeout {
            thread::sleep(timeout);
            return Err(DeviceError::Timeout(timeout));
        }
        thread::sleep(interval);

        let mut state = self.lock();
        let status = match plan {
            FramePlan::Incomplete(status) => status,
            _ => 0,
        };
        let frame_id = state.next_frame_id;
        state.next_frame_id += 1;
        state.outstanding += 1;
        state.events.push(SimEvent::FrameDelivered {
            frame_id,
            complete: status == 0,
        });

        let format = state.current_format();
        let width = state.current_dimension("Width", state.settings.width);
        let height = state.current_dimension("Height", state.settings.height);
        debug!(frame_id, status, "Simulated frame delivered");

        Ok(SimBuffer {
            data: test_pattern(width, height, format, frame_id),
            width,
            height,
            format,
            frame_id,
            status,
            timestamp: u32::try_from(frame_id)
                .map_or(Duration::MAX, |id| interval.saturating_mul(id)),
        })
    }

    fn release_frame(&mut self, buffer: SimBuffer) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        state.events.push(SimEvent::FrameReleased(buffer.frame_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulatorConfig {
        SimulatorConfig {
            width: 8,
            height: 4,
            fps: 1000,
            ..SimulatorConfig::default()
        }
    }

    fn open(system: &mut SimulatedSystem) -> SimulatedCamera {
        system.acquire_instance().unwrap();
        let mut camera = system.cameras().unwrap().remove(0);
        camera.init().unwrap();
        camera
    }

    #[test]
    fn test_discovery_follows_script() {
        let mut system = SimulatedSystem::new(small());
        system.script_discovery([0, 2]);
        system.acquire_instance().unwrap();

        assert!(system.cameras().unwrap().is_empty());
        assert_eq!(system.cameras().unwrap().len(), 2);
        assert_eq!(system.cameras().unwrap().len(), 1);
    }

    #[test]
    fn test_locked_node_not_writable_while_acquiring() {
        let mut system = SimulatedSystem::new(small());
        let mut camera = open(&mut system);

        assert!(camera.access(Namespace::Device, "AdcBitDepth").unwrap().is_writable());
        camera.begin_acquisition().unwrap();
        assert!(!camera.access(Namespace::Device, "AdcBitDepth").unwrap().is_writable());
        assert!(camera.access(Namespace::Device, "ExposureTime").unwrap().is_writable());
    }

    #[test]
    fn test_oversized_dimension_falls_back_to_configured() {
        let mut system = SimulatedSystem::new(small());
        let mut camera = open(&mut system);
        camera
            .write(Namespace::Device, "Width", NodeValue::Integer(i64::from(u32::MAX) + 1))
            .unwrap();
        camera.begin_acquisition().unwrap();

        let buffer = camera.next_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(buffer.width(), 8);
        assert_eq!(buffer.data().len(), 8 * 4);
        camera.release_frame(buffer).unwrap();
    }

    #[test]
    fn test_write_lock_cleared_by_acquisition_cycle() {
        let mut system = SimulatedSystem::new(small());
        let mut camera = open(&mut system);
        system.lock_writes();

        assert!(!camera.access(Namespace::Device, "PixelFormat").unwrap().is_writable());
        camera.begin_acquisition().unwrap();
        camera.end_acquisition().unwrap();
        assert!(camera.access(Namespace::Device, "PixelFormat").unwrap().is_writable());
    }

    #[test]
    fn test_write_enum_by_value() {
        let mut system = SimulatedSystem::new(small());
        let mut camera = open(&mut system);

        let entry = camera
            .enum_entry(Namespace::Device, "ExposureAuto", "Off")
            .unwrap()
            .unwrap();
        camera.write_enum(Namespace::Device, "ExposureAuto", entry.value).unwrap();

        assert_eq!(
            system.node_value(Namespace::Device, "ExposureAuto"),
            Some(NodeValue::Enumeration("Off".into()))
        );
    }

    #[test]
    fn test_write_rejects_wrong_kind() {
        let mut system = SimulatedSystem::new(small());
        let mut camera = open(&mut system);

        let result = camera.write(Namespace::Device, "ExposureTime", NodeValue::Integer(5));
        assert!(matches!(result, Err(DeviceError::TypeMismatch { .. })));
    }

    #[test]
    fn test_scripted_frames() {
        let mut system = SimulatedSystem::new(small());
        let mut camera = open(&mut system);
        system.script_frames([FramePlan::Incomplete(7), FramePlan::Complete]);
        camera.begin_acquisition().unwrap();

        let first = camera.next_frame(Duration::from_millis(100)).unwrap();
        assert!(first.is_incomplete());
        assert_eq!(first.status(), 7);
        assert_eq!(system.outstanding_buffers(), 1);
        camera.release_frame(first).unwrap();

        let second = camera.next_frame(Duration::from_millis(100)).unwrap();
        assert!(!second.is_incomplete());
        assert_eq!(second.data().len(), 8 * 4);
        camera.release_frame(second).unwrap();
        assert_eq!(system.outstanding_buffers(), 0);
    }

    #[test]
    fn test_disconnect_stops_acquisition() {
        let mut system = SimulatedSystem::new(small());
        let mut camera = open(&mut system);
        system.script_frames([FramePlan::Disconnect]);
        camera.begin_acquisition().unwrap();

        let result = camera.next_frame(Duration::from_millis(100));
        assert!(matches!(result, Err(DeviceError::Disconnected(_))));
        assert!(!system.is_acquiring());
    }

    #[test]
    fn test_nodes_require_init() {
        let mut system = SimulatedSystem::new(small());
        system.acquire_instance().unwrap();
        let camera = system.cameras().unwrap().remove(0);

        assert!(matches!(
            camera.read(Namespace::Device, "Gain"),
            Err(DeviceError::NotConnected)
        ));
    }
}
