//! Typed get/set against an open camera's node maps.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::connection::Session;
use crate::device::{Camera, Namespace, NodeMap, NodeValue};
use crate::error::{DeviceError, PropertyError};

/// A value type that can be read from and written to a node.
///
/// Implemented for `f64`, `i64`, `bool`, and `String` (enumeration nodes,
/// addressed by symbolic entry name).
pub trait Property: PartialEq + fmt::Debug + Sized {
    fn from_node(name: &str, value: NodeValue) -> Result<Self, DeviceError>;

    fn write_to<N: NodeMap + ?Sized>(
        &self,
        nodes: &mut N,
        namespace: Namespace,
        name: &str,
    ) -> Result<(), PropertyError>;
}

macro_rules! scalar_property {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl Property for $ty {
            fn from_node(name: &str, value: NodeValue) -> Result<Self, DeviceError> {
                match value {
                    NodeValue::$variant(v) => Ok(v),
                    other => Err(DeviceError::TypeMismatch {
                        name: name.to_string(),
                        expected: $kind,
                        actual: other.kind(),
                    }),
                }
            }

            fn write_to<N: NodeMap + ?Sized>(
                &self,
                nodes: &mut N,
                namespace: Namespace,
                name: &str,
            ) -> Result<(), PropertyError> {
                nodes.write(namespace, name, NodeValue::$variant(*self))?;
                Ok(())
            }
        }
    };
}

scalar_property!(f64, Float, "float");
scalar_property!(i64, Integer, "integer");
scalar_property!(bool, Boolean, "boolean");

impl Property for String {
    fn from_node(name: &str, value: NodeValue) -> Result<Self, DeviceError> {
        match value {
            NodeValue::Enumeration(v) | NodeValue::Text(v) => Ok(v),
            other => Err(DeviceError::TypeMismatch {
                name: name.to_string(),
                expected: "enumeration",
                actual: other.kind(),
            }),
        }
    }

    fn write_to<N: NodeMap + ?Sized>(
        &self,
        nodes: &mut N,
        namespace: Namespace,
        name: &str,
    ) -> Result<(), PropertyError> {
        // Enumerations are assigned through the entry's integer value.
        match nodes.enum_entry(namespace, name, self)? {
            Some(entry) if entry.access.is_readable() => {
                nodes.write_enum(namespace, name, entry.value)?;
                Ok(())
            }
            _ => {
                warn!(property = name, entry = %self, "{} {} not available", name, self);
                Err(PropertyError::EntryUnavailable {
                    name: name.to_string(),
                    entry: self.clone(),
                })
            }
        }
    }
}

/// Result of a successful [`Properties::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The node already held the value; the device was not touched.
    Unchanged,
    Written,
}

/// Property accessor bound to an open session, used from the capture thread.
pub struct Properties<'a, C: Camera> {
    session: &'a mut Session<C>,
}

impl<'a, C: Camera> Properties<'a, C> {
    pub fn new(session: &'a mut Session<C>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session<C> {
        self.session
    }

    pub fn get<T: Property>(&self, name: &str, namespace: Namespace) -> Result<T, DeviceError> {
        T::from_node(name, self.session.camera().read(namespace, name)?)
    }

    pub fn is_writable(&self, name: &str, namespace: Namespace) -> Result<bool, DeviceError> {
        Ok(self.session.camera().access(namespace, name)?.is_writable())
    }

    /// Write `value` unless the node already holds it.
    ///
    /// With `exclusive`, acquisition is paused for the duration of the write
    /// and resumes on the capture loop's next iteration.
    pub fn set<T: Property>(
        &mut self,
        name: &str,
        value: T,
        exclusive: bool,
        namespace: Namespace,
    ) -> Result<WriteOutcome, PropertyError> {
        let current: T = self.get(name, namespace)?;
        if current == value {
            debug!(property = name, ?value, "Property already set");
            return Ok(WriteOutcome::Unchanged);
        }

        let control = Arc::clone(self.session.control());
        let _pause = if exclusive {
            let guard = control.pause();
            self.session.end_acquisition()?;
            Some(guard)
        } else {
            None
        };

        if !self.is_writable(name, namespace)? {
            warn!(property = name, "Cannot set: {}", name);
            return Err(PropertyError::NotWritable(name.to_string()));
        }

        value.write_to(self.session.camera_mut(), namespace, name)?;
        debug!(property = name, ?value, exclusive, "Property written");
        Ok(WriteOutcome::Written)
    }

    /// Begin and immediately end acquisition, unless a writer holds the
    /// exclusive section (`Ok(false)`).
    ///
    /// Some devices only release their write lock after a streaming cycle.
    pub fn cycle_acquisition(&mut self) -> Result<bool, DeviceError> {
        self.session.cycle_acquisition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CaptureControl;
    use crate::device::sim::{SimEvent, SimulatedSystem};
    use crate::device::{CameraSystem, NodeAccess};

    fn session(system: &mut SimulatedSystem) -> Session<crate::device::sim::SimulatedCamera> {
        system.acquire_instance().unwrap();
        let mut camera = system.cameras().unwrap().remove(0);
        camera.init().unwrap();
        Session::new(camera, Arc::new(CaptureControl::default()))
    }

    #[test]
    fn test_typed_get() {
        let mut system = SimulatedSystem::default();
        let mut session = session(&mut system);
        let props = Properties::new(&mut session);

        let exposure: f64 = props.get("ExposureTime", Namespace::Device).unwrap();
        assert_eq!(exposure, 5000.0);
        let mode: String = props.get("AcquisitionMode", Namespace::Device).unwrap();
        assert_eq!(mode, "SingleFrame");
        let count: i64 = props.get("StreamBufferCountManual", Namespace::Stream).unwrap();
        assert_eq!(count, 3);

        let wrong: Result<bool, _> = props.get("ExposureTime", Namespace::Device);
        assert!(matches!(wrong, Err(DeviceError::TypeMismatch { .. })));
    }

    #[test]
    fn test_same_value_written_once() {
        let mut system = SimulatedSystem::default();
        let mut session = session(&mut system);
        let mut props = Properties::new(&mut session);

        let first = props.set("ExposureTime", 1000.0, false, Namespace::Device).unwrap();
        let second = props.set("ExposureTime", 1000.0, false, Namespace::Device).unwrap();

        assert_eq!(first, WriteOutcome::Written);
        assert_eq!(second, WriteOutcome::Unchanged);
        assert_eq!(system.writes_to("ExposureTime"), 1);
    }

    #[test]
    fn test_unchanged_value_skips_exclusive_section() {
        let mut system = SimulatedSystem::default();
        let mut session = session(&mut system);
        session.begin_acquisition().unwrap();
        let mut props = Properties::new(&mut session);

        let outcome = props
            .set("AcquisitionMode", "SingleFrame".to_string(), true, Namespace::Device)
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert!(system.is_acquiring());
        assert_eq!(system.count(|e| *e == SimEvent::EndAcquisition), 0);
    }

    #[test]
    fn test_exclusive_write_closes_acquisition_first() {
        let mut system = SimulatedSystem::default();
        let mut session = session(&mut system);
        session.begin_acquisition().unwrap();
        let mut props = Properties::new(&mut session);

        props
            .set("AdcBitDepth", "Bit10".to_string(), true, Namespace::Device)
            .unwrap();

        let events = system.events();
        let end = events.iter().position(|e| *e == SimEvent::EndAcquisition).unwrap();
        let write = events
            .iter()
            .position(|e| matches!(e, SimEvent::Write { name, .. } if name == "AdcBitDepth"))
            .unwrap();
        assert!(end < write);
        assert!(!session.is_acquiring());
        assert_eq!(session.control().state().pause_requests, 0);
    }

    #[test]
    fn test_locked_node_without_exclusive_is_denied() {
        let mut system = SimulatedSystem::default();
        let mut session = session(&mut system);
        session.begin_acquisition().unwrap();
        let mut props = Properties::new(&mut session);

        let result = props.set("AdcBitDepth", "Bit12".to_string(), false, Namespace::Device);
        assert!(matches!(result, Err(PropertyError::NotWritable(name)) if name == "AdcBitDepth"));
        assert_eq!(system.writes_to("AdcBitDepth"), 0);
    }

    #[test]
    fn test_unavailable_node_is_denied() {
        let mut system = SimulatedSystem::default();
        let mut session = session(&mut system);
        system.set_access(Namespace::Device, "Gain", NodeAccess::UNAVAILABLE);
        let mut props = Properties::new(&mut session);

        let result = props.set("Gain", 3.0, false, Namespace::Device);
        assert!(matches!(result, Err(PropertyError::NotWritable(_))));
    }

    #[test]
    fn test_unknown_enum_entry() {
        let mut system = SimulatedSystem::default();
        let mut session = session(&mut system);
        let mut props = Properties::new(&mut session);

        let result = props.set("ExposureAuto", "Sometimes".to_string(), false, Namespace::Device);
        assert!(matches!(result, Err(PropertyError::EntryUnavailable { .. })));
    }
}
