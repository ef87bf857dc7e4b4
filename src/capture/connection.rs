//! Device handle lifecycle: discovery, initialisation, configuration and teardown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::configure::{configure, Setting};
use super::property::Properties;
use super::report;
use crate::control::{CaptureControl, CaptureState};
use crate::device::{Camera, CameraSystem};
use crate::error::DeviceError;
use crate::CaptureConfig;

/// An initialised camera and its acquisition state.
///
/// Acquisition is opened and closed while holding the shared state lock so
/// that the published `acquisition_open` flag never lags the device.
pub struct Session<C: Camera> {
    camera: C,
    control: Arc<CaptureControl>,
    initialized: bool,
    acquiring: bool,
}

impl<C: Camera> Session<C> {
    /// Wrap a camera whose `init` already succeeded.
    pub fn new(camera: C, control: Arc<CaptureControl>) -> Self {
        Self {
            camera,
            control,
            initialized: true,
            acquiring: false,
        }
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }

    pub fn control(&self) -> &Arc<CaptureControl> {
        &self.control
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquiring
    }

    pub fn begin_acquisition(&mut self) -> Result<(), DeviceError> {
        let control = Arc::clone(&self.control);
        let mut state = control.lock_state();
        self.open_locked(&mut state)?;
        drop(state);
        control.notify();
        Ok(())
    }

    /// Close acquisition if open. The session counts as closed even if the SDK call fails.
    pub fn end_acquisition(&mut self) -> Result<(), DeviceError> {
        let control = Arc::clone(&self.control);
        let mut state = control.lock_state();
        let result = self.close_locked(&mut state);
        drop(state);
        control.notify();
        result
    }

    /// Bring acquisition in line with the connection and pause state.
    pub fn reconcile(&mut self) -> Result<(), DeviceError> {
        let control = Arc::clone(&self.control);
        let mut state = control.lock_state();
        let result = if state.wants_acquisition() {
            self.open_locked(&mut state)
        } else {
            self.close_locked(&mut state)
        };
        drop(state);
        control.notify();
        result
    }

    /// Begin and end acquisition once, under the state lock.
    ///
    /// Returns `Ok(false)` without touching the device while a writer holds
    /// the exclusive section. If ending fails, acquisition stays marked open
    /// so the next close retries it.
    pub(crate) fn cycle_acquisition(&mut self) -> Result<bool, DeviceError> {
        let control = Arc::clone(&self.control);
        let mut state = control.lock_state();
        if state.pause_requested() {
            return Ok(false);
        }

        if let Err(e) = self.camera.begin_acquisition() {
            if let Err(end) = self.camera.end_acquisition() {
                debug!(error = %end, "Nothing to end after failed begin");
            }
            return Err(e);
        }
        let result = self.camera.end_acquisition();
        if result.is_err() {
            self.acquiring = true;
            state.acquisition_open = true;
        }
        drop(state);
        control.notify();
        result.map(|()| true)
    }

    fn open_locked(&mut self, state: &mut CaptureState) -> Result<(), DeviceError> {
        if !self.acquiring {
            self.camera.begin_acquisition()?;
            self.acquiring = true;
            debug!("Acquisition opened");
        }
        state.acquisition_open = true;
        Ok(())
    }

    fn close_locked(&mut self, state: &mut CaptureState) -> Result<(), DeviceError> {
        let result = if self.acquiring {
            self.acquiring = false;
            debug!("Acquisition closed");
            self.camera.end_acquisition()
        } else {
            Ok(())
        };
        state.acquisition_open = false;
        result
    }

    /// Close acquisition and deinitialise, logging rather than returning failures.
    fn close(mut self) {
        if self.acquiring {
            if let Err(e) = self.end_acquisition() {
                warn!(error = %e, "Failed to end acquisition during teardown");
            }
        }
        if self.initialized {
            self.initialized = false;
            if let Err(e) = self.camera.deinit() {
                warn!(error = %e, "Failed to deinitialise camera");
            }
        }
    }
}

/// Settings the connection manager needs from the configuration.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub backoff: Duration,
    pub writability_probe: String,
    pub profile: Vec<Setting>,
}

impl ConnectionSettings {
    pub fn from_config(capture: &CaptureConfig, profile: &[Setting]) -> Self {
        Self {
            backoff: capture.reconnect_backoff(),
            writability_probe: capture.writability_probe.clone(),
            profile: profile.to_vec(),
        }
    }
}

/// Outcome of a successful [`Connection::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectReport {
    /// Discovery attempts, including the successful one.
    pub attempts: u32,
}

/// Owns the SDK system, the discovered device list and the open session.
///
/// Every resource is tracked individually so [`Connection::teardown`] only
/// releases what was actually acquired and can be called any number of times.
pub struct Connection<S: CameraSystem> {
    system: S,
    control: Arc<CaptureControl>,
    settings: ConnectionSettings,
    instance_held: bool,
    cameras: Vec<S::Camera>,
    session: Option<Session<S::Camera>>,
    configure_runs: u32,
}

impl<S: CameraSystem> Connection<S> {
    pub fn new(system: S, control: Arc<CaptureControl>, settings: ConnectionSettings) -> Self {
        Self {
            system,
            control,
            settings,
            instance_held: false,
            cameras: Vec::new(),
            session: None,
            configure_runs: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session<S::Camera>> {
        self.session.as_mut()
    }

    /// Number of configuration passes run since creation.
    pub fn configure_runs(&self) -> u32 {
        self.configure_runs
    }

    /// Block until a camera is connected and configured, or the stop signal is raised.
    ///
    /// Returns `None` when stopped before a camera was found.
    #[instrument(skip(self))]
    pub fn connect(&mut self) -> Option<ConnectReport> {
        self.control.update(|state| state.connecting = true);
        let mut attempts = 0;

        while !self.control.is_stopped() && self.session.is_none() {
            attempts += 1;
            match self.connect_device() {
                Ok(true) => {
                    info!(attempts, "Camera connected");
                    self.control.update(|state| {
                        state.connecting = false;
                        state.connected = true;
                    });
                    self.after_connect();
                }
                Ok(false) => info!("No camera detected"),
                Err(e) => {
                    warn!(error = %e, "Camera connection attempt failed");
                    self.teardown();
                    self.control.update(|state| state.connecting = true);
                }
            }

            if self.session.is_none() {
                info!("Reconnecting to camera in {:?}", self.settings.backoff);
                self.control.sleep_unless_stopped(self.settings.backoff);
            }
        }

        self.control.update(|state| state.connecting = false);
        self.session.as_ref().map(|_| ConnectReport { attempts })
    }

    fn connect_device(&mut self) -> Result<bool, DeviceError> {
        self.system.acquire_instance()?;
        self.instance_held = true;

        self.cameras = self.system.cameras()?;
        if self.cameras.is_empty() {
            self.cameras.clear();
            self.release_instance();
            debug!("Camera is not connected");
            return Ok(false);
        }

        let mut camera = self.cameras.remove(0);
        camera.init()?;
        self.session = Some(Session::new(camera, Arc::clone(&self.control)));
        Ok(true)
    }

    fn after_connect(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        report::log_device_information(session.camera());

        let mut properties = Properties::new(session);
        match configure(
            &mut properties,
            &self.settings.profile,
            &self.settings.writability_probe,
        ) {
            Ok(applied) => info!(
                written = applied.written,
                unchanged = applied.unchanged,
                "Camera configured"
            ),
            Err(e) => warn!(error = %e, "Camera configuration aborted"),
        }
        self.configure_runs += 1;

        report::log_device_configuration(session.camera());
    }

    fn release_instance(&mut self) {
        if self.instance_held {
            self.instance_held = false;
            if let Err(e) = self.system.release_instance() {
                warn!(error = %e, "Failed to release camera system");
            }
        }
    }

    /// Close acquisition, deinitialise the camera, clear the device list and
    /// release the system, in that order, skipping anything not held.
    pub fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
            debug!("Camera session closed");
        }
        self.cameras.clear();
        self.release_instance();
        self.control.update(|state| {
            state.connected = false;
            state.acquisition_open = false;
        });
    }
}

impl<S: CameraSystem> Drop for Connection<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::configure::default_profile;
    use crate::device::sim::{SimEvent, SimulatedSystem};
    use std::time::Instant;

    fn settings(backoff: Duration) -> ConnectionSettings {
        ConnectionSettings {
            backoff,
            writability_probe: "PixelFormat".to_string(),
            profile: default_profile(),
        }
    }

    #[test]
    fn test_connect_retries_until_device_appears() {
        let system = SimulatedSystem::default();
        system.script_discovery([0, 0]);
        let control = Arc::new(CaptureControl::new(Duration::from_millis(5)));
        let mut connection =
            Connection::new(system.clone(), control.clone(), settings(Duration::from_millis(40)));

        let started = Instant::now();
        let report = connection.connect().unwrap();

        assert_eq!(report.attempts, 3);
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(system.count(|e| matches!(e, SimEvent::Enumerate(_))), 3);
        assert_eq!(system.count(|e| *e == SimEvent::ReleaseInstance), 2);
        assert_eq!(connection.configure_runs(), 1);
        assert!(control.state().connected);
    }

    #[test]
    fn test_connect_returns_none_when_stopped() {
        let system = SimulatedSystem::default();
        system.script_discovery([0; 100]);
        let control = Arc::new(CaptureControl::new(Duration::from_millis(5)));
        control.stop();
        let mut connection =
            Connection::new(system.clone(), control.clone(), settings(Duration::from_secs(5)));

        assert!(connection.connect().is_none());
        assert!(!connection.is_connected());
        assert!(!control.state().connecting);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let system = SimulatedSystem::default();
        let control = Arc::new(CaptureControl::new(Duration::from_millis(5)));
        let mut connection =
            Connection::new(system.clone(), control.clone(), settings(Duration::from_millis(5)));
        connection.connect().unwrap();
        connection.session_mut().unwrap().begin_acquisition().unwrap();

        connection.teardown();
        connection.teardown();
        drop(connection);

        assert_eq!(system.count(|e| *e == SimEvent::EndAcquisition), 1);
        assert_eq!(system.count(|e| *e == SimEvent::Deinit), 1);
        assert_eq!(system.count(|e| *e == SimEvent::ReleaseInstance), 1);
        assert!(!system.holds_instance());
        assert_eq!(control.state(), CaptureState::default());
    }

    #[test]
    fn test_teardown_order() {
        let system = SimulatedSystem::default();
        let control = Arc::new(CaptureControl::new(Duration::from_millis(5)));
        let mut connection =
            Connection::new(system.clone(), control, settings(Duration::from_millis(5)));
        connection.connect().unwrap();
        connection.session_mut().unwrap().begin_acquisition().unwrap();
        connection.teardown();

        let tail: Vec<SimEvent> = system.events().into_iter().rev().take(3).collect();
        assert_eq!(
            tail,
            vec![
                SimEvent::ReleaseInstance,
                SimEvent::Deinit,
                SimEvent::EndAcquisition
            ]
        );
    }

    #[test]
    fn test_reconcile_follows_pause() {
        let system = SimulatedSystem::default();
        let control = Arc::new(CaptureControl::new(Duration::from_millis(5)));
        let mut connection =
            Connection::new(system.clone(), control.clone(), settings(Duration::from_millis(5)));
        connection.connect().unwrap();

        let session = connection.session_mut().unwrap();
        session.reconcile().unwrap();
        assert!(system.is_acquiring());
        assert!(control.state().acquisition_open);

        let pause = control.pause();
        session.reconcile().unwrap();
        assert!(!system.is_acquiring());
        assert!(!control.state().acquisition_open);

        drop(pause);
        session.reconcile().unwrap();
        assert!(system.is_acquiring());
    }
}
