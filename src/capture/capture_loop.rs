//! Producer thread: owns the connection and moves frames into the queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use super::connection::{Connection, ConnectionSettings};
use super::frame::Frame;
use crate::control::CaptureControl;
use crate::device::{Camera, CameraSystem, RawFrame};
use crate::error::DeviceError;
use crate::pipeline::FrameQueue;
use crate::telemetry::{CaptureStats, FpsCounter};
use crate::Config;

/// Why [`CaptureLoop::run`] returned. Teardown has completed in both cases.
#[derive(Debug)]
pub enum CaptureExit {
    Stopped,
    /// A device error the loop does not recover from by itself.
    Failed(DeviceError),
}

pub struct CaptureLoop<S: CameraSystem> {
    connection: Connection<S>,
    control: Arc<CaptureControl>,
    queue: Arc<FrameQueue>,
    stats: Arc<CaptureStats>,
    fps: FpsCounter,
    frame_timeout: Duration,
    sequence: u64,
}

impl<S: CameraSystem> CaptureLoop<S> {
    pub fn new(
        system: S,
        control: Arc<CaptureControl>,
        queue: Arc<FrameQueue>,
        stats: Arc<CaptureStats>,
        config: &Config,
    ) -> Self {
        let settings = ConnectionSettings::from_config(&config.capture, &config.profile);
        Self {
            connection: Connection::new(system, Arc::clone(&control), settings),
            control,
            queue,
            stats,
            fps: FpsCounter::new(Instant::now()),
            frame_timeout: config.capture.frame_timeout(),
            sequence: 0,
        }
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.connection
    }

    /// Run until stopped or until an unrecoverable device error.
    #[instrument(name = "capture", skip(self))]
    pub fn run(&mut self) -> CaptureExit {
        let exit = loop {
            if self.control.is_stopped() {
                break CaptureExit::Stopped;
            }

            if !self.connection.is_connected() {
                // no frames arrive while discovery backs off
                self.stats.publish_fps(0);
                match self.connection.connect() {
                    Some(report) => {
                        debug!(attempts = report.attempts, "Capture connected");
                        self.fps.start(Instant::now());
                    }
                    None => break CaptureExit::Stopped,
                }
                continue;
            }

            match self.step() {
                Ok(()) => {}
                Err(DeviceError::Disconnected(reason)) => {
                    warn!(%reason, "Camera lost, reconnecting");
                    self.stats.record_reconnect();
                    self.connection.teardown();
                }
                Err(e) => {
                    error!(error = %e, "Capture failed");
                    break CaptureExit::Failed(e);
                }
            }
        };

        self.connection.teardown();
        self.stats.publish_fps(0);
        info!(?exit, "Capture loop finished");
        exit
    }

    /// One iteration against an open connection.
    pub fn step(&mut self) -> Result<(), DeviceError> {
        let Some(session) = self.connection.session_mut() else {
            return Err(DeviceError::NotConnected);
        };
        session.reconcile()?;

        if !session.is_acquiring() {
            publish(&self.stats, self.fps.tick(Instant::now()));
            self.control.idle_sleep();
            return Ok(());
        }

        let buffer = match session.camera_mut().next_frame(self.frame_timeout) {
            Ok(buffer) => buffer,
            Err(DeviceError::Timeout(waited)) => {
                debug!(?waited, "No frame within timeout");
                publish(&self.stats, self.fps.tick(Instant::now()));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let now = Instant::now();
        if buffer.is_incomplete() {
            warn!(
                frame_id = buffer.frame_id(),
                "Image incomplete with image status {}",
                buffer.status()
            );
            self.stats.record_incomplete();
            publish(&self.stats, self.fps.tick(now));
        } else {
            self.sequence += 1;
            let frame = Frame::copy_from(&buffer, self.sequence);
            if let Some(dropped) = self.queue.push(frame) {
                debug!(sequence = dropped.meta.sequence, "Queue full, dropped oldest frame");
            }
            self.stats.record_frame();
            publish(&self.stats, self.fps.record_frame(now));
        }

        session.camera_mut().release_frame(buffer)
    }
}

fn publish(stats: &CaptureStats, closed: Option<u64>) {
    if let Some(fps) = closed {
        stats.publish_fps(fps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CapturePhase;
    use crate::device::sim::{FramePlan, SimEvent, SimulatedSystem};
    use crate::SimulatorConfig;
    use std::thread;

    fn config() -> Config {
        let mut config = Config::default();
        config.capture.reconnect_backoff_ms = 20;
        config.capture.idle_sleep_ms = 2;
        config.capture.frame_timeout_ms = 100;
        config
    }

    fn fast_system() -> SimulatedSystem {
        SimulatedSystem::new(SimulatorConfig {
            width: 8,
            height: 4,
            fps: 500,
            ..SimulatorConfig::default()
        })
    }

    struct Harness {
        system: SimulatedSystem,
        control: Arc<CaptureControl>,
        queue: Arc<FrameQueue>,
        stats: Arc<CaptureStats>,
        capture: CaptureLoop<SimulatedSystem>,
    }

    fn harness(system: SimulatedSystem) -> Harness {
        let config = config();
        let control = Arc::new(CaptureControl::new(config.capture.idle_sleep()));
        let queue = Arc::new(FrameQueue::new(64));
        let stats = Arc::new(CaptureStats::new());
        let capture = CaptureLoop::new(
            system.clone(),
            control.clone(),
            queue.clone(),
            stats.clone(),
            &config,
        );
        Harness {
            system,
            control,
            queue,
            stats,
            capture,
        }
    }

    fn connect(h: &mut Harness) {
        h.capture.connection.connect().unwrap();
    }

    #[test]
    fn test_step_opens_acquisition_and_enqueues() {
        let mut h = harness(fast_system());
        connect(&mut h);

        h.capture.step().unwrap();

        assert!(h.system.is_acquiring());
        assert_eq!(h.control.state().phase(), CapturePhase::Open);
        let frame = h.queue.pop().unwrap();
        assert_eq!(frame.meta.sequence, 1);
        assert!(frame.meta.complete);
        assert_eq!(frame.data.len(), frame.expected_len());
        assert_eq!(h.system.outstanding_buffers(), 0);
    }

    #[test]
    fn test_incomplete_frame_is_released_not_queued() {
        let mut h = harness(fast_system());
        h.system
            .script_frames([FramePlan::Incomplete(3), FramePlan::Complete]);
        connect(&mut h);

        h.capture.step().unwrap();
        assert!(h.queue.is_empty());
        assert_eq!(h.system.outstanding_buffers(), 0);
        assert_eq!(h.stats.snapshot().frames_incomplete, 1);

        h.capture.step().unwrap();
        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.system.count(|e| matches!(e, SimEvent::FrameReleased(_))), 2);
    }

    #[test]
    fn test_timeout_is_benign() {
        let mut h = harness(fast_system());
        h.system.script_frames([FramePlan::Timeout]);
        connect(&mut h);

        h.capture.step().unwrap();
        assert!(h.queue.is_empty());
        assert!(h.capture.connection().is_connected());
    }

    #[test]
    fn test_paused_step_closes_and_idles() {
        let mut h = harness(fast_system());
        connect(&mut h);
        h.capture.step().unwrap();

        let pause = h.control.pause();
        h.capture.step().unwrap();
        assert!(!h.system.is_acquiring());
        assert_eq!(h.control.state().phase(), CapturePhase::Paused);
        let queued = h.queue.len();
        h.capture.step().unwrap();
        assert_eq!(h.queue.len(), queued);

        drop(pause);
        h.capture.step().unwrap();
        assert!(h.system.is_acquiring());
    }

    #[test]
    fn test_sdk_failure_ends_loop_with_teardown() {
        let mut h = harness(fast_system());
        h.system.script_frames([
            FramePlan::Complete,
            FramePlan::Fail("transport error".into()),
        ]);

        let exit = h.capture.run();

        assert!(matches!(exit, CaptureExit::Failed(DeviceError::Sdk { .. })));
        assert!(!h.system.is_initialized());
        assert!(!h.system.holds_instance());
        assert_eq!(h.control.state().phase(), CapturePhase::Disconnected);
        assert_eq!(h.queue.len(), 1);
    }

    #[test]
    fn test_disconnect_reconnects_and_reconfigures() {
        let mut h = harness(fast_system());
        h.system.script_frames([
            FramePlan::Complete,
            FramePlan::Disconnect,
            FramePlan::Complete,
            FramePlan::Fail("stop here".into()),
        ]);

        let exit = h.capture.run();

        assert!(matches!(exit, CaptureExit::Failed(_)));
        assert_eq!(h.stats.snapshot().reconnects, 1);
        assert_eq!(h.capture.connection().configure_runs(), 2);
        assert_eq!(h.system.count(|e| *e == SimEvent::Init), 2);
        assert_eq!(h.system.count(|e| *e == SimEvent::Deinit), 2);
        assert_eq!(h.queue.len(), 2);
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_fps_reads_zero_while_reconnecting() {
        let h = harness(fast_system());
        h.system.script_frames(
            std::iter::repeat(FramePlan::Complete)
                .take(700)
                .chain([FramePlan::Disconnect]),
        );
        h.system
            .script_discovery(std::iter::once(1).chain(std::iter::repeat(0).take(1000)));
        let Harness {
            control,
            stats,
            mut capture,
            ..
        } = h;
        let producer = thread::spawn(move || capture.run());

        wait_until(|| stats.current_fps() > 0);
        wait_until(|| stats.snapshot().reconnects == 1);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(control.state().phase(), CapturePhase::Connecting);
        assert_eq!(stats.current_fps(), 0);

        control.stop();
        assert!(matches!(producer.join().unwrap(), CaptureExit::Stopped));
    }

    #[test]
    fn test_writer_holding_pause_blocks_connect_cycle() {
        let h = harness(fast_system());
        h.system.lock_writes();
        h.system.script_discovery([0]);
        let Harness {
            system,
            control,
            mut capture,
            ..
        } = h;
        let writer = control.acquire_exclusive().unwrap();
        let loop_control = control.clone();
        let producer = thread::spawn(move || capture.run());

        wait_until(|| loop_control.state().phase() == CapturePhase::Paused);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(system.count(|e| *e == SimEvent::BeginAcquisition), 0);
        assert!(!system.is_acquiring());

        drop(writer);
        wait_until(|| loop_control.state().phase() == CapturePhase::Open);
        assert_eq!(system.count(|e| *e == SimEvent::BeginAcquisition), 1);

        control.stop();
        assert!(matches!(producer.join().unwrap(), CaptureExit::Stopped));
    }

    #[test]
    fn test_stop_exits_with_teardown() {
        let mut h = harness(fast_system());
        let control = h.control.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            control.stop();
        });

        let exit = h.capture.run();
        stopper.join().unwrap();

        assert!(matches!(exit, CaptureExit::Stopped));
        assert!(h.queue.len() > 0);
        assert!(!h.system.is_acquiring());
        assert!(!h.system.holds_instance());
        assert_eq!(h.system.outstanding_buffers(), 0);
    }

    #[test]
    fn test_exclusive_writer_sees_acquisition_closed() {
        let h = harness(fast_system());
        let Harness {
            system,
            control,
            mut capture,
            ..
        } = h;
        let producer = thread::spawn(move || capture.run());

        while control.state().phase() != CapturePhase::Open {
            thread::sleep(Duration::from_millis(2));
        }

        for _ in 0..5 {
            let guard = control.acquire_exclusive().unwrap();
            assert!(!control.state().acquisition_open);
            assert!(!system.is_acquiring());
            let delivered = system.count(|e| matches!(e, SimEvent::FrameDelivered { .. }));
            thread::sleep(Duration::from_millis(20));
            assert_eq!(
                system.count(|e| matches!(e, SimEvent::FrameDelivered { .. })),
                delivered
            );
            drop(guard);

            while control.state().phase() != CapturePhase::Open {
                thread::sleep(Duration::from_millis(2));
            }
        }

        control.stop();
        assert!(matches!(producer.join().unwrap(), CaptureExit::Stopped));
    }
}
