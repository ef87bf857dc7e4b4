//! Throughput statistics and the periodic reporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tracing::info;

use crate::control::{CaptureControl, CapturePhase};
use crate::pipeline::FrameQueue;

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Fixed-window frame rate estimator owned by the capture loop.
///
/// The frame counter is snapshotted and reset whenever a full second has
/// passed since the window started. Frames arriving at the boundary count
/// towards the new window.
#[derive(Debug)]
pub struct FpsCounter {
    frame_counter: u64,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            frame_counter: 0,
            window_start: now,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.frame_counter = 0;
        self.window_start = now;
    }

    /// Close the window if it has elapsed, returning the frames it counted.
    pub fn tick(&mut self, now: Instant) -> Option<u64> {
        if now.saturating_duration_since(self.window_start) >= FPS_WINDOW {
            let fps = self.frame_counter;
            self.frame_counter = 0;
            self.window_start = now;
            Some(fps)
        } else {
            None
        }
    }

    pub fn record_frame(&mut self, now: Instant) -> Option<u64> {
        let closed = self.tick(now);
        self.frame_counter += 1;
        closed
    }
}

#[derive(Default)]
struct Counters {
    fps: AtomicU64,
    frames_captured: AtomicU64,
    frames_incomplete: AtomicU64,
    reconnects: AtomicU64,
}

/// Counters published by the capture loop and read by telemetry.
#[derive(Default)]
pub struct CaptureStats {
    counters: CachePadded<Counters>,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub fps: u64,
    pub frames_captured: u64,
    pub frames_incomplete: u64,
    pub reconnects: u64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames counted in the last completed one-second window.
    pub fn current_fps(&self) -> u64 {
        self.counters.fps.load(Ordering::Relaxed)
    }

    pub fn publish_fps(&self, fps: u64) {
        self.counters.fps.store(fps, Ordering::Relaxed);
        metrics::gauge!("kestrel_capture_fps").set(fps as f64);
    }

    pub fn record_frame(&self) {
        self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("kestrel_frames_captured_total").increment(1);
    }

    pub fn record_incomplete(&self) {
        self.counters.frames_incomplete.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("kestrel_frames_incomplete_total").increment(1);
    }

    pub fn record_reconnect(&self) {
        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("kestrel_reconnects_total").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fps: self.current_fps(),
            frames_captured: self.counters.frames_captured.load(Ordering::Relaxed),
            frames_incomplete: self.counters.frames_incomplete.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Peak resident set size of this process in kilobytes.
#[cfg(unix)]
pub fn memory_usage_kb() -> Option<i64> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: getrusage only writes into the provided struct.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: rc == 0 means the struct was filled in.
    let usage = unsafe { usage.assume_init() };
    Some(usage.ru_maxrss as i64)
}

#[cfg(not(unix))]
pub fn memory_usage_kb() -> Option<i64> {
    None
}

/// One telemetry line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub memory_kb: Option<i64>,
    pub fps: u64,
    pub average_fps: f64,
    pub queued: usize,
    pub dropped: u64,
    pub phase: CapturePhase,
}

/// Logs memory usage and frame rate once per interval until stopped.
pub struct Reporter {
    stats: Arc<CaptureStats>,
    queue: Arc<FrameQueue>,
    control: Arc<CaptureControl>,
    interval: Duration,
    history: HeapRb<u64>,
}

impl Reporter {
    pub fn new(
        stats: Arc<CaptureStats>,
        queue: Arc<FrameQueue>,
        control: Arc<CaptureControl>,
        interval: Duration,
        history: usize,
    ) -> Self {
        Self {
            stats,
            queue,
            control,
            interval,
            history: HeapRb::new(history.max(1)),
        }
    }

    pub fn report(&mut self) -> Report {
        let fps = self.stats.current_fps();
        self.history.push_overwrite(fps);
        let samples = self.history.occupied_len().max(1);
        let average_fps = self.history.iter().sum::<u64>() as f64 / samples as f64;

        let report = Report {
            memory_kb: memory_usage_kb(),
            fps,
            average_fps,
            queued: self.queue.len(),
            dropped: self.queue.stats().dropped,
            phase: self.control.state().phase(),
        };

        info!(
            memory_kb = report.memory_kb.unwrap_or(-1),
            fps = report.fps,
            average_fps = report.average_fps,
            queued = report.queued,
            dropped = report.dropped,
            phase = ?report.phase,
            "memory usage: {}, fps: {}",
            report.memory_kb.unwrap_or(-1),
            report.fps
        );
        report
    }

    pub fn run(&mut self) {
        while !self.control.is_stopped() {
            self.report();
            self.control.sleep_unless_stopped(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_fps_window_reports_then_decays() {
        let t0 = Instant::now();
        let mut counter = FpsCounter::new(t0);

        for i in 0..30 {
            assert_eq!(counter.record_frame(t0 + ms(i * 30)), None);
        }

        assert_eq!(counter.tick(t0 + ms(999)), None);
        assert_eq!(counter.tick(t0 + ms(1000)), Some(30));
        assert_eq!(counter.tick(t0 + ms(1500)), None);
        assert_eq!(counter.tick(t0 + ms(2000)), Some(0));
    }

    #[test]
    fn test_boundary_frame_counts_in_new_window() {
        let t0 = Instant::now();
        let mut counter = FpsCounter::new(t0);
        counter.record_frame(t0 + ms(10));
        counter.record_frame(t0 + ms(20));

        assert_eq!(counter.record_frame(t0 + ms(1100)), Some(2));
        assert_eq!(counter.tick(t0 + ms(2100)), Some(1));
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = CaptureStats::new();
        stats.record_frame();
        stats.record_frame();
        stats.record_incomplete();
        stats.record_reconnect();
        stats.publish_fps(42);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                fps: 42,
                frames_captured: 2,
                frames_incomplete: 1,
                reconnects: 1,
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_memory_usage_is_reported() {
        assert!(memory_usage_kb().unwrap() > 0);
    }

    #[test]
    fn test_reporter_averages_history() {
        let stats = Arc::new(CaptureStats::new());
        let queue = Arc::new(FrameQueue::new(4));
        let control = Arc::new(CaptureControl::default());
        let mut reporter = Reporter::new(stats.clone(), queue, control, ms(10), 2);

        stats.publish_fps(10);
        reporter.report();
        stats.publish_fps(20);
        reporter.report();
        stats.publish_fps(30);
        let report = reporter.report();

        assert_eq!(report.fps, 30);
        assert_eq!(report.average_fps, 25.0);
        assert_eq!(report.phase, CapturePhase::Disconnected);
    }
}
