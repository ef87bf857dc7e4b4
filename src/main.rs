//! Kestrel camera capture service

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::{Parser, ValueEnum};
use color_eyre::Result;
use flume::RecvTimeoutError;
use tracing::{error, info, warn};

use kestrel::capture::{CaptureExit, CaptureLoop};
use kestrel::control::CaptureControl;
use kestrel::device::sim::SimulatedSystem;
use kestrel::device::CameraSystem;
use kestrel::pipeline::{BgrConverter, Consumer, FrameQueue};
use kestrel::telemetry::{CaptureStats, Reporter};
use kestrel::Config;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// In-process simulated camera
    Sim,
    /// Kernel V4L2 capture node (requires the `v4l2` feature)
    V4l2,
}

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(version, about = "Machine-vision camera capture core")]
#[command(after_help = "KEYS (followed by Enter):
    c    Convert the next frame to BGR8
    q    Quit")]
struct Args {
    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[arg(long, short = 'b', value_enum, default_value = "sim")]
    backend: Backend,

    /// Log filter, e.g. "kestrel=debug"
    #[arg(long, env = "RUST_LOG", default_value = "kestrel=info")]
    log_filter: String,
}

/// Run the capture loop, restarting it after failures if configured.
fn run_capture<S: CameraSystem>(mut capture: CaptureLoop<S>, control: &CaptureControl, config: &Config) {
    loop {
        match capture.run() {
            CaptureExit::Stopped => break,
            CaptureExit::Failed(e) if config.capture.restart_on_failure => {
                warn!(error = %e, "Restarting capture in {:?}", config.capture.restart_delay());
                control.sleep_unless_stopped(config.capture.restart_delay());
            }
            CaptureExit::Failed(e) => {
                error!(error = %e, "Capture stopped after failure");
                control.stop();
                break;
            }
        }
    }
}

fn spawn_capture<S: CameraSystem + 'static>(
    system: S,
    control: Arc<CaptureControl>,
    queue: Arc<FrameQueue>,
    stats: Arc<CaptureStats>,
    config: Config,
) -> Result<thread::JoinHandle<()>> {
    let capture = CaptureLoop::new(system, control.clone(), queue, stats, &config);
    Ok(thread::Builder::new()
        .name("capture".into())
        .spawn(move || run_capture(capture, &control, &config))?)
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(args.log_filter.as_str())
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Kestrel launching...");

    let config = Config::load(args.config.as_deref())?;
    let control = Arc::new(CaptureControl::new(config.capture.idle_sleep()));
    let queue = Arc::new(FrameQueue::new(config.pipeline.queue_capacity));
    let stats = Arc::new(CaptureStats::new());

    {
        let control = control.clone();
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, shutting down...");
            control.stop();
        })?;
    }

    let capture = match args.backend {
        Backend::Sim => spawn_capture(
            SimulatedSystem::new(config.simulator.clone()),
            control.clone(),
            queue.clone(),
            stats.clone(),
            config.clone(),
        )?,
        #[cfg(feature = "v4l2")]
        Backend::V4l2 => spawn_capture(
            kestrel::device::v4l2::V4l2System::new(
                kestrel::capture::configure::STREAM_BUFFER_COUNT as u32,
            ),
            control.clone(),
            queue.clone(),
            stats.clone(),
            config.clone(),
        )?,
        #[cfg(not(feature = "v4l2"))]
        Backend::V4l2 => return Err(color_eyre::eyre::eyre!("built without the `v4l2` feature")),
    };

    let mut consumer = Consumer::new(
        queue.clone(),
        control.clone(),
        BgrConverter::new(config.pipeline.snapshot_dir.clone()),
        config.pipeline.read_interval(),
    );
    let consumer = thread::Builder::new()
        .name("consumer".into())
        .spawn(move || consumer.run())?;

    let mut reporter = Reporter::new(
        stats,
        queue,
        control.clone(),
        config.telemetry.interval(),
        config.telemetry.history,
    );
    let reporter = thread::Builder::new()
        .name("telemetry".into())
        .spawn(move || reporter.run())?;

    // Keys arrive line-buffered; the reader is not joined since it blocks on stdin.
    let (tx, rx) = flume::unbounded::<char>();
    thread::Builder::new().name("keys".into()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            for key in line.chars().filter(|c| !c.is_whitespace()) {
                if tx.send(key).is_err() {
                    return;
                }
            }
        }
    })?;

    while !control.is_stopped() {
        match rx.recv_timeout(control.idle()) {
            Ok('c') => {
                info!("Convert requested");
                control.request_convert();
            }
            Ok('q') => control.stop(),
            Ok(key) => warn!(%key, "Unknown key"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(control.idle()),
        }
    }

    for (name, handle) in [("capture", capture), ("consumer", consumer), ("telemetry", reporter)] {
        if handle.join().is_err() {
            error!(thread = name, "Thread panicked");
        }
    }

    info!("Kestrel shutting down");
    Ok(())
}
