pub mod capture;
pub mod control;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod telemetry;

use std::path::{Path, PathBuf};
use std::time::Duration;

use capture::configure::{default_profile, Setting};
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

/// Environment variable prefix, e.g. `KESTREL__CAPTURE__FRAME_TIMEOUT_MS=500`.
pub const ENV_PREFIX: &str = "KESTREL";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub telemetry: TelemetryConfig,
    pub simulator: SimulatorConfig,
    /// Settings applied on every connect, in order.
    pub profile: Vec<Setting>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub reconnect_backoff_ms: u64,
    pub idle_sleep_ms: u64,
    pub frame_timeout_ms: u64,
    /// Node checked for write access before configuring.
    pub writability_probe: String,
    pub restart_on_failure: bool,
    pub restart_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub read_interval_ms: u64,
    /// Converted frames are saved here as PNG when set.
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_ms: u64,
    /// Number of FPS samples averaged in each report.
    pub history: usize,
}

/// Shape of the in-process camera used when no hardware backend is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub cameras: usize,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
    /// Deliver every n-th frame incomplete (0 disables).
    pub incomplete_every: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            pipeline: PipelineConfig::default(),
            telemetry: TelemetryConfig::default(),
            simulator: SimulatorConfig::default(),
            profile: default_profile(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: 5000,
            idle_sleep_ms: 25,
            frame_timeout_ms: 1000,
            writability_probe: "PixelFormat".to_string(),
            restart_on_failure: true,
            restart_delay_ms: 1000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            read_interval_ms: 25,
            snapshot_dir: None,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            history: 10,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            cameras: 1,
            width: 640,
            height: 480,
            fps: 30,
            pixel_format: PixelFormat::BayerRg8,
            incomplete_every: 0,
        }
    }
}

impl Config {
    /// Defaults, overlaid with `path` (TOML, optional) and then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl CaptureConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl PipelineConfig {
    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }
}

impl TelemetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
