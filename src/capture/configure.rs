//! Acquisition profile applied once per connection.
//!
//! Settings are applied in order and the pass stops at the first failure:
//! a camera left half-configured is harder to reason about than one left at
//! its previous settings with the failure in the log.

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use super::property::{Properties, WriteOutcome};
use crate::device::{Camera, Namespace};
use crate::error::{ConfigureError, PropertyError};

/// Stream buffer count (see the vendor's buffer handling notes).
pub const STREAM_BUFFER_COUNT: i64 = 10;

/// Exposure time in microseconds.
pub const EXPOSURE_TIME_US: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Symbolic enumeration entry.
    Enumeration(String),
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Boolean(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Integer(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Float(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Enumeration(v.to_string())
    }
}

/// One entry of the acquisition profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub value: SettingValue,
    /// Pause acquisition while writing (for nodes locked during streaming).
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub namespace: Namespace,
}

impl Setting {
    pub fn new(name: &str, value: impl Into<SettingValue>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            exclusive: false,
            namespace: Namespace::Device,
        }
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn stream(mut self) -> Self {
        self.namespace = Namespace::Stream;
        self
    }
}

/// The fixed acquisition profile: 10-bit ADC, manual exposure, continuous
/// acquisition, oldest-first manual stream buffers, and no frame-rate cap.
pub fn default_profile() -> Vec<Setting> {
    vec![
        Setting::new("AdcBitDepth", "Bit10").exclusive(),
        Setting::new("ExposureAuto", "Off"),
        Setting::new("AcquisitionMode", "Continuous").exclusive(),
        Setting::new("StreamBufferHandlingMode", "OldestFirst")
            .exclusive()
            .stream(),
        Setting::new("StreamBufferCountMode", "Manual")
            .exclusive()
            .stream(),
        Setting::new("StreamBufferCountManual", STREAM_BUFFER_COUNT)
            .exclusive()
            .stream(),
        Setting::new("ExposureTime", EXPOSURE_TIME_US),
        // Disabled so the camera reports its real maximum frame rate.
        Setting::new("AcquisitionFrameRateEnable", false),
    ]
}

/// What a completed configuration pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigureReport {
    pub written: usize,
    pub unchanged: usize,
}

fn apply<C: Camera>(
    properties: &mut Properties<'_, C>,
    setting: &Setting,
) -> Result<WriteOutcome, PropertyError> {
    let name = setting.name.as_str();
    let (exclusive, namespace) = (setting.exclusive, setting.namespace);
    match &setting.value {
        SettingValue::Boolean(v) => properties.set(name, *v, exclusive, namespace),
        SettingValue::Integer(v) => properties.set(name, *v, exclusive, namespace),
        SettingValue::Float(v) => properties.set(name, *v, exclusive, namespace),
        SettingValue::Enumeration(v) => properties.set(name, v.clone(), exclusive, namespace),
    }
}

/// Make sure the device accepts writes, probing one node.
///
/// An open acquisition counts as writable. Otherwise a locked device gets one
/// begin/end acquisition cycle, which releases the lock on some firmware.
/// This is a best-effort retry, not a guaranteed recovery.
pub fn ensure_writability<C: Camera>(
    properties: &mut Properties<'_, C>,
    probe: &str,
) -> Result<(), ConfigureError> {
    if properties.session().is_acquiring() || properties.is_writable(probe, Namespace::Device)? {
        return Ok(());
    }

    warn!(probe, "Camera write access has been locked");
    if !properties.cycle_acquisition()? {
        warn!("Exclusive section is held, not cycling acquisition");
        return Err(ConfigureError::WriteLocked);
    }

    if properties.is_writable(probe, Namespace::Device)? {
        info!("Camera write access restored");
        Ok(())
    } else {
        error!("Cannot get write access to camera");
        Err(ConfigureError::WriteLocked)
    }
}

/// Apply `profile` in order, stopping at the first setting that fails.
#[instrument(skip_all, fields(settings = profile.len()))]
pub fn configure<C: Camera>(
    properties: &mut Properties<'_, C>,
    profile: &[Setting],
    probe: &str,
) -> Result<ConfigureReport, ConfigureError> {
    ensure_writability(properties, probe)?;

    let mut report = ConfigureReport::default();
    for (index, setting) in profile.iter().enumerate() {
        match apply(properties, setting) {
            Ok(WriteOutcome::Written) => report.written += 1,
            Ok(WriteOutcome::Unchanged) => report.unchanged += 1,
            Err(source) => {
                return Err(ConfigureError::Setting {
                    index: index + 1,
                    name: setting.name.clone(),
                    source,
                })
            }
        }
    }
    Ok(report)
}
