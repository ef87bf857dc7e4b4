//! Device information and settings review, logged after each connect.

use tracing::{info, warn};

use crate::device::{Namespace, NodeMap};

const LABEL_WIDTH: usize = 23;

/// Settings worth reviewing after configuration, with their display labels.
const REVIEW: &[(&str, &str, Namespace)] = &[
    ("Camera uptime", "DeviceUptime", Namespace::Device),
    ("Link uptime", "LinkUptime", Namespace::Device),
    ("Power supply voltage", "PowerSupplyVoltage", Namespace::Device),
    ("Power supply current", "PowerSupplyCurrent", Namespace::Device),
    ("ADC bit depth", "AdcBitDepth", Namespace::Device),
    ("Auto white balance", "BalanceWhiteAuto", Namespace::Device),
    ("Auto gain", "GainAuto", Namespace::Device),
    ("Acquisition mode", "AcquisitionMode", Namespace::Device),
    ("Pixel format", "PixelFormat", Namespace::Device),
    ("Reverse X", "ReverseX", Namespace::Device),
    ("Reverse Y", "ReverseY", Namespace::Device),
    ("Auto exposure", "ExposureAuto", Namespace::Device),
    ("Exposure time", "ExposureTime", Namespace::Device),
    ("Frame rate", "AcquisitionFrameRate", Namespace::Device),
    ("Gain", "Gain", Namespace::Device),
    ("Width", "Width", Namespace::Device),
    ("Height", "Height", Namespace::Device),
    ("Offset X", "OffsetX", Namespace::Device),
    ("Offset Y", "OffsetY", Namespace::Device),
    ("Buffer handling mode", "StreamBufferHandlingMode", Namespace::Stream),
    ("Buffer count mode", "StreamBufferCountMode", Namespace::Stream),
    ("Buffer count", "StreamBufferCountManual", Namespace::Stream),
];

/// Pad `label` to a fixed width and append the separator.
pub fn label(text: &str) -> String {
    format!("{:<width$}: ", text, width = LABEL_WIDTH)
}

fn describe<N: NodeMap + ?Sized>(nodes: &N, namespace: Namespace, name: &str) -> String {
    match nodes.access(namespace, name) {
        Ok(access) if access.is_readable() => match nodes.read(namespace, name) {
            Ok(value) => value.to_string(),
            Err(e) => format!("error: {}", e),
        },
        Ok(_) => "Node not readable".to_string(),
        Err(e) => format!("error: {}", e),
    }
}

/// Lines describing every transport-layer feature.
pub fn device_information<N: NodeMap + ?Sized>(nodes: &N) -> Vec<String> {
    match nodes.features(Namespace::TransportLayer) {
        Ok(features) => features
            .iter()
            .map(|name| {
                format!(
                    "{}{}",
                    label(name),
                    describe(nodes, Namespace::TransportLayer, name)
                )
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "Device control information not available");
            Vec::new()
        }
    }
}

/// Lines reviewing the acquisition-relevant settings.
pub fn device_configuration<N: NodeMap + ?Sized>(nodes: &N) -> Vec<String> {
    REVIEW
        .iter()
        .map(|(text, name, namespace)| {
            format!("{}{}", label(text), describe(nodes, *namespace, name))
        })
        .collect()
}

pub fn log_device_information<N: NodeMap + ?Sized>(nodes: &N) {
    info!("Camera information");
    for line in device_information(nodes) {
        info!("{}", line);
    }
}

pub fn log_device_configuration<N: NodeMap + ?Sized>(nodes: &N) {
    info!("Camera settings");
    for line in device_configuration(nodes) {
        info!("{}", line);
    }
}
