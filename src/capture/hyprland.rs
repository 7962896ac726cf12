use serde::Deserialize;

use super::CaptureError;
use crate::geometry::{DisplayDescriptor, DisplayId, Point, Size};

#[derive(Deserialize)]
struct MonitorStatus {
    #[serde(default)]
    focused: bool,
    name: Option<String>,
    x: Option<i32>,
    y: Option<i32>,
    width: Option<i32>,
    height: Option<i32>,
    #[serde(default)]
    scale: Option<f64>,
    #[serde(default)]
    transform: Option<u8>,
    #[serde(default)]
    disabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct MonitorDisplay {
    pub(super) focused: bool,
    pub(super) descriptor: DisplayDescriptor,
}

fn normalize_monitor_dimension(value: Option<i32>) -> Option<u32> {
    value
        .and_then(|size| u32::try_from(size).ok())
        .filter(|size| *size > 0)
}

/// Hyprland reports the unrotated mode size; odd transforms rotate by 90 degrees.
fn oriented_size(width: u32, height: u32, transform: Option<u8>) -> Size {
    match transform {
        Some(value) if value % 2 == 1 => Size::new(height, width),
        _ => Size::new(width, height),
    }
}

pub(super) fn parse_monitor_displays(
    monitors_json: &str,
) -> Result<Vec<MonitorDisplay>, CaptureError> {
    let monitors: Vec<MonitorStatus> = serde_json::from_str(monitors_json).map_err(|err| {
        CaptureError::InvalidMonitorMetadata {
            message: err.to_string(),
        }
    })?;

    let mut displays = Vec::new();
    for monitor in monitors {
        if monitor.disabled.unwrap_or(false) {
            continue;
        }
        let Some(name) = monitor.name.filter(|item| !item.is_empty()) else {
            continue;
        };
        let (Some(width), Some(height)) = (
            normalize_monitor_dimension(monitor.width),
            normalize_monitor_dimension(monitor.height),
        ) else {
            tracing::debug!(monitor = %name, "skipping monitor without a usable size");
            continue;
        };

        displays.push(MonitorDisplay {
            focused: monitor.focused,
            descriptor: DisplayDescriptor::new(
                DisplayId::new(name),
                Point::new(monitor.x.unwrap_or(0), monitor.y.unwrap_or(0)),
                oriented_size(width, height, monitor.transform),
                monitor.scale.unwrap_or(1.0),
            ),
        });
    }

    Ok(displays)
}

pub(super) fn focused_display(displays: Vec<MonitorDisplay>) -> Result<DisplayDescriptor, CaptureError> {
    displays
        .into_iter()
        .find(|display| display.focused)
        .map(|display| display.descriptor)
        .ok_or(CaptureError::NoFocusedMonitor)
}
