use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use self::hyprland::{focused_display, parse_monitor_displays};
use crate::geometry::{DisplayDescriptor, Rectangle};
use crate::storage::{create_temp_capture, StorageError};
use image::{ImageFormat, RgbaImage};
use thiserror::Error;

mod hyprland;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CAPTURE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Identity assigned when an image is captured. Two captures with identical
/// pixels still carry distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl ImageId {
    pub fn next() -> Self {
        Self(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image-{}", self.0)
    }
}

/// A captured region. Cloning shares the pixel buffer.
#[derive(Clone)]
pub struct CapturedImage {
    pixels: Arc<RgbaImage>,
    width: u32,
    height: u32,
    id: ImageId,
}

impl CapturedImage {
    pub fn new(pixels: RgbaImage) -> Self {
        let (width, height) = pixels.dimensions();
        Self {
            pixels: Arc::new(pixels),
            width,
            height,
            id: ImageId::next(),
        }
    }

    pub const fn id(&self) -> ImageId {
        self.id
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Scales the image to fit inside `max_width` x `max_height`, keeping the
    /// aspect ratio.
    pub fn thumbnail(&self, max_width: u32, max_height: u32) -> RgbaImage {
        let (width, height) = fit_within(self.width, self.height, max_width, max_height);
        image::imageops::resize(
            self.pixels.as_ref(),
            width,
            height,
            image::imageops::FilterType::Triangle,
        )
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, CaptureError> {
        let mut bytes = Vec::new();
        self.pixels
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| CaptureError::Encode {
                message: err.to_string(),
            })?;
        Ok(bytes)
    }
}

impl fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedImage")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (max_width.max(1), max_height.max(1));
    }
    let scale = f64::min(
        f64::from(max_width) / f64::from(width),
        f64::from(max_height) / f64::from(height),
    );
    let scaled_width = (f64::from(width) * scale).round().max(1.0) as u32;
    let scaled_height = (f64::from(height) * scale).round().max(1.0) as u32;
    (scaled_width, scaled_height)
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("command failed: {command}: {message}")]
    CommandFailed { command: String, message: String },
    #[error("command io error: {command}")]
    CommandIo {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no focused monitor found")]
    NoFocusedMonitor,
    #[error("invalid monitor metadata: {message}")]
    InvalidMonitorMetadata { message: String },
    #[error("region {region} lies outside display {display}")]
    RegionOutsideDisplay { display: String, region: Rectangle },
    #[error("failed to read captured image: {message}")]
    ImageReadFailed { message: String },
    #[error("failed to encode captured image: {message}")]
    Encode { message: String },
    #[error("failed to prepare temporary capture file")]
    TempFile(#[source] StorageError),
}

/// Low-level access to the compositor and screenshot tools.
pub trait CaptureBackend {
    fn monitors_json(&self) -> Result<String, CaptureError>;
    fn run_output_capture(&self, output_name: &str, target: &Path) -> Result<(), CaptureError>;
    fn load_image(&self, path: &Path) -> Result<RgbaImage, CaptureError>;
}

/// `hyprctl` for display metadata, `grim` for pixels.
#[derive(Default)]
pub struct SystemCaptureBackend;

impl CaptureBackend for SystemCaptureBackend {
    fn monitors_json(&self) -> Result<String, CaptureError> {
        run_command_output("hyprctl", &["monitors", "-j"])
    }

    fn run_output_capture(&self, output_name: &str, target: &Path) -> Result<(), CaptureError> {
        run_command_status("grim", &["-o", output_name], target)
    }

    fn load_image(&self, path: &Path) -> Result<RgbaImage, CaptureError> {
        let image = image::open(path).map_err(|err| CaptureError::ImageReadFailed {
            message: err.to_string(),
        })?;
        Ok(image.into_rgba8())
    }
}

pub fn list_displays() -> Result<Vec<DisplayDescriptor>, CaptureError> {
    list_displays_with(&SystemCaptureBackend)
}

pub fn active_display() -> Result<DisplayDescriptor, CaptureError> {
    active_display_with(&SystemCaptureBackend)
}

pub fn list_displays_with<B: CaptureBackend>(
    backend: &B,
) -> Result<Vec<DisplayDescriptor>, CaptureError> {
    let monitors_json = backend.monitors_json()?;
    Ok(parse_monitor_displays(&monitors_json)?
        .into_iter()
        .map(|display| display.descriptor)
        .collect())
}

pub fn active_display_with<B: CaptureBackend>(
    backend: &B,
) -> Result<DisplayDescriptor, CaptureError> {
    let monitors_json = backend.monitors_json()?;
    let active = focused_display(parse_monitor_displays(&monitors_json)?)?;
    tracing::debug!(
        display = %active.id,
        bounds = %active.pixel_bounds,
        scale = active.scale_factor,
        "resolved active display"
    );
    Ok(active)
}

/// Grabs `region` (global pixel space) from `display` and returns it as a new
/// captured image.
pub fn grab_region_with<B: CaptureBackend>(
    backend: &B,
    display: &DisplayDescriptor,
    region: Rectangle,
) -> Result<CapturedImage, CaptureError> {
    if region.size.is_empty() || !display.pixel_bounds.contains(&region) {
        return Err(CaptureError::RegionOutsideDisplay {
            display: display.id.to_string(),
            region,
        });
    }

    let sequence = NEXT_CAPTURE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let temp_path = build_capture_path(&format!("{}-{sequence}", std::process::id()))?;

    if let Err(err) = backend.run_output_capture(display.id.as_str(), &temp_path) {
        cleanup_temp_capture_file(&temp_path, "output capture command failure");
        return Err(err);
    }

    let loaded = backend.load_image(&temp_path);
    cleanup_temp_capture_file(&temp_path, "output capture read");
    let output = loaded?;

    let local = region.translate(-display.origin.x, -display.origin.y);
    let (x, y) = (local.origin.x as u32, local.origin.y as u32);
    let (output_width, output_height) = output.dimensions();
    if u64::from(x) + u64::from(local.size.width) > u64::from(output_width)
        || u64::from(y) + u64::from(local.size.height) > u64::from(output_height)
    {
        return Err(CaptureError::RegionOutsideDisplay {
            display: display.id.to_string(),
            region,
        });
    }

    let cropped =
        image::imageops::crop_imm(&output, x, y, local.size.width, local.size.height).to_image();
    let captured = CapturedImage::new(cropped);
    let display_id = &display.id;
    tracing::info!(
        image_id = %captured.id(),
        display = %display_id,
        region = %region,
        "captured region"
    );
    Ok(captured)
}

fn build_capture_path(capture_id: &str) -> Result<PathBuf, CaptureError> {
    create_temp_capture(capture_id).map_err(CaptureError::TempFile)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TempCaptureCleanupOutcome {
    Removed,
    NotFound,
    Failed,
}

fn cleanup_temp_capture_file(temp_path: &Path, stage: &str) -> TempCaptureCleanupOutcome {
    cleanup_temp_capture_file_with(temp_path, stage, |path| std::fs::remove_file(path))
}

fn cleanup_temp_capture_file_with<F>(
    temp_path: &Path,
    stage: &str,
    remove_file: F,
) -> TempCaptureCleanupOutcome
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    match remove_file(temp_path) {
        Ok(()) => TempCaptureCleanupOutcome::Removed,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                stage = stage,
                path = %temp_path.display(),
                "temporary capture file was already missing during cleanup"
            );
            TempCaptureCleanupOutcome::NotFound
        }
        Err(err) => {
            tracing::warn!(
                stage = stage,
                path = %temp_path.display(),
                ?err,
                "failed to cleanup temporary capture file"
            );
            TempCaptureCleanupOutcome::Failed
        }
    }
}

fn run_command_output(command: &str, args: &[&str]) -> Result<String, CaptureError> {
    let output = Command::new(command)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|err| CaptureError::CommandIo {
            command: command.to_string(),
            source: err,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CaptureError::CommandFailed {
            command: command.to_string(),
            message: format!("exit status: {}; stderr: {}", output.status, stderr.trim()),
        });
    }

    if stdout.is_empty() {
        return Err(CaptureError::CommandFailed {
            command: command.to_string(),
            message: "command produced no stdout output".to_string(),
        });
    }

    Ok(stdout)
}

fn run_command_status(command: &str, args: &[&str], output: &Path) -> Result<(), CaptureError> {
    let outcome = Command::new(command)
        .args(args)
        .arg(output)
        .stderr(Stdio::piped())
        .output()
        .map_err(|err| CaptureError::CommandIo {
            command: command.to_string(),
            source: err,
        })?;

    if outcome.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&outcome.stderr);
        Err(CaptureError::CommandFailed {
            command: command.to_string(),
            message: format!("exit status: {}; stderr: {}", outcome.status, stderr.trim()),
        })
    }
}
