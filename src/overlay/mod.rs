//! Drag-to-select state machine behind the fullscreen capture overlay.
//!
//! The overlay is one-shot: it covers a single display resolved when it is
//! shown, tracks one drag gesture at a time, and ends after a capture,
//! a capture failure, or a cancel.

use crate::capture::{grab_region_with, CaptureBackend, CaptureError, CapturedImage};
use crate::geometry::{self, DisplayDescriptor, GeometryError, Point, Rectangle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Idle,
    Selecting { start: Point, end: Point },
    Resolved,
    Closed,
}

impl OverlayState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

/// Window-system side of the overlay.
pub trait OverlaySurface {
    /// Hides all overlay chrome.
    fn hide(&self);
    /// Blocks until a previous `hide` has reached the screen.
    fn settle(&self);
    fn queue_draw(&self);
    /// Brings back the host window that was hidden for an unobstructed capture.
    fn restore_host(&self);
}

#[derive(Debug)]
pub enum OverlayOutcome {
    /// Zero-area drag; the overlay went back to `Idle` and stays open.
    Discarded,
    Captured(CapturedImage),
    Failed(CaptureError),
    Cancelled,
}

#[derive(Debug)]
pub struct CaptureOverlay {
    display: DisplayDescriptor,
    state: OverlayState,
}

impl CaptureOverlay {
    pub fn new(display: DisplayDescriptor) -> Self {
        let display_id = &display.id;
        tracing::debug!(display = %display_id, "capture overlay opened");
        Self {
            display,
            state: OverlayState::Idle,
        }
    }

    pub fn display(&self) -> &DisplayDescriptor {
        &self.display
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    /// Live selection in display-local pixels, for drawing.
    pub fn selection(&self) -> Option<Rectangle> {
        match self.state {
            OverlayState::Selecting { start, end } => Some(Rectangle::from_corners(start, end)),
            _ => None,
        }
    }

    pub fn press<S: OverlaySurface>(&mut self, point: Point, surface: &S) {
        if self.state != OverlayState::Idle {
            tracing::debug!(state = ?self.state, "ignoring press outside idle state");
            return;
        }
        self.state = OverlayState::Selecting {
            start: point,
            end: point,
        };
        surface.queue_draw();
    }

    pub fn drag_to<S: OverlaySurface>(&mut self, point: Point, surface: &S) {
        if let OverlayState::Selecting { start, .. } = self.state {
            self.state = OverlayState::Selecting { start, end: point };
            surface.queue_draw();
        }
    }

    /// Ends the drag at `point`. A zero-area drag is discarded silently; any
    /// other release hides the overlay, samples the screen, then restores the
    /// host window.
    pub fn release<S, B>(&mut self, point: Point, surface: &S, backend: &B) -> OverlayOutcome
    where
        S: OverlaySurface,
        B: CaptureBackend,
    {
        let OverlayState::Selecting { start, .. } = self.state else {
            tracing::debug!(state = ?self.state, "ignoring release without an active drag");
            return OverlayOutcome::Discarded;
        };

        let region = match geometry::resolve(start, point, &self.display) {
            Ok(region) => region,
            Err(GeometryError::EmptySelection) => {
                tracing::debug!("discarding zero-area selection");
                self.state = OverlayState::Idle;
                surface.queue_draw();
                return OverlayOutcome::Discarded;
            }
        };

        self.state = OverlayState::Resolved;
        surface.hide();
        surface.settle();
        let grabbed = grab_region_with(backend, &self.display, region);
        surface.restore_host();

        match grabbed {
            Ok(image) => OverlayOutcome::Captured(image),
            Err(err) => {
                tracing::error!(?err, display = %self.display.id, %region, "capture pass failed");
                OverlayOutcome::Failed(err)
            }
        }
    }

    pub fn cancel<S: OverlaySurface>(&mut self, surface: &S) -> OverlayOutcome {
        if self.state.is_terminal() {
            return OverlayOutcome::Cancelled;
        }
        self.state = OverlayState::Closed;
        surface.hide();
        surface.restore_host();
        tracing::debug!("capture overlay cancelled");
        OverlayOutcome::Cancelled
    }
}
