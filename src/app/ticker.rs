use std::time::Duration;

use crate::session::{PendingTicker, TickFlow};

/// Pending-indicator timer on the GTK main loop. `start` must be called on
/// the main thread.
#[derive(Debug, Default)]
pub(super) struct GlibPendingTicker;

impl PendingTicker for GlibPendingTicker {
    fn start(&self, interval: Duration, mut tick: Box<dyn FnMut() -> TickFlow + Send>) {
        gtk4::glib::timeout_add_local(interval, move || match tick() {
            TickFlow::Continue => gtk4::glib::ControlFlow::Continue,
            TickFlow::Stop => gtk4::glib::ControlFlow::Break,
        });
    }
}
