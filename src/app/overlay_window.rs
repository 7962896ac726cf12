use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::capture::SystemCaptureBackend;
use crate::geometry::DisplayDescriptor;
use crate::overlay::{CaptureOverlay, OverlayOutcome, OverlaySurface};
use gtk4::prelude::*;
use gtk4::{Application, ApplicationWindow, DrawingArea};

const SELECTION_STROKE_WIDTH: f64 = 2.0;
const SCRIM_ALPHA: f64 = 0.25;
const MAX_SETTLE_ITERATIONS: usize = 32;

struct OverlayWindowSurface {
    window: ApplicationWindow,
    canvas: DrawingArea,
    host: ApplicationWindow,
    settle_delay: Duration,
}

impl OverlaySurface for OverlayWindowSurface {
    fn hide(&self) {
        self.window.set_visible(false);
    }

    fn settle(&self) {
        let context = gtk4::glib::MainContext::default();
        for _ in 0..MAX_SETTLE_ITERATIONS {
            if !context.pending() {
                break;
            }
            context.iteration(false);
        }
        std::thread::sleep(self.settle_delay);
    }

    fn queue_draw(&self) {
        self.canvas.queue_draw();
    }

    fn restore_host(&self) {
        self.host.set_visible(true);
        self.host.present();
    }
}

type OutcomeHandler = Rc<dyn Fn(OverlayOutcome)>;

#[derive(Clone)]
struct OverlayContext {
    overlay: Rc<RefCell<CaptureOverlay>>,
    surface: Rc<OverlayWindowSurface>,
    drag_origin: Rc<Cell<(f64, f64)>>,
    on_outcome: OutcomeHandler,
}

impl OverlayContext {
    fn finish(&self, outcome: OverlayOutcome) {
        if matches!(outcome, OverlayOutcome::Discarded) {
            return;
        }
        self.surface.window.close();
        (self.on_outcome.as_ref())(outcome);
    }
}

fn gdk_monitor_for(display: &DisplayDescriptor) -> Option<gtk4::gdk::Monitor> {
    let gdk_display = gtk4::gdk::Display::default()?;
    let monitors = gdk_display.monitors();
    for index in 0..monitors.n_items() {
        let Some(item) = monitors.item(index) else {
            continue;
        };
        let Ok(monitor) = item.downcast::<gtk4::gdk::Monitor>() else {
            continue;
        };
        if monitor.connector().as_deref() == Some(display.id.as_str()) {
            return Some(monitor);
        }
    }
    None
}

fn draw_selection(overlay: &CaptureOverlay, context: &gtk4::cairo::Context) {
    context.set_source_rgba(0.0, 0.0, 0.0, SCRIM_ALPHA);
    context.paint().ok();

    let Some(selection) = overlay.selection() else {
        return;
    };
    let display = overlay.display();
    let (x, y) = display.logical_point(selection.origin);
    let width = f64::from(selection.size.width) / display.scale_factor;
    let height = f64::from(selection.size.height) / display.scale_factor;

    context.set_source_rgba(1.0, 0.0, 0.0, 1.0);
    context.set_line_width(SELECTION_STROKE_WIDTH);
    context.rectangle(x, y, width, height);
    context.stroke().ok();
}

fn handle_drag_begin(context: &OverlayContext, start_x: f64, start_y: f64) {
    context.drag_origin.set((start_x, start_y));
    let Ok(mut overlay) = context.overlay.try_borrow_mut() else {
        return;
    };
    let point = overlay.display().device_point(start_x, start_y);
    overlay.press(point, context.surface.as_ref());
}

fn handle_drag_update(context: &OverlayContext, offset_x: f64, offset_y: f64) {
    let (origin_x, origin_y) = context.drag_origin.get();
    let Ok(mut overlay) = context.overlay.try_borrow_mut() else {
        return;
    };
    let point = overlay
        .display()
        .device_point(origin_x + offset_x, origin_y + offset_y);
    overlay.drag_to(point, context.surface.as_ref());
}

fn handle_drag_end(context: &OverlayContext, offset_x: f64, offset_y: f64) {
    let (origin_x, origin_y) = context.drag_origin.get();
    let outcome = {
        let Ok(mut overlay) = context.overlay.try_borrow_mut() else {
            return;
        };
        let point = overlay
            .display()
            .device_point(origin_x + offset_x, origin_y + offset_y);
        overlay.release(point, context.surface.as_ref(), &SystemCaptureBackend)
    };
    context.finish(outcome);
}

fn handle_cancel(context: &OverlayContext) {
    let outcome = {
        let Ok(mut overlay) = context.overlay.try_borrow_mut() else {
            return;
        };
        if overlay.state().is_terminal() {
            return;
        }
        overlay.cancel(context.surface.as_ref())
    };
    context.finish(outcome);
}

/// Opens the fullscreen selection overlay on `display`. `on_outcome` runs once
/// with the captured image, the capture failure, or the cancel.
pub(super) fn open_capture_overlay<F>(
    app: &Application,
    host: &ApplicationWindow,
    display: DisplayDescriptor,
    settle_delay: Duration,
    on_outcome: F,
) where
    F: Fn(OverlayOutcome) + 'static,
{
    let window = ApplicationWindow::new(app);
    window.add_css_class("snapask-overlay");
    window.set_title(Some("SnapAsk capture"));
    window.set_decorated(false);

    let canvas = DrawingArea::new();
    canvas.set_hexpand(true);
    canvas.set_vexpand(true);
    window.set_child(Some(&canvas));

    let monitor = gdk_monitor_for(&display);
    if monitor.is_none() {
        let display_id = &display.id;
        tracing::warn!(display = %display_id, "no gdk monitor matches display; using default");
    }

    let context = OverlayContext {
        overlay: Rc::new(RefCell::new(CaptureOverlay::new(display))),
        surface: Rc::new(OverlayWindowSurface {
            window: window.clone(),
            canvas: canvas.clone(),
            host: host.clone(),
            settle_delay,
        }),
        drag_origin: Rc::new(Cell::new((0.0, 0.0))),
        on_outcome: Rc::new(on_outcome),
    };

    {
        let overlay = context.overlay.clone();
        canvas.set_draw_func(move |_, cairo, width, height| {
            if width <= 0 || height <= 0 {
                return;
            }
            if let Ok(overlay) = overlay.try_borrow() {
                draw_selection(&overlay, cairo);
            }
        });
    }

    let drag_gesture = gtk4::GestureDrag::new();
    drag_gesture.set_button(gtk4::gdk::BUTTON_PRIMARY);
    {
        let begin_context = context.clone();
        drag_gesture.connect_drag_begin(move |_, start_x, start_y| {
            handle_drag_begin(&begin_context, start_x, start_y);
        });
        let update_context = context.clone();
        drag_gesture.connect_drag_update(move |_, offset_x, offset_y| {
            handle_drag_update(&update_context, offset_x, offset_y);
        });
        let end_context = context.clone();
        drag_gesture.connect_drag_end(move |_, offset_x, offset_y| {
            handle_drag_end(&end_context, offset_x, offset_y);
        });
    }
    canvas.add_controller(drag_gesture);

    {
        let key_context = context.clone();
        let key_controller = gtk4::EventControllerKey::new();
        key_controller.connect_key_pressed(move |_, key, _, _| {
            if key != gtk4::gdk::Key::Escape {
                return gtk4::glib::Propagation::Proceed;
            }
            handle_cancel(&key_context);
            gtk4::glib::Propagation::Stop
        });
        window.add_controller(key_controller);
    }

    {
        let close_context = context.clone();
        window.connect_close_request(move |_| {
            handle_cancel(&close_context);
            gtk4::glib::Propagation::Proceed
        });
    }

    match monitor {
        Some(monitor) => window.fullscreen_on_monitor(&monitor),
        None => window.fullscreen(),
    }
    window.present();
}
