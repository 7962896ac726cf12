use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{self, CapturedImage, ImageId};
use crate::notification;
use crate::overlay::OverlayOutcome;
use crate::session::{ConversationSession, RenderSink, SendOutcome, TranscriptEntry};
use gtk4::prelude::*;
use gtk4::{
    Align, Application, ApplicationWindow, Box as GtkBox, Button, Entry, Orientation, Picture,
    PolicyType, ScrolledWindow, TextView, WrapMode,
};
use image::RgbaImage;

use super::overlay_window::open_capture_overlay;

const WINDOW_TITLE: &str = "SnapAsk";
const DEFAULT_WIDTH: i32 = 640;
const DEFAULT_HEIGHT: i32 = 720;
const TRANSCRIPT_IMAGE_MAX: (u32, u32) = (320, 240);

/// Marks the transcript view stale; the UI tick redraws it.
pub(super) struct DirtyFlagSink {
    dirty: Arc<AtomicBool>,
}

impl DirtyFlagSink {
    pub(super) fn new(dirty: Arc<AtomicBool>) -> Self {
        Self { dirty }
    }
}

impl RenderSink for DirtyFlagSink {
    fn transcript_changed(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

#[derive(Clone)]
pub(super) struct ChatWindowConfig {
    pub(super) thumbnail_size: (u32, u32),
    pub(super) hide_settle_delay: Duration,
    pub(super) ui_tick_interval: Duration,
}

#[derive(Clone)]
struct ChatWidgets {
    window: ApplicationWindow,
    transcript_view: TextView,
    transcript_scroller: ScrolledWindow,
    thumbnail_strip: GtkBox,
    entry: Entry,
    send_button: Button,
    screenshot_button: Button,
}

fn transcript_prefix(entry: &TranscriptEntry) -> String {
    match entry {
        TranscriptEntry::Text { sender, body } => format!("{sender}: {body}\n\n"),
        TranscriptEntry::ImageRef { sender, .. } => format!("{sender}: "),
        TranscriptEntry::LoadingMarker { label, .. } => format!("Assistant: {label}\n"),
    }
}

fn texture_from_rgba(image: RgbaImage) -> gtk4::gdk::MemoryTexture {
    let (width, height) = image.dimensions();
    let stride = width as usize * 4;
    let bytes = gtk4::glib::Bytes::from_owned(image.into_raw());
    gtk4::gdk::MemoryTexture::new(
        width as i32,
        height as i32,
        gtk4::gdk::MemoryFormat::R8g8b8a8,
        &bytes,
        stride,
    )
}

fn thumbnail_texture(image: &CapturedImage, max: (u32, u32)) -> gtk4::gdk::MemoryTexture {
    texture_from_rgba(image.thumbnail(max.0, max.1))
}

fn render_transcript(widgets: &ChatWidgets, entries: &[TranscriptEntry]) {
    let buffer = widgets.transcript_view.buffer();
    buffer.set_text("");
    for entry in entries {
        let mut end = buffer.end_iter();
        buffer.insert(&mut end, &transcript_prefix(entry));
        if let TranscriptEntry::ImageRef { image, .. } = entry {
            let texture = thumbnail_texture(image, TRANSCRIPT_IMAGE_MAX);
            let mut end = buffer.end_iter();
            buffer.insert_paintable(&mut end, &texture);
            let mut end = buffer.end_iter();
            buffer.insert(&mut end, "\n\n");
        }
    }

    let adjustment = widgets.transcript_scroller.vadjustment();
    gtk4::glib::idle_add_local_once(move || {
        adjustment.set_value(adjustment.upper() - adjustment.page_size());
    });
}

fn pending_ids(images: &[CapturedImage]) -> Vec<ImageId> {
    images.iter().map(CapturedImage::id).collect()
}

fn render_thumbnail_strip(
    widgets: &ChatWidgets,
    session: &ConversationSession,
    images: &[CapturedImage],
    thumbnail_size: (u32, u32),
) {
    while let Some(child) = widgets.thumbnail_strip.first_child() {
        widgets.thumbnail_strip.remove(&child);
    }
    widgets.thumbnail_strip.set_visible(!images.is_empty());

    for image in images {
        let picture = Picture::for_paintable(&thumbnail_texture(image, thumbnail_size));
        picture.set_can_shrink(false);
        let button = Button::new();
        button.add_css_class("snapask-thumbnail");
        button.set_child(Some(&picture));
        button.set_tooltip_text(Some("Click to remove"));

        let session = session.clone();
        let id = image.id();
        button.connect_clicked(move |_| {
            if session.remove_image(id) {
                tracing::info!(image = %id, "pending image removed");
            }
        });
        widgets.thumbnail_strip.append(&button);
    }
}

fn build_widgets(app: &Application) -> ChatWidgets {
    let window = ApplicationWindow::new(app);
    window.set_title(Some(WINDOW_TITLE));
    window.set_default_size(DEFAULT_WIDTH, DEFAULT_HEIGHT);

    let root = GtkBox::new(Orientation::Vertical, 0);

    let transcript_view = TextView::new();
    transcript_view.add_css_class("snapask-transcript");
    transcript_view.set_editable(false);
    transcript_view.set_cursor_visible(false);
    transcript_view.set_wrap_mode(WrapMode::WordChar);
    let transcript_scroller = ScrolledWindow::new();
    transcript_scroller.set_vexpand(true);
    transcript_scroller.set_policy(PolicyType::Never, PolicyType::Automatic);
    transcript_scroller.set_child(Some(&transcript_view));
    root.append(&transcript_scroller);

    let thumbnail_strip = GtkBox::new(Orientation::Horizontal, 6);
    thumbnail_strip.add_css_class("snapask-thumbnail-strip");
    thumbnail_strip.set_visible(false);
    let strip_scroller = ScrolledWindow::new();
    strip_scroller.set_policy(PolicyType::Automatic, PolicyType::Never);
    strip_scroller.set_child(Some(&thumbnail_strip));
    root.append(&strip_scroller);

    let input_row = GtkBox::new(Orientation::Horizontal, 6);
    input_row.add_css_class("snapask-input-row");
    let entry = Entry::new();
    entry.set_hexpand(true);
    entry.set_placeholder_text(Some("Ask about your screenshots"));
    let screenshot_button = Button::with_label("Screenshot");
    let send_button = Button::with_label("Send");
    send_button.add_css_class("suggested-action");
    send_button.set_valign(Align::Center);
    input_row.append(&entry);
    input_row.append(&screenshot_button);
    input_row.append(&send_button);
    root.append(&input_row);

    window.set_child(Some(&root));

    ChatWidgets {
        window,
        transcript_view,
        transcript_scroller,
        thumbnail_strip,
        entry,
        send_button,
        screenshot_button,
    }
}

fn submit_entry(widgets: &ChatWidgets, session: &ConversationSession) {
    let text = widgets.entry.text();
    match session.send(text.as_str()) {
        Ok(SendOutcome::Sent { correlation_id }) => {
            tracing::debug!(%correlation_id, "message sent");
            widgets.entry.set_text("");
        }
        Ok(SendOutcome::NothingToSend) => {}
        Err(err) => tracing::warn!(%err, "send rejected"),
    }
}

fn handle_overlay_outcome(session: &ConversationSession, outcome: OverlayOutcome) {
    match outcome {
        OverlayOutcome::Captured(image) => session.attach_image(image),
        OverlayOutcome::Failed(err) => {
            session.report_capture_failure(&err);
            notification::send(format!("Screenshot failed: {err}"));
        }
        OverlayOutcome::Cancelled | OverlayOutcome::Discarded => {
            tracing::debug!("capture pass ended without an image");
        }
    }
}

fn start_capture(
    app: &Application,
    widgets: &ChatWidgets,
    session: &ConversationSession,
    settle_delay: Duration,
) {
    widgets.window.set_visible(false);
    let display = match capture::active_display() {
        Ok(display) => display,
        Err(err) => {
            widgets.window.set_visible(true);
            widgets.window.present();
            session.report_capture_failure(&err);
            notification::send(format!("Screenshot failed: {err}"));
            return;
        }
    };

    let session = session.clone();
    open_capture_overlay(app, &widgets.window, display, settle_delay, move |outcome| {
        handle_overlay_outcome(&session, outcome);
    });
}

fn install_ui_tick(
    widgets: ChatWidgets,
    session: ConversationSession,
    dirty: Arc<AtomicBool>,
    config: &ChatWindowConfig,
) {
    let thumbnail_size = config.thumbnail_size;
    let rendered_pending = RefCell::new(Vec::<ImageId>::new());
    gtk4::glib::timeout_add_local(config.ui_tick_interval, move || {
        if dirty.swap(false, Ordering::AcqRel) {
            render_transcript(&widgets, &session.snapshot());
        }

        let pending = session.pending_images();
        let ids = pending_ids(&pending);
        if *rendered_pending.borrow() != ids {
            render_thumbnail_strip(&widgets, &session, &pending, thumbnail_size);
            *rendered_pending.borrow_mut() = ids;
        }

        let idle = session.request_state().is_idle();
        if widgets.send_button.is_sensitive() != idle {
            widgets.send_button.set_sensitive(idle);
        }
        gtk4::glib::ControlFlow::Continue
    });
}

pub(super) fn build_chat_window(
    app: &Application,
    session: ConversationSession,
    dirty: Arc<AtomicBool>,
    config: ChatWindowConfig,
) -> ApplicationWindow {
    let widgets = build_widgets(app);

    {
        let widgets_for_send = widgets.clone();
        let session = session.clone();
        widgets.send_button.connect_clicked(move |_| {
            submit_entry(&widgets_for_send, &session);
        });
    }
    {
        let widgets_for_entry = widgets.clone();
        let session = session.clone();
        widgets.entry.connect_activate(move |_| {
            if widgets_for_entry.send_button.is_sensitive() {
                submit_entry(&widgets_for_entry, &session);
            }
        });
    }
    {
        let app = app.clone();
        let widgets_for_capture = widgets.clone();
        let session = session.clone();
        let settle_delay = config.hide_settle_delay;
        widgets.screenshot_button.connect_clicked(move |_| {
            start_capture(&app, &widgets_for_capture, &session, settle_delay);
        });
    }

    let window = widgets.window.clone();
    dirty.store(true, Ordering::Release);
    install_ui_tick(widgets, session, dirty, &config);
    window
}
