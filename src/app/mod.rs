use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppResult;
use crate::session::{ConversationSession, SessionCollaborators};
use crate::transport::{OpenAiSettings, OpenAiTransport};
use gtk4::prelude::*;
use gtk4::Application;

mod bootstrap;
mod chat_window;
mod overlay_window;
mod runtime_css;
mod ticker;
mod worker;

use self::bootstrap::*;
use self::chat_window::{build_chat_window, ChatWindowConfig, DirtyFlagSink};
use self::runtime_css::install_runtime_css;
use self::ticker::GlibPendingTicker;
use self::worker::WorkerDispatcher;

const APPLICATION_ID: &str = "io.github.snapask";
const UI_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct App;

impl App {
    pub fn new() -> Self {
        Self
    }

    pub fn start(&self) -> AppResult<()> {
        let bootstrap = bootstrap_app_runtime();
        let config = bootstrap.config;

        let transport = OpenAiTransport::new(OpenAiSettings::from_config(&config))?;
        let dirty = Arc::new(AtomicBool::new(false));
        let session = ConversationSession::new(SessionCollaborators {
            dispatcher: Arc::new(WorkerDispatcher::new(transport)),
            ticker: Arc::new(GlibPendingTicker),
            sink: Arc::new(DirtyFlagSink::new(dirty.clone())),
            tick_interval: config.pending_tick_interval(),
        });

        let window_config = ChatWindowConfig {
            thumbnail_size: config.thumbnail_size(),
            hide_settle_delay: config.hide_settle_delay(),
            ui_tick_interval: UI_TICK_INTERVAL,
        };

        tracing::info!("starting gtk runtime");
        let application = Application::new(
            Some(APPLICATION_ID),
            gtk4::gio::ApplicationFlags::NON_UNIQUE,
        );

        let activate_once = Rc::new(Cell::new(false));
        application.connect_activate(move |app| {
            if activate_once.replace(true) {
                tracing::debug!("ignoring duplicate gtk activate signal");
                return;
            }
            install_runtime_css();
            let window =
                build_chat_window(app, session.clone(), dirty.clone(), window_config.clone());
            tracing::info!("presenting chat window");
            window.present();
        });

        application.run_with_args(&gtk_launch_args());
        tracing::info!("gtk runtime exited");
        Ok(())
    }
}
