pub mod app;
pub mod capture;
mod config;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod notification;
pub mod overlay;
pub mod session;
pub mod storage;
pub mod transport;

pub use config::{load_app_config, AppConfig};
pub use error::{AppError, AppResult};

/// Entrypoint used by the `snapask` binary.
pub fn run() -> AppResult<()> {
    logging::init();
    tracing::info!("starting SnapAsk");

    let app = app::App::new();
    app.start()?;

    tracing::info!("shutdown complete");
    Ok(())
}
