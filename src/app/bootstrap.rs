use crate::config::{load_app_config, AppConfig};
use crate::storage::prune_stale_temp_files;

const STALE_CAPTURE_MAX_AGE_HOURS: u64 = 24;

pub(super) struct AppBootstrap {
    pub(super) config: AppConfig,
}

pub(super) fn bootstrap_app_runtime() -> AppBootstrap {
    prune_stale_capture_temp_files();
    let config = load_app_config();
    tracing::info!(
        pending_tick_ms = config.pending_tick_interval().as_millis() as u64,
        hide_settle_ms = config.hide_settle_delay().as_millis() as u64,
        "loaded runtime settings"
    );
    AppBootstrap { config }
}

fn prune_stale_capture_temp_files() {
    match prune_stale_temp_files(STALE_CAPTURE_MAX_AGE_HOURS) {
        Ok(report) if report.removed_files > 0 => {
            tracing::info!(
                removed_files = report.removed_files,
                "pruned stale capture temp files"
            );
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(
                max_age_hours = STALE_CAPTURE_MAX_AGE_HOURS,
                ?err,
                "failed to prune stale capture temp files"
            );
        }
    }
}

/// Only argv[0] goes to GTK so unknown flags do not fail its parser.
pub(super) fn gtk_launch_args() -> Vec<String> {
    std::env::args().take(1).collect()
}
