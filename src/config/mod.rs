use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigPathError {
    MissingHomeDirectory,
}

const APP_DIR: &str = "snapask";
const APP_CONFIG_FILE: &str = "config.json";
const ENDPOINT_ENV: &str = "SNAPASK_ENDPOINT";
const MODEL_ENV: &str = "SNAPASK_MODEL";

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_MAX_TOKENS: u32 = 600;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_PENDING_TICK_MS: u64 = 500;
const DEFAULT_THUMBNAIL_WIDTH: u32 = 160;
const DEFAULT_THUMBNAIL_HEIGHT: u32 = 120;
const DEFAULT_HIDE_SETTLE_MS: u64 = 150;
const MIN_PENDING_TICK_MS: u64 = 50;
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. The user sends questions \
together with screenshots of regions of their screen. Look closely at the images, answer \
the specific question asked, and work through it step by step.";

/// Application-level settings from `config.json`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    pending_tick_ms: Option<u64>,
    #[serde(default)]
    thumbnail_width: Option<u32>,
    #[serde(default)]
    thumbnail_height: Option<u32>,
    #[serde(default)]
    hide_settle_ms: Option<u64>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

impl AppConfig {
    pub fn endpoint(&self) -> &str {
        non_empty(self.endpoint.as_deref()).unwrap_or(DEFAULT_ENDPOINT)
    }

    pub fn model(&self) -> &str {
        non_empty(self.model.as_deref()).unwrap_or(DEFAULT_MODEL)
    }

    pub fn api_key_env(&self) -> &str {
        non_empty(self.api_key_env.as_deref()).unwrap_or(DEFAULT_API_KEY_ENV)
    }

    /// `None` when the config explicitly sets an empty prompt.
    pub fn system_prompt(&self) -> Option<&str> {
        match self.system_prompt.as_deref() {
            Some(prompt) => non_empty(Some(prompt)),
            None => Some(DEFAULT_SYSTEM_PROMPT),
        }
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
            .filter(|value| value.is_finite())
            .map_or(0.0, |value| value.clamp(0.0, 2.0))
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn pending_tick_interval(&self) -> Duration {
        Duration::from_millis(
            self.pending_tick_ms
                .unwrap_or(DEFAULT_PENDING_TICK_MS)
                .max(MIN_PENDING_TICK_MS),
        )
    }

    pub fn thumbnail_size(&self) -> (u32, u32) {
        (
            self.thumbnail_width
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_THUMBNAIL_WIDTH),
            self.thumbnail_height
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_THUMBNAIL_HEIGHT),
        )
    }

    pub fn hide_settle_delay(&self) -> Duration {
        Duration::from_millis(self.hide_settle_ms.unwrap_or(DEFAULT_HIDE_SETTLE_MS))
    }

    fn apply_env_overrides(&mut self, endpoint: Option<String>, model: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|value| !value.trim().is_empty()) {
            self.endpoint = Some(endpoint);
        }
        if let Some(model) = model.filter(|value| !value.trim().is_empty()) {
            self.model = Some(model);
        }
    }
}

pub fn load_app_config() -> AppConfig {
    let (xdg_config_home, home) = config_env_dirs();
    let mut config = load_app_config_with(xdg_config_home.as_deref(), home.as_deref());
    config.apply_env_overrides(std::env::var(ENDPOINT_ENV).ok(), std::env::var(MODEL_ENV).ok());
    tracing::info!(
        endpoint = config.endpoint(),
        model = config.model(),
        "loaded app config"
    );
    config
}

fn load_app_config_with(xdg_config_home: Option<&Path>, home: Option<&Path>) -> AppConfig {
    let path = match app_config_path(APP_DIR, APP_CONFIG_FILE, xdg_config_home, home) {
        Ok(p) => p,
        Err(_) => return AppConfig::default(),
    };
    if !path.exists() {
        return AppConfig::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
            tracing::warn!(?err, ?path, "failed to parse config.json; using defaults");
            AppConfig::default()
        }),
        Err(err) => {
            tracing::warn!(?err, ?path, "failed to read config.json; using defaults");
            AppConfig::default()
        }
    }
}

pub(crate) fn config_env_dirs() -> (Option<PathBuf>, Option<PathBuf>) {
    (
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

pub(crate) fn app_config_path(
    app_dir: &str,
    file_name: &str,
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    let mut path = config_root(xdg_config_home, home)?;
    path.push(app_dir);
    path.push(file_name);
    Ok(path)
}

fn config_root(
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    if let Some(xdg) = xdg_config_home.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(xdg.to_path_buf());
    }

    let home = home.ok_or(ConfigPathError::MissingHomeDirectory)?;
    Ok(home.join(".config"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_config_home(name: &str, contents: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "snapask-config-test-{name}-{}",
            std::process::id()
        ));
        let dir = root.join(APP_DIR);
        std::fs::create_dir_all(&dir).expect("config dir should be creatable");
        std::fs::write(dir.join(APP_CONFIG_FILE), contents).expect("config should be writable");
        root
    }

    #[test]
    fn app_config_path_prefers_xdg_config_home() {
        let path = app_config_path(
            "snapask",
            "config.json",
            Some(Path::new("/tmp/config-root")),
            Some(Path::new("/tmp/home")),
        )
        .expect("path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/config-root/snapask/config.json"));
    }

    #[test]
    fn app_config_path_falls_back_to_home_dot_config() {
        let path = app_config_path("snapask", "config.json", None, Some(Path::new("/tmp/home")))
            .expect("path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/home/.config/snapask/config.json"));
    }

    #[test]
    fn app_config_path_errors_when_home_missing_and_xdg_unset() {
        let error = app_config_path("snapask", "config.json", None, None).unwrap_err();
        assert_eq!(error, ConfigPathError::MissingHomeDirectory);
    }

    #[test]
    fn defaults_apply_when_config_is_missing() {
        let config = load_app_config_with(Some(Path::new("/tmp/snapask-no-such-config")), None);
        assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert_eq!(config.api_key_env(), "OPENAI_API_KEY");
        assert_eq!(config.max_tokens(), 600);
        assert_eq!(config.temperature(), 0.0);
        assert_eq!(config.pending_tick_interval(), Duration::from_millis(500));
        assert_eq!(config.thumbnail_size(), (160, 120));
        assert!(config.system_prompt().is_some());
    }

    #[test]
    fn config_file_values_override_defaults() {
        let root = scratch_config_home(
            "values",
            r#"{"endpoint":"http://localhost:8080/v1/chat/completions","model":"llava",
                "system_prompt":"","pending_tick_ms":10,"request_timeout_secs":30,
                "thumbnail_width":80}"#,
        );
        let config = load_app_config_with(Some(&root), None);

        assert_eq!(config.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.model(), "llava");
        assert_eq!(config.system_prompt(), None);
        assert_eq!(
            config.pending_tick_interval(),
            Duration::from_millis(MIN_PENDING_TICK_MS)
        );
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.thumbnail_size(), (80, 120));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn malformed_config_falls_back_to_defaults() {
        let root = scratch_config_home("malformed", "{not json");
        let config = load_app_config_with(Some(&root), None);
        assert_eq!(config.model(), DEFAULT_MODEL);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn env_overrides_replace_non_empty_values_only() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(Some("http://proxy/v1".to_string()), Some("  ".to_string()));
        assert_eq!(config.endpoint(), "http://proxy/v1");
        assert_eq!(config.model(), DEFAULT_MODEL);
    }
}
