use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::event::LoginDerivation;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auto_login: AutoLoginConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoLoginConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub status_id: Option<String>,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_true")]
    pub show_success_toast: bool,
    #[serde(default)]
    pub login_derivation: LoginDerivation,
    #[serde(default)]
    pub launch_check: LaunchCheck,
    #[serde(default)]
    pub retry_fallback: RetryFallback,
    #[serde(default = "default_true")]
    pub status_detail_fallback: bool,
    #[serde(default = "default_true")]
    pub active_work_fallback: bool,
    #[serde(default = "default_cooldown_ms")]
    pub relogin_cooldown_ms: u64,
    pub marker_path: Option<PathBuf>,
}

impl Default for AutoLoginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            status_id: None,
            delay_ms: default_delay_ms(),
            show_success_toast: true,
            login_derivation: LoginDerivation::default(),
            launch_check: LaunchCheck::default(),
            retry_fallback: RetryFallback::default(),
            status_detail_fallback: true,
            active_work_fallback: true,
            relogin_cooldown_ms: default_cooldown_ms(),
            marker_path: None,
        }
    }
}

impl AutoLoginConfig {
    /// The configured status override, treating an empty string as absent.
    pub fn status_override(&self) -> Option<&str> {
        self.status_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Location of the session marker used by [`LaunchCheck::ReloadMarker`].
    pub fn marker_path(&self) -> PathBuf {
        self.marker_path.clone().unwrap_or_else(default_marker_path)
    }

    pub fn log_active_overrides(&self) {
        if let Some(status_id) = self.status_override() {
            info!(status_id, "using configured presence status override");
        }
        info!(
            enabled = self.enabled,
            show_success_toast = self.show_success_toast,
            delay_ms = self.delay_ms,
            login_derivation = ?self.login_derivation,
            launch_check = ?self.launch_check,
            retry_fallback = ?self.retry_fallback,
            "auto-login configuration resolved"
        );
    }
}

/// Gate evaluated by `initialize()` before the first attempt is scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchCheck {
    #[default]
    None,
    /// Skip when a session marker shows this launch is a reload.
    ReloadMarker,
    /// Skip when the agent already holds a presence status.
    ExistingPresence,
}

/// Source of the status id used when the primary set-status call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryFallback {
    /// The first entry of the backend's enumerated available statuses.
    #[default]
    FirstAvailable,
    /// Whatever status id the backend currently reports.
    CurrentStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    enabled: Option<String>,
    status_id: Option<String>,
    delay_ms: Option<String>,
    show_success_toast: Option<String>,
    log_level: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_delay_ms() -> u64 {
    2000
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel_capacity() -> usize {
    256
}

#[cfg(feature = "native")]
fn default_marker_path() -> PathBuf {
    match directories::ProjectDirs::from("com", "autologin", "autologin") {
        Some(proj_dirs) => proj_dirs.cache_dir().join("session.marker"),
        None => std::env::temp_dir().join("autologin-session.marker"),
    }
}

#[cfg(not(feature = "native"))]
fn default_marker_path() -> PathBuf {
    std::env::temp_dir().join("autologin-session.marker")
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const DEFAULT_CONFIG_TOML: &str = r#"[auto_login]
enabled = true
# status_id = "0N58c000000092H"
delay_ms = 2000
show_success_toast = true
login_derivation = "channels"
launch_check = "none"
retry_fallback = "first-available"
status_detail_fallback = true
active_work_fallback = true
relogin_cooldown_ms = 30000
# marker_path = "/tmp/autologin/session.marker"

[logging]
level = "info"

[event_bus]
channel_capacity = 256
"#;

/// Return the resolved platform-appropriate configuration file path.
#[cfg(feature = "native")]
pub fn config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "autologin", "autologin") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

/// Load configuration from the platform config path, merging environment
/// variable overrides.
#[cfg(feature = "native")]
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_path())
}

/// Load configuration from a specific path. A missing file is created with
/// the defaults and the defaults are returned.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    load_config_from_with_overrides(path.as_ref(), config_overrides_from_env())
}

/// Parse configuration from a TOML string directly.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_overrides(toml_str, config_overrides_from_env())
}

fn load_config_from_with_overrides(
    path: &Path,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_default_config(path)?;
            info!(path = %path.display(), "wrote default configuration");
            DEFAULT_CONFIG_TOML.to_string()
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, overrides)
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides)?;
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        enabled: std::env::var("AUTOLOGIN_ENABLED").ok(),
        status_id: std::env::var("AUTOLOGIN_STATUS_ID").ok(),
        delay_ms: std::env::var("AUTOLOGIN_DELAY_MS").ok(),
        show_success_toast: std::env::var("AUTOLOGIN_SHOW_SUCCESS_TOAST").ok(),
        log_level: std::env::var("AUTOLOGIN_LOG_LEVEL").ok(),
    }
}

fn apply_overrides(config: &mut Config, overrides: ConfigOverrides) -> Result<(), ConfigError> {
    if let Some(enabled) = overrides.enabled {
        config.auto_login.enabled = parse_flag("auto_login.enabled", &enabled)?;
    }
    if let Some(status_id) = overrides.status_id {
        config.auto_login.status_id = Some(status_id);
    }
    if let Some(delay) = overrides.delay_ms {
        config.auto_login.delay_ms = delay.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: "auto_login.delay_ms".to_string(),
            message: format!("expected milliseconds, got {delay:?}"),
        })?;
    }
    if let Some(show) = overrides.show_success_toast {
        config.auto_login.show_success_toast =
            parse_flag("auto_login.show_success_toast", &show)?;
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
    Ok(())
}

fn parse_flag(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a boolean, got {value:?}"),
        }),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    Ok(())
}

fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)?;
    Ok(())
}
