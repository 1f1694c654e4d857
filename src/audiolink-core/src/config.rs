use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    /// Plugin used when the command line does not name one.
    #[serde(default)]
    pub default_plugin: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Out-of-process plugins the host knows how to launch, keyed by id.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginEntry>,
    /// Settings read by the media application plugin process.
    #[serde(default)]
    pub media_app: MediaAppConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            default_plugin: None,
            logging: LoggingConfig::default(),
            plugins: BTreeMap::new(),
            media_app: MediaAppConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    /// Also log to the terminal (stderr). Plugin processes force this off.
    #[serde(default = "default_console_enabled", alias = "stdout")]
    pub console: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            console: default_console_enabled(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// How to launch one plugin process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Upper bound on a single request/response round trip.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl PluginEntry {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAppConfig {
    /// Identifier reported through `GetName`.
    #[serde(default = "default_source_name")]
    pub name: String,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Edge length in pixels requested for album art.
    #[serde(default = "default_album_art_size")]
    pub album_art_size: u32,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Default for MediaAppConfig {
    fn default() -> Self {
        Self {
            name: default_source_name(),
            probe_interval_ms: default_probe_interval_ms(),
            album_art_size: default_album_art_size(),
            event_queue_capacity: default_event_queue_capacity(),
            probe: ProbeConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl MediaAppConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Ask the media application client whether it is running.
    #[default]
    Client,
    /// Look for the application and helper in the OS process table.
    Process,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub kind: ProbeKind,
    #[serde(default)]
    pub app_process: Option<String>,
    #[serde(default)]
    pub helper_process: Option<String>,
}

/// Drives the built-in simulated media application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// When set, the application only counts as running while this file exists.
    #[serde(default)]
    pub presence_file: Option<PathBuf>,
    #[serde(default)]
    pub autoplay: bool,
    #[serde(default)]
    pub library: Vec<SimulatedTrack>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedTrack {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    pub length_secs: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("media_app.{field} must be greater than zero")]
    NonPositive { field: &'static str },
    #[error("media_app.probe.kind = \"process\" requires media_app.probe.app_process")]
    MissingAppProcess,
    #[error("media_app.probe.kind = \"process\" requires media_app.probe.helper_process")]
    MissingHelperProcess,
    #[error("plugin '{id}' has an empty executable path")]
    EmptyExecutable { id: String },
    #[error("unknown plugin '{id}'")]
    UnknownPlugin { id: String },
    #[error("no plugin selected; pass one explicitly or set default_plugin")]
    NoPluginSelected,
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }

        let media = &self.media_app;
        if media.probe_interval_ms == 0 {
            return Err(ValidationError::NonPositive {
                field: "probe_interval_ms",
            });
        }
        if media.album_art_size == 0 {
            return Err(ValidationError::NonPositive {
                field: "album_art_size",
            });
        }
        if media.event_queue_capacity == 0 {
            return Err(ValidationError::NonPositive {
                field: "event_queue_capacity",
            });
        }
        if media.probe.kind == ProbeKind::Process && media.probe.app_process.is_none() {
            return Err(ValidationError::MissingAppProcess);
        }
        if media.probe.kind == ProbeKind::Process && media.probe.helper_process.is_none() {
            return Err(ValidationError::MissingHelperProcess);
        }

        for (id, plugin) in &self.plugins {
            if plugin.executable.as_os_str().is_empty() {
                return Err(ValidationError::EmptyExecutable { id: id.clone() });
            }
        }

        if let Some(id) = &self.default_plugin {
            if !self.plugins.contains_key(id) {
                return Err(ValidationError::UnknownPlugin { id: id.clone() });
            }
        }

        Ok(())
    }

    /// Pick the plugin to launch: the command line wins over `default_plugin`.
    pub fn resolve_plugin<'a>(
        &'a self,
        cli_plugin: Option<&'a str>,
    ) -> Result<(&'a str, &'a PluginEntry), ValidationError> {
        let id = cli_plugin
            .or(self.default_plugin.as_deref())
            .ok_or(ValidationError::NoPluginSelected)?;
        let entry = self
            .plugins
            .get(id)
            .ok_or_else(|| ValidationError::UnknownPlugin { id: id.to_string() })?;
        Ok((id, entry))
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_console_enabled() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_source_name() -> String {
    "Media App".to_string()
}

fn default_probe_interval_ms() -> u64 {
    1_000
}

fn default_album_art_size() -> u32 {
    640
}

fn default_event_queue_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.max_log_files, 7);
        assert!(config.logging.console);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.media_app.probe_interval(), Duration::from_secs(1));
        assert_eq!(config.media_app.album_art_size, 640);
        assert_eq!(config.media_app.probe.kind, ProbeKind::Client);
    }

    #[test]
    fn invalid_version_rejected() {
        let mut config = Config::default();
        config.config_version = CURRENT_CONFIG_VERSION + 1;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn zero_probe_interval_rejected() {
        let mut config = Config::default();
        config.media_app.probe_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::NonPositive {
                field: "probe_interval_ms"
            })
        ));
    }

    #[test]
    fn process_probe_requires_both_process_names() {
        let mut config = Config::default();
        config.media_app.probe.kind = ProbeKind::Process;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingAppProcess)
        ));

        config.media_app.probe.app_process = Some("player".into());
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingHelperProcess)
        ));

        config.media_app.probe.helper_process = Some("player-helper".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_plugins_and_media_app_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
default_plugin = "media"

[plugins.media]
executable = "/usr/local/bin/media-app-source"
args = ["--verbose"]
request_timeout_ms = 250

[media_app]
name = "Jukebox"
probe_interval_ms = 500

[media_app.probe]
kind = "process"
app_process = "jukebox"
helper_process = "jukebox-helper"

[[media_app.simulation.library]]
title = "Intro"
artist = "Someone"
length_secs = 90
"#,
        )
        .expect("write config");

        let config = Config::load_from(&path).expect("config should load");
        let (id, entry) = config.resolve_plugin(None).expect("default plugin");
        assert_eq!(id, "media");
        assert_eq!(entry.args, vec!["--verbose".to_string()]);
        assert_eq!(entry.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.media_app.name, "Jukebox");
        assert_eq!(config.media_app.probe.kind, ProbeKind::Process);
        assert_eq!(config.media_app.simulation.library.len(), 1);
        assert_eq!(config.media_app.simulation.library[0].album, None);
    }

    #[test]
    fn default_plugin_must_exist() {
        let mut config = Config::default();
        config.default_plugin = Some("missing".into());
        assert!(matches!(
            config.validate(),
            Err(ValidationError::UnknownPlugin { .. })
        ));
    }

    #[test]
    fn cli_plugin_overrides_default() {
        let mut config = Config::default();
        for id in ["a", "b"] {
            config.plugins.insert(
                id.to_string(),
                PluginEntry {
                    executable: PathBuf::from(format!("/bin/{id}")),
                    args: Vec::new(),
                    working_dir: None,
                    env: BTreeMap::new(),
                    request_timeout_ms: default_request_timeout_ms(),
                },
            );
        }
        config.default_plugin = Some("a".into());

        let (id, _) = config.resolve_plugin(Some("b")).expect("cli plugin");
        assert_eq!(id, "b");
        assert!(matches!(
            config.resolve_plugin(Some("c")),
            Err(ValidationError::UnknownPlugin { .. })
        ));
    }

    #[test]
    fn missing_selection_is_reported() {
        let config = Config::default();
        assert!(matches!(
            config.resolve_plugin(None),
            Err(ValidationError::NoPluginSelected)
        ));
    }
}
