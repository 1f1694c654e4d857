pub mod config;
pub mod logging;
pub mod paths;

pub use config::{
    Config, ConfigError, LogLevel, LoggingConfig, MediaAppConfig, PluginEntry, ProbeConfig,
    ProbeKind, SimulatedTrack, SimulationConfig, ValidationError,
};
pub use logging::{init_logging, LoggingError, LoggingGuard, LOG_ENV_VAR};
pub use paths::{AppDirs, DirsError};

pub const APP_NAME: &str = "audiolink";
pub const APP_AUTHOR: &str = "Audiolink";
pub const APP_QUALIFIER: &str = "io";
