use crate::{config::LoggingConfig, paths::AppDirs};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "audiolink.log";

/// Overrides `logging.level` when set, using `EnvFilter` directive syntax.
pub const LOG_ENV_VAR: &str = "AUDIOLINK_LOG";

/// Keeps the non-blocking file writer flushing until dropped.
pub struct LoggingGuard {
    _worker: WorkerGuard,
    log_file: PathBuf,
}

impl LoggingGuard {
    /// Base path of the active log file; the appender adds a date suffix.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// Install the global subscriber.
///
/// Logs always go to a daily rolling file under the log directory. With
/// `console = true` they are mirrored to stderr. Stdout is never written: the
/// host CLI prints notifications there and plugin processes speak the wire
/// protocol on it.
pub fn init_logging(config: &LoggingConfig, dirs: &AppDirs) -> Result<LoggingGuard, LoggingError> {
    let log_dir = dirs.log_dir();
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDirectory {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let directive = std::env::var(LOG_ENV_VAR)
        .unwrap_or_else(|_| config.level.as_filter_directive().to_string());
    let filter = parse_filter(&directive)?;

    let file_stem = config.file_name.as_deref().unwrap_or(DEFAULT_LOG_FILE);
    let pruned = prune_rotated_logs(log_dir, file_stem, config.max_log_files.max(1))?;

    let appender = tracing_appender::rolling::daily(log_dir, file_stem);
    let (file, worker) = tracing_appender::non_blocking(appender);
    let writer = if config.console {
        BoxMakeWriter::new(file.and(std::io::stderr))
    } else {
        BoxMakeWriter::new(file)
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(LoggingError::SubscriberInstall)?;

    let log_file = log_dir.join(file_stem);
    tracing::debug!(file = %log_file.display(), pruned, "logging initialised");
    Ok(LoggingGuard {
        _worker: worker,
        log_file,
    })
}

fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|source| LoggingError::Filter {
        directive: directive.to_string(),
        source,
    })
}

/// Delete all but the newest `keep` rotated files of `file_stem`.
///
/// Rotated files are named `<stem>.<YYYY-MM-DD>`, so name order is age order.
fn prune_rotated_logs(dir: &Path, file_stem: &str, keep: usize) -> Result<usize, LoggingError> {
    let prefix = format!("{file_stem}.");
    let entries = fs::read_dir(dir).map_err(|source| LoggingError::Prune {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut rotated: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let suffix = name.strip_prefix(&prefix)?;
            (!suffix.is_empty()).then(|| (name.clone(), entry.path()))
        })
        .collect();
    if rotated.len() <= keep {
        return Ok(0);
    }

    rotated.sort();
    let excess = rotated.len() - keep;
    for (_, path) in rotated.drain(..excess) {
        fs::remove_file(&path).map_err(|source| LoggingError::Prune { path, source })?;
    }
    Ok(excess)
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid log filter {directive:?}: {source}")]
    Filter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInstall(Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to prune old logs at {path}: {source}")]
    Prune {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn level_directives_parse() {
        for level in [LogLevel::Trace, LogLevel::Info, LogLevel::Error] {
            assert!(parse_filter(level.as_filter_directive()).is_ok());
        }
        assert!(parse_filter("audiolink_plugin=debug,warn").is_ok());
        assert!(matches!(
            parse_filter("audiolink=loud"),
            Err(LoggingError::Filter { .. })
        ));
    }

    #[test]
    fn pruning_keeps_newest_rotations() {
        let dir = tempfile::tempdir().expect("tempdir");
        for day in 1..=4 {
            fs::write(dir.path().join(format!("{DEFAULT_LOG_FILE}.2026-01-0{day}")), "")
                .expect("create log");
        }
        fs::write(dir.path().join(DEFAULT_LOG_FILE), "").expect("write base");
        fs::write(dir.path().join("media-app-source.log.2026-01-01"), "").expect("write other");

        let pruned = prune_rotated_logs(dir.path(), DEFAULT_LOG_FILE, 2).expect("prune");
        assert_eq!(pruned, 2);

        let mut remaining: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                DEFAULT_LOG_FILE.to_string(),
                format!("{DEFAULT_LOG_FILE}.2026-01-03"),
                format!("{DEFAULT_LOG_FILE}.2026-01-04"),
                "media-app-source.log.2026-01-01".to_string(),
            ]
        );

        assert_eq!(
            prune_rotated_logs(dir.path(), DEFAULT_LOG_FILE, 2).expect("prune again"),
            0
        );
    }
}
