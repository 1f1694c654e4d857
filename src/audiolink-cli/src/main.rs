use anyhow::{Context, Result};
use audiolink_core::{init_logging, AppDirs, Config, PluginEntry};
use audiolink_plugin::{AudioSource, AudioSourceCallback, ExecAudioSource, PluginConfig, TrackInfo};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "audiolink", version, about = "Host for out-of-process audio source plugins")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plugin management commands
    #[command(subcommand)]
    Plugins(PluginsCommand),
    /// Start a plugin, activate it and print its notifications until Ctrl-C
    Run(RunCommand),
    /// Send one transport command through a plugin
    Control(ControlCommand),
}

#[derive(Debug, Subcommand)]
enum PluginsCommand {
    /// List configured plugins
    List,
}

#[derive(Debug, Parser, Clone)]
struct RunCommand {
    /// Plugin id (defaults to `default_plugin` from config)
    plugin: Option<String>,
    /// Liveness ping interval in milliseconds
    #[arg(long, default_value_t = 2_000)]
    ping_interval_ms: u64,
}

#[derive(Debug, Parser, Clone)]
struct ControlCommand {
    /// Plugin id
    plugin: String,
    /// Transport command to send
    #[arg(value_enum)]
    action: ControlAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ControlAction {
    Play,
    Pause,
    Next,
    Previous,
}

impl ControlAction {
    fn apply(self, source: &dyn AudioSource) -> audiolink_plugin::SourceResult<()> {
        match self {
            ControlAction::Play => source.play_track(),
            ControlAction::Pause => source.pause_track(),
            ControlAction::Next => source.next_track(),
            ControlAction::Previous => source.previous_track(),
        }
    }
}

#[derive(Debug, Error)]
enum HostError {
    #[error("plugin '{id}' stopped answering: {message}")]
    PluginUnresponsive { id: String, message: String },
}

/// Prints every notification a plugin raises.
struct PrintingCallback;

impl PrintingCallback {
    fn describe_track(info: &TrackInfo) -> String {
        if info.is_empty() {
            return "(nothing playing)".to_string();
        }
        let art = info
            .album_art
            .as_ref()
            .map(|bytes| format!(" [art: {} bytes]", bytes.len()))
            .unwrap_or_default();
        format!("{} - {}{}", info.artist, info.title, art)
    }

    fn describe_progress(percent: f64) -> String {
        format!("{:.1}%", percent.clamp(0.0, 100.0))
    }
}

impl AudioSourceCallback for PrintingCallback {
    fn track_info_changed(&self, info: TrackInfo) {
        println!("track    {}", Self::describe_track(&info));
    }

    fn track_playing(&self) {
        println!("state    playing");
    }

    fn track_paused(&self) {
        println!("state    paused");
    }

    fn track_progress_changed(&self, percent: f64) {
        println!("progress {}", Self::describe_progress(percent));
    }
}

fn launch(id: &str, entry: &PluginEntry) -> Result<ExecAudioSource> {
    let source = ExecAudioSource::new(PluginConfig::from(entry), Arc::new(PrintingCallback))
        .with_context(|| format!("failed to start plugin '{id}'"))?;
    tracing::info!(plugin = %id, name = %source.name(), "plugin started");
    Ok(source)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    let config = Config::load_or_default(&dirs)?;
    let _logging = init_logging(&config.logging, &dirs)?;

    match cli.command {
        Command::Plugins(PluginsCommand::List) => print_plugins(&config),
        Command::Run(run) => {
            let (id, entry) = config.resolve_plugin(run.plugin.as_deref())?;
            let source = Arc::new(launch(id, entry)?);
            let runtime = tokio::runtime::Runtime::new()?;
            let outcome = runtime.block_on(run_until_interrupted(
                id.to_string(),
                Arc::clone(&source),
                Duration::from_millis(run.ping_interval_ms.max(1)),
            ));
            if let Err(err) = source.deactivate() {
                tracing::warn!(error = %err, "deactivate failed");
            }
            source.stop()?;
            outcome?;
        }
        Command::Control(control) => {
            let (id, entry) = config.resolve_plugin(Some(control.plugin.as_str()))?;
            let source = launch(id, entry)?;
            source.activate()?;
            control.action.apply(&source)?;
            source.deactivate()?;
            source.stop()?;
            println!("sent {:?} to '{id}'", control.action);
        }
    }

    Ok(())
}

/// Activate, then ping the plugin until Ctrl-C or until it stops answering.
async fn run_until_interrupted(
    id: String,
    source: Arc<ExecAudioSource>,
    ping_interval: Duration,
) -> Result<()> {
    let activating = Arc::clone(&source);
    tokio::task::spawn_blocking(move || activating.activate()).await??;
    println!("'{}' active, press Ctrl-C to stop", source.name());

    let mut interval = tokio::time::interval(ping_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(plugin = %id, "received Ctrl-C, shutting down");
                return Ok(());
            }
            _ = interval.tick() => {
                let pinging = Arc::clone(&source);
                let alive = tokio::task::spawn_blocking(move || pinging.is_alive()).await?;
                if let Err(err) = alive {
                    return Err(HostError::PluginUnresponsive {
                        id,
                        message: err.to_string(),
                    }
                    .into());
                }
            }
        }
    }
}

fn print_plugins(config: &Config) {
    if config.plugins.is_empty() {
        println!("No plugins configured. Set plugins.<id> in config.toml.");
        return;
    }

    for (id, plugin) in &config.plugins {
        let default_marker = if config.default_plugin.as_deref() == Some(id.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("Plugin: {}{}", id, default_marker);
        println!("  executable: {}", plugin.executable.display());
        if !plugin.args.is_empty() {
            println!("  args: {}", plugin.args.join(" "));
        }
        println!("  request timeout: {} ms", plugin.request_timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_parses_actions() {
        let cli = Cli::try_parse_from(["audiolink", "control", "media-app", "next"])
            .expect("control should parse");
        match cli.command {
            Command::Control(control) => {
                assert_eq!(control.plugin, "media-app");
                assert_eq!(control.action, ControlAction::Next);
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(Cli::try_parse_from(["audiolink", "control", "media-app", "rewind"]).is_err());
    }

    #[test]
    fn run_plugin_is_optional() {
        let cli = Cli::try_parse_from(["audiolink", "run"]).expect("run should parse");
        match cli.command {
            Command::Run(run) => {
                assert_eq!(run.plugin, None);
                assert_eq!(run.ping_interval_ms, 2_000);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn track_description() {
        assert_eq!(
            PrintingCallback::describe_track(&TrackInfo::empty()),
            "(nothing playing)"
        );
        let info = TrackInfo {
            title: "Song".into(),
            artist: "Artist".into(),
            album_art: Some(vec![0; 3]),
        };
        assert_eq!(
            PrintingCallback::describe_track(&info),
            "Artist - Song [art: 3 bytes]"
        );
    }

    #[test]
    fn progress_is_clamped_for_display() {
        assert_eq!(PrintingCallback::describe_progress(25.0), "25.0%");
        assert_eq!(PrintingCallback::describe_progress(130.0), "100.0%");
        assert_eq!(PrintingCallback::describe_progress(-3.0), "0.0%");
    }
}
