use anyhow::{Context, Result};
use audiolink_core::{init_logging, AppDirs, Config};
use audiolink_plugin::{
    serve, AudioSource, MessageWriter, NotificationForwarder, PluginInfo, PROTOCOL_VERSION,
};
use clap::Parser;
use media_app_source::{MediaAppSource, SimulatedClient, PLUGIN_ID};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const LOG_FILE: &str = "media-app-source.log";

/// Advance rate of the simulated application's play head.
const CLOCK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(
    name = "media-app-source",
    version,
    about = "Audio source plugin for a local media application (speaks the plugin protocol on stdio)"
)]
struct Cli {
    /// Config file to read instead of the one in the config directory
    #[arg(long)]
    config: Option<PathBuf>,
    /// Keep config, data and logs under this directory
    #[arg(long)]
    root: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = match &cli.root {
        Some(root) => AppDirs::with_root(root),
        None => AppDirs::discover()?,
    };
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default(&dirs)?,
    };

    // stdout is the protocol channel; keep the terminal quiet too
    let mut logging = config.logging.clone();
    logging.console = false;
    logging.file_name = Some(LOG_FILE.to_string());
    let _logging = init_logging(&logging, &dirs)?;

    let client = SimulatedClient::from_config(&config.media_app.simulation);
    let _clock = client
        .start_clock(CLOCK_INTERVAL)
        .context("failed to start simulated application clock")?;

    let writer = MessageWriter::new(std::io::stdout());
    let callback = Arc::new(NotificationForwarder::new(writer.clone()));
    let source = Arc::new(MediaAppSource::from_config(
        &config.media_app,
        Arc::new(client),
        callback,
    )?);

    let info = PluginInfo {
        id: PLUGIN_ID.to_string(),
        name: source.name().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: PROTOCOL_VERSION,
    };
    tracing::info!(plugin = %info.id, name = %info.name, "serving on stdio");

    serve(source, info, std::io::stdin().lock(), writer)?;
    tracing::info!("plugin shut down");
    Ok(())
}
