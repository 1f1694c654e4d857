//! Drives the real plugin executable through the host-side proxy.

use audiolink_plugin::{
    run_audio_source_contract, AudioSource, AudioSourceContractExpectations, ExecAudioSource,
    PluginConfig, RecordedEvent, RecordingCallback, TrackInfo,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

/// A scratch root with a config whose simulated application is "running"
/// only while `presence` exists.
fn plugin_root() -> (TempDir, PathBuf) {
    let root = tempfile::tempdir().expect("tempdir");
    let presence = root.path().join("media-app.running");
    let config_dir = root.path().join("config");
    fs::create_dir_all(&config_dir).expect("config dir");
    fs::write(
        config_dir.join("config.toml"),
        format!(
            r#"config_version = 1

[logging]
level = "debug"

[media_app]
name = "Media App"
probe_interval_ms = 50

[media_app.simulation]
presence_file = '{}'
"#,
            presence.display()
        ),
    )
    .expect("write config");
    (root, presence)
}

fn launch(root: &Path, callback: Arc<RecordingCallback>) -> ExecAudioSource {
    let config = PluginConfig {
        executable: PathBuf::from(env!("CARGO_BIN_EXE_media-app-source")),
        args: vec!["--root".into(), root.display().to_string()],
        working_dir: None,
        env: Vec::new(),
        request_timeout: Duration::from_secs(10),
    };
    ExecAudioSource::new(config, callback).expect("plugin should start")
}

#[test]
fn handshake_reports_identity() {
    let (root, _presence) = plugin_root();
    let source = launch(root.path(), Arc::new(RecordingCallback::new()));

    assert_eq!(source.id(), "media-app");
    assert_eq!(source.name(), "Media App");
    source.is_alive().expect("ping");
    source.stop().expect("stop");
    assert!(!source.is_running());
}

#[test]
fn activate_without_application_resets_before_returning() {
    let (root, _presence) = plugin_root();
    let callback = Arc::new(RecordingCallback::new());
    let source = launch(root.path(), callback.clone());

    source.activate().expect("activate");
    assert_eq!(callback.events(), RecordedEvent::reset_triple());

    // nothing to control yet
    source.play_track().expect("play");
    source.next_track().expect("next");
    source.deactivate().expect("deactivate");
    source.stop().expect("stop");
}

#[test]
fn application_appearing_is_picked_up() {
    let (root, presence) = plugin_root();
    let callback = Arc::new(RecordingCallback::new());
    let source = launch(root.path(), callback.clone());

    source.activate().expect("activate");
    callback.take();

    fs::write(&presence, "").expect("presence file");
    assert!(callback.wait_for(3, WAIT), "snapshot should arrive");
    let snapshot = callback.take();
    assert_eq!(snapshot[0], RecordedEvent::Progress(0.0));
    assert_eq!(
        snapshot[1],
        RecordedEvent::TrackInfo(TrackInfo {
            title: "Signal Path".into(),
            artist: "The Oscillators".into(),
            album_art: Some(b"art:Signal Path:640".to_vec()),
        })
    );
    assert_eq!(snapshot[2], RecordedEvent::Paused);

    source.play_track().expect("play");
    assert!(callback.wait_for(1, WAIT));
    assert_eq!(callback.events()[0], RecordedEvent::Playing);

    fs::remove_file(&presence).expect("remove presence file");
    let deadline = std::time::Instant::now() + WAIT;
    loop {
        let events = callback.events();
        if events.ends_with(&RecordedEvent::reset_triple()) {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "reset never arrived");
        std::thread::sleep(Duration::from_millis(20));
    }

    source.deactivate().expect("deactivate");
    source.stop().expect("stop");
}

#[test]
fn plugin_process_passes_the_contract() {
    let (root, _presence) = plugin_root();
    let source = launch(root.path(), Arc::new(RecordingCallback::new()));

    let expectations = AudioSourceContractExpectations {
        name: "Media App".into(),
    };
    if let Err(e) = run_audio_source_contract(&source, &expectations) {
        panic!("Contract test failed: {}", e);
    }
    source.stop().expect("stop");
}
