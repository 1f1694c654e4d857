//! Is the target application up?

use crate::client::MediaClient;
use std::io;
use std::sync::Arc;

/// Presence check for the target application and its helper process.
///
/// Implementations never fail: anything that goes wrong while asking counts
/// as "not running", and the supervisor simply asks again on its next tick.
pub trait TargetProbe: Send + Sync {
    fn is_target_running(&self) -> bool;
}

/// Asks the media client itself.
pub struct ClientProbe {
    client: Arc<dyn MediaClient>,
}

impl ClientProbe {
    pub fn new(client: Arc<dyn MediaClient>) -> Self {
        Self { client }
    }
}

impl TargetProbe for ClientProbe {
    fn is_target_running(&self) -> bool {
        let running = self
            .client
            .is_running()
            .and_then(|app| Ok(app && self.client.is_helper_running()?));
        match running {
            Ok(running) => running,
            Err(err) => {
                tracing::debug!(error = %err, "presence query failed, treating as not running");
                false
            }
        }
    }
}

/// Looks the application and helper up in the OS process table.
#[derive(Debug, Clone)]
pub struct ProcessProbe {
    app: String,
    helper: String,
}

impl ProcessProbe {
    pub fn new(app: impl Into<String>, helper: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            helper: helper.into(),
        }
    }
}

impl TargetProbe for ProcessProbe {
    fn is_target_running(&self) -> bool {
        let names = match running_process_names() {
            Ok(names) => names,
            Err(err) => {
                tracing::debug!(error = %err, "process listing failed, treating as not running");
                return false;
            }
        };

        contains_process(&names, &self.app) && contains_process(&names, &self.helper)
    }
}

fn normalize(name: &str) -> String {
    let name = name.trim().to_ascii_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

/// Linux truncates `comm` to 15 bytes, so a 15 byte entry matches any target
/// it is a prefix of.
const COMM_MAX: usize = 15;

fn contains_process(names: &[String], target: &str) -> bool {
    let target = normalize(target);
    names.iter().map(|n| normalize(n)).any(|name| {
        name == target || (name.len() == COMM_MAX && target.starts_with(&name))
    })
}

#[cfg(target_os = "linux")]
fn running_process_names() -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let entry = entry?;
        let is_pid = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()));
        if !is_pid {
            continue;
        }
        // processes can exit between listing and reading
        if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
            names.push(comm.trim_end().to_string());
        }
    }
    Ok(names)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn running_process_names() -> io::Result<Vec<String>> {
    let output = std::process::Command::new("ps")
        .args(["-A", "-o", "comm="])
        .output()?;
    if !output.status.success() {
        return Err(io::Error::new(io::ErrorKind::Other, "ps exited with failure"));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| {
            let line = line.trim();
            line.rsplit('/').next().unwrap_or(line).to_string()
        })
        .collect())
}

#[cfg(windows)]
fn running_process_names() -> io::Result<Vec<String>> {
    let output = std::process::Command::new("tasklist")
        .args(["/fo", "csv", "/nh"])
        .output()?;
    if !output.status.success() {
        return Err(io::Error::new(io::ErrorKind::Other, "tasklist exited with failure"));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.split(',').next())
        .map(|field| field.trim_matches('"').to_string())
        .collect())
}

#[cfg(not(any(unix, windows)))]
fn running_process_names() -> io::Result<Vec<String>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process listing is not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedClient;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn matching_ignores_case_and_exe_suffix() {
        let list = names(&["Player.exe", "init"]);
        assert!(contains_process(&list, "player"));
        assert!(contains_process(&list, "PLAYER.EXE"));
        assert!(!contains_process(&list, "helper"));
    }

    #[test]
    fn truncated_comm_matches_long_names() {
        let list = names(&["playerwebhelpe"]);
        assert!(!contains_process(&list, "playerwebhelper"));

        let list = names(&["playerwebhelper"]);
        assert!(contains_process(&list, "playerwebhelperprocess"));
    }

    #[test]
    fn client_probe_requires_helper() {
        let client = Arc::new(SimulatedClient::new(Vec::new()));
        let probe = ClientProbe::new(client.clone());
        assert!(probe.is_target_running());

        client.set_helper_running(false);
        assert!(!probe.is_target_running());

        client.set_helper_running(true);
        client.set_running(false);
        assert!(!probe.is_target_running());
    }

    #[test]
    fn client_probe_errors_mean_not_running() {
        let client = Arc::new(SimulatedClient::new(Vec::new()));
        client.fail_presence_queries(true);
        assert!(!ClientProbe::new(client).is_target_running());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn process_probe_finds_current_process() {
        let me = std::fs::read_to_string("/proc/self/comm").expect("own comm");
        let me = me.trim_end();
        let probe = ProcessProbe::new(me, me);
        assert!(probe.is_target_running());

        let probe = ProcessProbe::new(me, "no-such-helper-process");
        assert!(!probe.is_target_running());

        let probe = ProcessProbe::new("no-such-app-process", me);
        assert!(!probe.is_target_running());
    }
}
