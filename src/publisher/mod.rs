//! Status publishing and operator commands.
//!
//! The 1 Hz worker the display surface talks to: writes the JSON snapshot
//! to the status file and consumes `enable` / `disable` / `quit` from the
//! command file, deleting it after each read so duplicate delivery is
//! harmless. Steady-state I/O errors skip the cycle and never kill the
//! worker.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::daemon::AutoQso;

/// Truncate both files at startup so a stale snapshot or a leftover command
/// never survives a restart.
pub async fn clear_files(status_path: &Path, command_path: &Path) {
    for path in [status_path, command_path] {
        if let Err(e) = tokio::fs::write(path, b"").await {
            log::warn!("Failed to clear {}: {}", path.display(), e);
        }
    }
}

/// Publish the snapshot and poll for commands, once per second.
pub async fn run(daemon: AutoQso, shutdown: Arc<Notify>) {
    let status_path = daemon.config().status_path.clone();
    let command_path = daemon.config().command_path.clone();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        publish_status(&daemon, &status_path).await;
        poll_command(&daemon, &command_path, &shutdown).await;
    }
}

async fn publish_status(daemon: &AutoQso, path: &Path) {
    let snapshot = daemon.snapshot();
    let json = match serde_json::to_vec(&snapshot) {
        Ok(json) => json,
        Err(e) => {
            log::warn!("Failed to serialize status: {}", e);
            return;
        }
    };
    if let Err(e) = tokio::fs::write(path, json).await {
        log::warn!("Failed to write status file: {}", e);
    }
}

async fn poll_command(daemon: &AutoQso, path: &Path, shutdown: &Notify) {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            log::warn!("Failed to read command file: {}", e);
            return;
        }
    };
    if let Err(e) = tokio::fs::remove_file(path).await {
        log::warn!("Failed to remove command file: {}", e);
    }
    match contents.trim() {
        "" => {}
        "enable" => daemon.request_enable(),
        "disable" => daemon.request_disable(),
        "quit" => {
            log::info!("Quit requested via command file");
            shutdown.notify_one();
        }
        other => log::warn!("Ignoring unknown command '{}'", other),
    }
}
