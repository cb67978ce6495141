// Synthetic-keystroke actuator: wmctrl for window discovery and focus,
// xte for key injection, as the JTDX automation toolchain has always done.

use async_trait::async_trait;
use tokio::process::Command;

use super::{ActuatorError, ActuatorPort};

pub struct KeystrokeActuator;

impl KeystrokeActuator {
    pub fn new() -> Self {
        Self
    }

    /// Find the window id of the first JTDX / WSJT-X window.
    async fn find_window(&self) -> Result<String, ActuatorError> {
        let output = Command::new("wmctrl")
            .arg("-lx")
            .output()
            .await
            .map_err(|source| ActuatorError::Spawn {
                command: "wmctrl",
                source,
            })?;
        if !output.status.success() {
            return Err(ActuatorError::CommandFailed {
                command: "wmctrl",
                status: output.status,
            });
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        for line in listing.lines() {
            // wmctrl -lx: id, desktop, wm_class, host, title...
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                continue;
            }
            let title = fields[4..].join(" ").to_ascii_uppercase();
            if title.contains("JTDX") || title.contains("WSJT-X") {
                return Ok(fields[0].to_string());
            }
        }
        Err(ActuatorError::WindowNotFound)
    }

    /// Focus the application window and send Alt+<key>.
    async fn send_alt(&self, key: &str) -> Result<(), ActuatorError> {
        let wid = self.find_window().await?;
        run("wmctrl", &["-ia", &wid]).await?;
        let key_arg = format!("key {}", key);
        run("xte", &["keydown Alt_L", &key_arg, "keyup Alt_L"]).await?;
        log::debug!("Sent Alt-{} to window {}", key, wid);
        Ok(())
    }
}

impl Default for KeystrokeActuator {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(command: &'static str, args: &[&str]) -> Result<(), ActuatorError> {
    let status = Command::new(command)
        .args(args)
        .status()
        .await
        .map_err(|source| ActuatorError::Spawn { command, source })?;
    if status.success() {
        Ok(())
    } else {
        Err(ActuatorError::CommandFailed { command, status })
    }
}

#[async_trait]
impl ActuatorPort for KeystrokeActuator {
    async fn enable_cq(&self) -> Result<(), ActuatorError> {
        self.send_alt("6").await
    }

    async fn enable_tx(&self) -> Result<(), ActuatorError> {
        self.send_alt("n").await
    }

    async fn disable_tx(&self) -> Result<(), ActuatorError> {
        self.send_alt("n").await
    }

    async fn halt_tx(&self) -> Result<(), ActuatorError> {
        self.send_alt("h").await
    }
}
