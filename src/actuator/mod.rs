//! Actuator boundary.
//!
//! The daemon never touches the controlled application directly; everything
//! physical goes through [`ActuatorPort`]. The production implementation
//! ([`KeystrokeActuator`]) focuses the JTDX / WSJT-X window and injects the
//! Alt-key accelerators; tests substitute a recording mock.

use async_trait::async_trait;
use thiserror::Error;

mod keystroke;

pub use keystroke::KeystrokeActuator;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("no JTDX / WSJT-X window found")]
    WindowNotFound,
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}")]
    CommandFailed {
        command: &'static str,
        status: std::process::ExitStatus,
    },
}

/// The four physical actions the daemon can request.
///
/// Each call carries an intent, not a guaranteed outcome: enable-TX and
/// disable-TX are the same physical toggle in the controlled application,
/// so callers check believed state before invoking (the idempotence rule).
#[async_trait]
pub trait ActuatorPort: Send + Sync {
    /// Arm the CQ call (Alt-6).
    async fn enable_cq(&self) -> Result<(), ActuatorError>;
    /// Toggle Enable TX on (Alt-N).
    async fn enable_tx(&self) -> Result<(), ActuatorError>;
    /// Toggle Enable TX off (Alt-N).
    async fn disable_tx(&self) -> Result<(), ActuatorError>;
    /// Halt any transmission in progress (Alt-H).
    async fn halt_tx(&self) -> Result<(), ActuatorError>;
}
