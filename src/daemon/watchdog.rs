// Three independent periodic checks layered on the state machine. None of
// them share a loop; each ticks on its own interval and serializes with the
// others through the state lock. A tick that finds nothing to do is free,
// and a failed actuation is simply retried on a later tick.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::AutoQso;

/// Spawn all three watchdogs against the shared daemon handle.
pub fn spawn_all(daemon: &AutoQso) -> Vec<JoinHandle<()>> {
    let timing = &daemon.config().timing;
    vec![
        spawn_idle_watchdog(
            daemon.clone(),
            Duration::from_secs(timing.idle_watchdog_tick_secs),
        ),
        spawn_tx_watchdog(
            daemon.clone(),
            Duration::from_secs(timing.tx_watchdog_tick_secs),
        ),
        spawn_break_watchdog(
            daemon.clone(),
            Duration::from_secs(timing.break_watchdog_tick_secs),
        ),
    ]
}

/// Abandons a QSO that has gone quiet without a finish ever arriving.
fn spawn_idle_watchdog(daemon: AutoQso, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            daemon.check_idle_qso(Instant::now()).await;
        }
    })
}

/// Recovers from externally-caused TX drops while the system is enabled.
fn spawn_tx_watchdog(daemon: AutoQso, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            daemon.check_tx_enforcement().await;
        }
    })
}

/// Arms (or defers) the hourly break; the break itself only ever runs from
/// the post-QSO transition, never from this tick.
fn spawn_break_watchdog(daemon: AutoQso, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            daemon.check_break_schedule(Instant::now());
        }
    })
}
