// =============================================================================
// System State - the single owned mutable state of the daemon
// =============================================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Most-recent-N human readable event strings kept for the display surface.
pub const MESSAGE_LOG_CAPACITY: usize = 10;

/// Progress of an in-flight timed action. Display only, never authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    pub max: u64,
    pub value: u64,
    pub label: String,
}

/// Outcome of a QSO-start observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QsoStart {
    /// A fresh QSO opened.
    Started,
    /// Mid-QSO partner change; the start timestamp is kept.
    PartnerChanged { previous: String },
    /// Same partner seen again; keeps the QSO alive.
    Continued,
}

/// Outcome of the hourly break check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakArm {
    /// Armed immediately; fires at the next post-QSO transition.
    Armed,
    /// The hour elapsed mid-QSO; deferred until that QSO finishes.
    Deferred,
}

#[derive(Debug)]
pub struct SystemState {
    /// Operator has turned the automation on.
    pub enabled: bool,
    /// Last known transmit state, from actuation or the status feed.
    pub tx_enabled: bool,
    pub qso_partner: Option<String>,
    pub qso_started_at: Option<Instant>,
    /// Most recently completed contact, kept after the active QSO clears.
    pub last_qso_partner: Option<String>,
    /// Reset whenever TX is (re)enabled or a QSO starts/ends.
    pub last_activity: Instant,
    /// Reset each time the hourly-break cycle completes.
    pub script_epoch: Instant,
    pub break_pending: bool,
    pub break_armed: bool,
    /// True only during the deliberate post-QSO quiet window.
    pub forced_tx_off: bool,
    /// A CQ announcement from our own callsign was observed.
    pub cq_active: bool,
    pub countdown: Option<Countdown>,
    messages: VecDeque<String>,
    last_finish_at: Option<Instant>,
}

impl SystemState {
    pub fn new(now: Instant) -> Self {
        Self {
            enabled: false,
            tx_enabled: false,
            qso_partner: None,
            qso_started_at: None,
            last_qso_partner: None,
            last_activity: now,
            script_epoch: now,
            break_pending: false,
            break_armed: false,
            forced_tx_off: false,
            cq_active: false,
            countdown: None,
            messages: VecDeque::with_capacity(MESSAGE_LOG_CAPACITY),
            last_finish_at: None,
        }
    }

    /// Append a timestamped message, evicting the oldest past capacity.
    pub fn add_message(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        log::info!("{}", msg);
        if self.messages.len() == MESSAGE_LOG_CAPACITY {
            self.messages.pop_front();
        }
        self.messages
            .push_back(format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), msg));
    }

    pub fn qso_active(&self) -> bool {
        self.qso_partner.is_some()
    }

    /// TX state observed on the wire. A false-to-true edge counts as
    /// activity.
    pub fn note_tx_observed(&mut self, enabled: bool, now: Instant) {
        if enabled && !self.tx_enabled {
            self.last_activity = now;
        }
        self.tx_enabled = enabled;
    }

    /// A "<owncall> <partner>" exchange was observed.
    pub fn begin_qso(&mut self, partner: &str, now: Instant) -> QsoStart {
        self.last_activity = now;
        match self.qso_partner.as_deref() {
            Some(current) if current == partner => QsoStart::Continued,
            Some(_) => {
                // Partner change mid-QSO keeps the original start time.
                let previous = self.qso_partner.replace(partner.to_string());
                QsoStart::PartnerChanged {
                    previous: previous.unwrap_or_default(),
                }
            }
            None => {
                self.qso_partner = Some(partner.to_string());
                self.qso_started_at = Some(now);
                QsoStart::Started
            }
        }
    }

    /// A completion marker was observed. Returns the partner label for the
    /// finished contact, or None when the match falls inside the debounce
    /// window of a previous finish.
    pub fn finish_qso(&mut self, now: Instant, debounce: Duration) -> Option<String> {
        if let Some(last) = self.last_finish_at {
            if now.duration_since(last) < debounce {
                return None;
            }
        }
        self.last_finish_at = Some(now);

        let label = match self.qso_partner.take() {
            Some(partner) => {
                self.last_qso_partner = Some(partner.clone());
                partner
            }
            None => "Unknown".to_string(),
        };
        self.qso_started_at = None;
        self.last_activity = now;
        Some(label)
    }

    /// Drop an abandoned QSO without going through the finish path.
    pub fn abandon_qso(&mut self) -> Option<String> {
        self.qso_started_at = None;
        self.qso_partner.take()
    }

    /// Hourly break check. Arms (or defers, mid-QSO) once per cycle.
    pub fn arm_break_if_due(&mut self, now: Instant, break_after: Duration) -> Option<BreakArm> {
        if self.break_armed || self.break_pending {
            return None;
        }
        if now.duration_since(self.script_epoch) <= break_after {
            return None;
        }
        if self.qso_active() {
            self.break_pending = true;
            Some(BreakArm::Deferred)
        } else {
            self.break_armed = true;
            Some(BreakArm::Armed)
        }
    }

    /// Close out a completed break cycle.
    pub fn complete_break(&mut self, now: Instant) {
        self.script_epoch = now;
        self.break_armed = false;
        self.break_pending = false;
    }

    /// True when an open QSO has gone quiet past the ceiling.
    pub fn idle_qso_expired(&self, now: Instant, ceiling: Duration) -> bool {
        self.qso_active() && now.duration_since(self.last_activity) > ceiling
    }

    /// True when the enforcement watchdog should re-issue TX enable.
    ///
    /// Suppressed during the deliberate post-QSO quiet window and while a
    /// break is armed or pending; those two conditions are never set at
    /// the same time.
    pub fn tx_enforcement_due(&self) -> bool {
        self.enabled
            && !self.tx_enabled
            && !self.forced_tx_off
            && !self.break_armed
            && !self.break_pending
    }

    pub fn snapshot(&self, now: Instant) -> StatusSnapshot {
        let qso_timer_str = if self.enabled {
            let elapsed = now.duration_since(self.last_activity).as_secs();
            format!("Last QSO: {}m {}s", elapsed / 60, elapsed % 60)
        } else {
            String::new()
        };
        StatusSnapshot {
            enabled: self.enabled,
            tx: self.tx_enabled,
            qso_partner: self.qso_partner.clone(),
            last_qso_partner: self.last_qso_partner.clone(),
            messages: self.messages.iter().cloned().collect(),
            countdown_active: self.countdown.is_some(),
            countdown_max: self.countdown.as_ref().map(|c| c.max).unwrap_or(0),
            countdown_value: self.countdown.as_ref().map(|c| c.value).unwrap_or(0),
            countdown_label: self
                .countdown
                .as_ref()
                .map(|c| c.label.clone())
                .unwrap_or_default(),
            qso_timer_str,
        }
    }

    #[cfg(test)]
    pub fn messages(&self) -> Vec<String> {
        self.messages.iter().cloned().collect()
    }
}

/// Snapshot serialized for the display surface, field-compatible with the
/// status file the CGI front end has always read.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub enabled: bool,
    pub tx: bool,
    pub qso_partner: Option<String>,
    pub last_qso_partner: Option<String>,
    pub messages: Vec<String>,
    pub countdown_active: bool,
    pub countdown_max: u64,
    pub countdown_value: u64,
    pub countdown_label: String,
    pub qso_timer_str: String,
}
