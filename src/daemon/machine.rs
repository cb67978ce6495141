// =============================================================================
// QSO daemon - consumes decoded status events and drives the actuator
// =============================================================================

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinHandle;

use crate::actuator::ActuatorPort;
use crate::config::Config;
use crate::udp::wsjtx;

use super::state::{BreakArm, Countdown, QsoStart, StatusSnapshot, SystemState};

/// Shared handle to the daemon. Cheap to clone; every worker holds one.
#[derive(Clone)]
pub struct AutoQso {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    state: Mutex<SystemState>,
    actuator: Arc<dyn ActuatorPort>,
    /// The controlled application accepts one synthetic keystroke at a time.
    actuation: tokio::sync::Mutex<()>,
    /// In-flight cooldown / enable / disable worker, aborted on operator
    /// override.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AutoQso {
    pub fn new(config: Config, actuator: Arc<dyn ActuatorPort>) -> Self {
        let mut state = SystemState::new(Instant::now());
        state.add_message("System started in daemon mode. Use the control surface to enable.");
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                actuator,
                actuation: tokio::sync::Mutex::new(()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, SystemState> {
        self.inner.state.lock().unwrap()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().snapshot(Instant::now())
    }

    // -------------------------------------------------------------------------
    // Inbound events
    // -------------------------------------------------------------------------

    /// Feed one UDP datagram through the decoder and the text scanner.
    /// Must never block beyond the state lock; slow work is spawned.
    pub fn handle_datagram(&self, data: &[u8]) {
        let now = Instant::now();

        if let Some(frame) = wsjtx::decode_status(data) {
            self.lock().note_tx_observed(frame.tx_enabled, now);
        }

        let event = wsjtx::scan_text(
            data,
            &self.inner.config.callsign,
            &self.inner.config.mode_tag,
        );
        if event.is_empty() {
            return;
        }

        if event.cq {
            let mut st = self.lock();
            if !st.cq_active {
                st.cq_active = true;
                st.add_message("CQ from our own call observed.");
            }
        }
        if let Some(partner) = &event.qso_start {
            self.on_qso_start(partner, now);
        }
        if event.finished {
            self.on_qso_finish(now);
        }
    }

    fn on_qso_start(&self, partner: &str, now: Instant) {
        let mut st = self.lock();
        match st.begin_qso(partner, now) {
            QsoStart::Started => st.add_message(format!("QSO started with {}.", partner)),
            QsoStart::PartnerChanged { previous } => st.add_message(format!(
                "QSO partner changed: now working {} (was {}).",
                partner, previous
            )),
            QsoStart::Continued => {}
        }
    }

    fn on_qso_finish(&self, now: Instant) {
        let (label, break_due, automate) = {
            let mut st = self.lock();
            let label = match st.finish_qso(now, self.inner.config.timing.finish_debounce()) {
                Some(label) => label,
                None => {
                    log::debug!("Finish marker inside the debounce window, ignored");
                    return;
                }
            };
            st.add_message(format!("QSO with {} finished.", label));
            let break_due = st.break_armed || st.break_pending;
            let automate = st.enabled;
            if break_due && automate {
                // The QSO is over; a deferred break may fire now.
                st.break_pending = false;
                st.break_armed = true;
            }
            (label, break_due, automate)
        };

        if !automate {
            return;
        }

        let daemon = self.clone();
        let handle = tokio::spawn(async move {
            if break_due {
                daemon.run_break().await;
            } else {
                daemon.run_post_qso_cooldown(label).await;
            }
        });
        self.set_worker(handle);
    }

    // -------------------------------------------------------------------------
    // Timed sequences
    // -------------------------------------------------------------------------

    async fn run_post_qso_cooldown(self, partner: String) {
        let delay = self.inner.config.timing.post_qso_delay_secs;
        {
            let mut st = self.lock();
            st.forced_tx_off = true;
            st.add_message(format!("Waiting {} seconds before re-enabling TX...", delay));
        }
        self.run_countdown(delay, "Post-QSO delay:").await;
        self.lock()
            .add_message(format!("Re-enabling TX after QSO with {}...", partner));
        self.ensure_tx_enabled().await;
        // Cleared even on failure so the enforcement watchdog can retry.
        self.lock().forced_tx_off = false;
    }

    async fn run_break(self) {
        let timing = &self.inner.config.timing;
        let hi = timing.break_max_secs.max(timing.break_min_secs);
        let delay = rand::thread_rng().gen_range(timing.break_min_secs..=hi);
        self.lock().add_message(format!(
            "Hourly break: waiting {} min {} sec before restarting CQ...",
            delay / 60,
            delay % 60
        ));
        self.run_countdown(delay, "CQ restart delay:").await;
        self.restart_cq_sequence().await;
        self.lock().complete_break(Instant::now());
    }

    /// Force TX off if on, re-arm CQ, pause, re-enable TX.
    async fn restart_cq_sequence(&self) {
        self.ensure_tx_disabled().await;
        if self.enable_cq().await {
            self.lock().add_message("CQ re-enabled.");
        }
        tokio::time::sleep(self.inner.config.timing.break_step()).await;
        self.ensure_tx_enabled().await;
    }

    /// Drive the visible countdown for a timed wait of `seconds`.
    async fn run_countdown(&self, seconds: u64, label: &str) {
        self.lock().countdown = Some(Countdown {
            max: seconds,
            value: 0,
            label: label.to_string(),
        });
        for i in 1..=seconds {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let mut st = self.lock();
            if let Some(c) = st.countdown.as_mut() {
                if c.label == label {
                    c.value = i;
                }
            }
        }
        let mut st = self.lock();
        if st.countdown.as_ref().is_some_and(|c| c.label == label) {
            st.countdown = None;
        }
    }

    // -------------------------------------------------------------------------
    // Operator commands
    // -------------------------------------------------------------------------

    /// Spawn the enable sequence without blocking the caller.
    pub fn request_enable(&self) {
        let daemon = self.clone();
        let handle = tokio::spawn(async move { daemon.enable_system().await });
        self.set_worker(handle);
    }

    /// Abort any in-flight cooldown and spawn the disable sequence.
    pub fn request_disable(&self) {
        self.abort_worker();
        let daemon = self.clone();
        let handle = tokio::spawn(async move { daemon.disable_system().await });
        self.set_worker(handle);
    }

    pub async fn enable_system(&self) {
        {
            let mut st = self.lock();
            if st.enabled {
                st.add_message("System already enabled.");
                return;
            }
            st.enabled = true;
            st.add_message("Enabling system: arming CQ...");
        }
        if !self.enable_cq().await {
            return;
        }
        {
            let mut st = self.lock();
            st.last_activity = Instant::now();
            st.add_message(format!(
                "CQ armed. Waiting {} seconds before enabling TX...",
                self.inner.config.timing.enable_settle_secs
            ));
        }
        self.run_countdown(self.inner.config.timing.enable_settle_secs, "Enabling:")
            .await;
        if self.ensure_tx_enabled().await {
            self.lock().add_message("System is now active.");
        }
    }

    pub async fn disable_system(&self) {
        {
            let mut st = self.lock();
            if !st.enabled {
                st.add_message("System already disabled.");
                return;
            }
            // An aborted worker can leave these behind.
            st.countdown = None;
            st.forced_tx_off = false;
            st.add_message("System disabled by user. Turning off TX enable...");
        }
        self.ensure_tx_disabled().await;
        self.run_countdown(
            self.inner.config.timing.disable_settle_secs,
            "Disabling:",
        )
        .await;
        self.lock().add_message("Halting TX...");
        {
            let _guard = self.inner.actuation.lock().await;
            if let Err(e) = self.inner.actuator.halt_tx().await {
                log::warn!("TX halt failed: {}", e);
                self.lock().add_message("Failed to halt TX.");
            }
        }
        let mut st = self.lock();
        st.enabled = false;
        st.qso_partner = None;
        st.qso_started_at = None;
        st.cq_active = false;
        st.add_message("System disabled.");
    }

    /// Orderly teardown on operator quit or SIGINT.
    pub async fn shutdown(&self) {
        self.abort_worker();
        let enabled = self.lock().enabled;
        if enabled {
            self.disable_system().await;
        }
    }

    // -------------------------------------------------------------------------
    // Watchdog entry points (decisions under the lock, actuation outside)
    // -------------------------------------------------------------------------

    pub async fn check_idle_qso(&self, now: Instant) {
        {
            let mut st = self.lock();
            if !st.enabled
                || !st.idle_qso_expired(now, self.inner.config.timing.qso_timeout())
            {
                return;
            }
            let partner = st.abandon_qso().unwrap_or_else(|| "Unknown".to_string());
            st.add_message(format!("QSO with {} stalled; restarting CQ.", partner));
        }
        self.restart_cq_sequence().await;
    }

    pub async fn check_tx_enforcement(&self) {
        {
            let mut st = self.lock();
            if !st.tx_enforcement_due() {
                return;
            }
            st.add_message("TX enable dropped; re-enabling...");
        }
        self.ensure_tx_enabled().await;
    }

    pub fn check_break_schedule(&self, now: Instant) {
        let mut st = self.lock();
        if !st.enabled {
            return;
        }
        match st.arm_break_if_due(now, self.inner.config.timing.break_after()) {
            Some(BreakArm::Armed) => {
                st.add_message("Hourly break armed; will run after the next QSO.")
            }
            Some(BreakArm::Deferred) => {
                st.add_message("Hourly break due; waiting for the current QSO to finish.")
            }
            None => {}
        }
    }

    // -------------------------------------------------------------------------
    // Actuation helpers - believed state is checked before every call, and a
    // failed call never advances the state it would have advanced on success
    // -------------------------------------------------------------------------

    async fn enable_cq(&self) -> bool {
        let _guard = self.inner.actuation.lock().await;
        match self.inner.actuator.enable_cq().await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("CQ enable failed: {}", e);
                self.lock().add_message("Failed to enable CQ.");
                false
            }
        }
    }

    /// Enable TX unless it is already believed on. Returns whether TX is
    /// believed on afterwards.
    async fn ensure_tx_enabled(&self) -> bool {
        if self.lock().tx_enabled {
            self.lock().add_message("TX already enabled, not sending again.");
            return true;
        }
        let _guard = self.inner.actuation.lock().await;
        if self.lock().tx_enabled {
            return true;
        }
        match self.inner.actuator.enable_tx().await {
            Ok(()) => {
                let mut st = self.lock();
                st.note_tx_observed(true, Instant::now());
                st.add_message("TX enabled.");
                true
            }
            Err(e) => {
                log::warn!("TX enable failed: {}", e);
                self.lock().add_message("Failed to enable TX.");
                false
            }
        }
    }

    async fn ensure_tx_disabled(&self) -> bool {
        if !self.lock().tx_enabled {
            return true;
        }
        let _guard = self.inner.actuation.lock().await;
        if !self.lock().tx_enabled {
            return true;
        }
        match self.inner.actuator.disable_tx().await {
            Ok(()) => {
                let mut st = self.lock();
                st.tx_enabled = false;
                st.add_message("TX enable turned off.");
                true
            }
            Err(e) => {
                log::warn!("TX disable failed: {}", e);
                self.lock().add_message("Failed to turn off TX enable.");
                false
            }
        }
    }

    fn set_worker(&self, handle: JoinHandle<()>) {
        let mut slot = self.inner.worker.lock().unwrap();
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = Some(handle);
    }

    fn abort_worker(&self) {
        if let Some(old) = self.inner.worker.lock().unwrap().take() {
            old.abort();
        }
    }

    #[cfg(test)]
    async fn wait_for_worker(&self) {
        let handle = self.inner.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockActuator {
        calls: Mutex<Vec<&'static str>>,
        fail_enable_tx: AtomicBool,
    }

    impl MockActuator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_enable_tx: AtomicBool::new(false),
            })
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl ActuatorPort for MockActuator {
        async fn enable_cq(&self) -> Result<(), ActuatorError> {
            self.record("enable_cq");
            Ok(())
        }

        async fn enable_tx(&self) -> Result<(), ActuatorError> {
            self.record("enable_tx");
            if self.fail_enable_tx.load(Ordering::SeqCst) {
                return Err(ActuatorError::WindowNotFound);
            }
            Ok(())
        }

        async fn disable_tx(&self) -> Result<(), ActuatorError> {
            self.record("disable_tx");
            Ok(())
        }

        async fn halt_tx(&self) -> Result<(), ActuatorError> {
            self.record("halt_tx");
            Ok(())
        }
    }

    /// Config with zeroed settle delays so sequences complete immediately.
    fn test_config() -> Config {
        let mut config = Config::default();
        config.callsign = "5Z4XB".to_string();
        config.timing.post_qso_delay_secs = 0;
        config.timing.enable_settle_secs = 0;
        config.timing.disable_settle_secs = 0;
        config.timing.break_min_secs = 0;
        config.timing.break_max_secs = 0;
        config.timing.break_step_secs = 0;
        config
    }

    fn daemon_with(actuator: Arc<MockActuator>) -> AutoQso {
        AutoQso::new(test_config(), actuator)
    }

    fn messages_containing(daemon: &AutoQso, needle: &str) -> usize {
        daemon
            .lock()
            .messages()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }

    #[tokio::test]
    async fn test_enable_sequence() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());

        daemon.enable_system().await;
        assert_eq!(mock.calls(), vec!["enable_cq", "enable_tx"]);
        assert!(daemon.lock().enabled);
        assert!(daemon.lock().tx_enabled);

        // Enabling again is a logged no-op
        daemon.enable_system().await;
        assert_eq!(mock.calls().len(), 2);
        assert_eq!(messages_containing(&daemon, "already enabled"), 1);
    }

    #[tokio::test]
    async fn test_enable_skips_tx_when_already_on() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.lock().tx_enabled = true;

        daemon.enable_system().await;
        assert_eq!(mock.calls(), vec!["enable_cq"]);
        assert_eq!(messages_containing(&daemon, "TX already enabled"), 1);
    }

    #[tokio::test]
    async fn test_disable_sequence() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.enable_system().await;
        mock.clear();

        daemon.disable_system().await;
        assert_eq!(mock.calls(), vec!["disable_tx", "halt_tx"]);
        let st = daemon.lock();
        assert!(!st.enabled);
        assert!(!st.tx_enabled);
        assert_eq!(st.qso_partner, None);
        assert!(!st.cq_active);
    }

    #[tokio::test]
    async fn test_qso_cycle_scenario() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.enable_system().await;
        mock.clear();

        daemon.handle_datagram(b"CQ 5Z4XB K1ABC");
        assert_eq!(daemon.lock().qso_partner, Some("K1ABC".to_string()));

        // JTDX drops Enable TX after the sign-off; we observe that
        daemon.lock().tx_enabled = false;

        daemon.handle_datagram(b"K1ABC RR73 5Z4XB");
        daemon.wait_for_worker().await;

        assert_eq!(messages_containing(&daemon, "QSO started with K1ABC."), 1);
        assert_eq!(messages_containing(&daemon, "QSO with K1ABC finished."), 1);
        assert_eq!(mock.calls(), vec!["enable_tx"]);

        let st = daemon.lock();
        assert_eq!(st.qso_partner, None);
        assert_eq!(st.last_qso_partner, Some("K1ABC".to_string()));
        assert!(st.tx_enabled);
        assert!(!st.forced_tx_off);
    }

    #[tokio::test]
    async fn test_finish_debounce_single_cooldown() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.enable_system().await;
        mock.clear();
        daemon.lock().tx_enabled = false;

        daemon.handle_datagram(b"CQ 5Z4XB K1ABC");
        daemon.handle_datagram(b"K1ABC RR73 5Z4XB");
        daemon.handle_datagram(b"K1ABC RR73 5Z4XB");
        daemon.wait_for_worker().await;

        assert_eq!(messages_containing(&daemon, "finished"), 1);
        assert_eq!(mock.calls(), vec!["enable_tx"]);
    }

    #[tokio::test]
    async fn test_break_fires_after_deferral() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.enable_system().await;
        mock.clear();

        daemon.handle_datagram(b"CQ 5Z4XB K1ABC");
        // The hour elapsed mid-QSO
        daemon.lock().break_pending = true;
        daemon.lock().tx_enabled = false;

        daemon.handle_datagram(b"K1ABC RR73 5Z4XB");
        daemon.wait_for_worker().await;

        // Break sequence, not the short cooldown: CQ re-armed before TX
        assert_eq!(mock.calls(), vec!["enable_cq", "enable_tx"]);
        let st = daemon.lock();
        assert!(!st.break_armed);
        assert!(!st.break_pending);
        assert!(st.tx_enabled);
    }

    #[tokio::test]
    async fn test_break_schedule_defers_during_qso() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.enable_system().await;

        let later = Instant::now() + Duration::from_secs(3700);
        daemon.handle_datagram(b"CQ 5Z4XB K1ABC");
        daemon.check_break_schedule(later);
        {
            let st = daemon.lock();
            assert!(st.break_pending);
            assert!(!st.break_armed);
        }

        // Arming never actuates from the watchdog tick itself
        let calls = mock.calls();
        assert!(!calls.contains(&"disable_tx"));
    }

    #[tokio::test]
    async fn test_break_schedule_arms_when_idle() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock);
        daemon.enable_system().await;

        daemon.check_break_schedule(Instant::now() + Duration::from_secs(3700));
        assert!(daemon.lock().break_armed);
        // and only once per cycle
        daemon.check_break_schedule(Instant::now() + Duration::from_secs(3800));
        assert_eq!(messages_containing(&daemon, "Hourly break armed"), 1);
    }

    #[tokio::test]
    async fn test_idle_watchdog_restarts_stalled_qso() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.enable_system().await;
        mock.clear();

        daemon.handle_datagram(b"CQ 5Z4XB K1ABC");
        daemon.check_idle_qso(Instant::now() + Duration::from_secs(301)).await;

        assert_eq!(mock.calls(), vec!["disable_tx", "enable_cq", "enable_tx"]);
        let st = daemon.lock();
        assert_eq!(st.qso_partner, None);
        assert!(st.tx_enabled);
    }

    #[tokio::test]
    async fn test_idle_watchdog_leaves_live_qso_alone() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.enable_system().await;
        mock.clear();

        daemon.handle_datagram(b"CQ 5Z4XB K1ABC");
        daemon.check_idle_qso(Instant::now() + Duration::from_secs(60)).await;

        assert!(mock.calls().is_empty());
        assert_eq!(daemon.lock().qso_partner, Some("K1ABC".to_string()));
    }

    #[tokio::test]
    async fn test_enforcement_reenables_dropped_tx() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.enable_system().await;
        mock.clear();

        // Externally-caused TX drop, observed on the wire
        daemon.lock().tx_enabled = false;
        daemon.check_tx_enforcement().await;
        assert_eq!(mock.calls(), vec!["enable_tx"]);
        assert!(daemon.lock().tx_enabled);

        // Nothing to do when TX is already on
        mock.clear();
        daemon.check_tx_enforcement().await;
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_enforcement_respects_quiet_window() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.enable_system().await;
        mock.clear();

        let mut st = daemon.lock();
        st.tx_enabled = false;
        st.forced_tx_off = true;
        drop(st);

        daemon.check_tx_enforcement().await;
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_actuation_does_not_advance_state() {
        let mock = MockActuator::new();
        let daemon = daemon_with(mock.clone());
        daemon.enable_system().await;
        mock.clear();

        daemon.lock().tx_enabled = false;
        let before = daemon.lock().last_activity;
        mock.fail_enable_tx.store(true, Ordering::SeqCst);

        daemon.check_tx_enforcement().await;
        assert_eq!(mock.calls(), vec!["enable_tx"]);
        let st = daemon.lock();
        assert!(!st.tx_enabled);
        assert_eq!(st.last_activity, before);
    }

    #[tokio::test]
    async fn test_disable_aborts_inflight_cooldown() {
        let mock = MockActuator::new();
        let mut config = test_config();
        config.timing.post_qso_delay_secs = 60;
        let daemon = AutoQso::new(config, mock.clone());
        daemon.enable_system().await;
        mock.clear();
        daemon.lock().tx_enabled = false;

        daemon.handle_datagram(b"CQ 5Z4XB K1ABC");
        daemon.handle_datagram(b"K1ABC RR73 5Z4XB");
        // Let the cooldown worker reach its countdown
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(daemon.lock().forced_tx_off);

        daemon.abort_worker();
        daemon.disable_system().await;

        let calls = mock.calls();
        assert!(!calls.contains(&"enable_tx"));
        assert!(calls.contains(&"halt_tx"));
        let st = daemon.lock();
        assert!(!st.forced_tx_off);
        assert!(st.countdown.is_none());
        assert!(!st.enabled);
    }
}
