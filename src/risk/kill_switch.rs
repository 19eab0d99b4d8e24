use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::KillSwitchConfig;
use crate::error::RiskError;
use crate::events::{EventBus, RiskEvent};
use crate::models::alert::{Alert, AlertKind, AlertSeverity, TriggerSeverity};
use crate::models::report::{KillSwitchStatus, OperatingMode, TriggerRecord};

/// Operations gated by `is_operation_allowed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Trade,
    Rebalance,
    Stop,
}

const TRIGGER_HISTORY_CAP: usize = 50;
const RECOVERY_HOLD_MS: u64 = 30_000;
const HEALTH_TICK_MS: u64 = 30_000;

#[derive(Debug)]
struct SwitchState {
    mode: OperatingMode,
    daily_loss: f64,
    current_drawdown: f64,
    consecutive_failures: u32,
    portfolio_value: f64,
    trigger_history: VecDeque<TriggerRecord>,
    /// Set when drawdown first goes positive; cleared on daily reset.
    drawdown_since: Option<chrono::DateTime<Utc>>,
    last_reset_day: NaiveDate,
    recovery_timer: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct AgentTimers {
    graceful: Option<JoinHandle<()>>,
    force: Option<JoinHandle<()>>,
    /// True once the agent confirmed or a force-stop was emitted for it.
    resolved: bool,
}

impl AgentTimers {
    fn abort(&mut self) {
        if let Some(handle) = self.graceful.take() {
            handle.abort();
        }
        if let Some(handle) = self.force.take() {
            handle.abort();
        }
    }
}

/// Emergency trading-authorization authority.
///
/// Tracks daily loss, drawdown and failure streaks, auto-trips on configured
/// ceilings, and coordinates graceful-then-forced shutdown of registered
/// agents. The trip wire itself is an atomic so authorization checks never
/// touch a lock.
pub struct KillSwitch {
    config: RwLock<KillSwitchConfig>,
    bus: EventBus,
    triggered: AtomicBool,
    active: AtomicBool,
    state: RwLock<SwitchState>,
    agents: RwLock<HashMap<String, AgentTimers>>,
}

impl KillSwitch {
    pub fn new(
        config: KillSwitchConfig,
        portfolio_value: f64,
        bus: EventBus,
    ) -> Result<Arc<Self>, RiskError> {
        config.validate()?;
        if !(portfolio_value.is_finite() && portfolio_value > 0.0) {
            return Err(RiskError::invalid_input("portfolio_value must be positive"));
        }
        // Start "one day behind" so the first midnight roll always fires.
        let yesterday = Utc::now()
            .date_naive()
            .pred_opt()
            .unwrap_or_else(|| Utc::now().date_naive());
        Ok(Arc::new(Self {
            config: RwLock::new(config),
            bus,
            triggered: AtomicBool::new(false),
            active: AtomicBool::new(true),
            state: RwLock::new(SwitchState {
                mode: OperatingMode::Normal,
                daily_loss: 0.0,
                current_drawdown: 0.0,
                consecutive_failures: 0,
                portfolio_value,
                trigger_history: VecDeque::with_capacity(TRIGGER_HISTORY_CAP),
                drawdown_since: None,
                last_reset_day: yesterday,
                recovery_timer: None,
            }),
            agents: RwLock::new(HashMap::new()),
        }))
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Authorization truth table: inactive blocks everything; a triggered or
    /// emergency switch only lets `Stop` through.
    pub async fn is_operation_allowed(&self, op: Operation) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        if self.is_triggered() && op != Operation::Stop {
            return false;
        }
        if self.state.read().await.mode == OperatingMode::Emergency && op != Operation::Stop {
            return false;
        }
        true
    }

    pub async fn update_config(&self, config: KillSwitchConfig) -> Result<(), RiskError> {
        config.validate()?;
        *self.config.write().await = config;
        self.bus.publish(RiskEvent::ConfigUpdated {
            component: "kill_switch".into(),
        });
        Ok(())
    }

    pub async fn update_portfolio_value(&self, value: f64) {
        if value.is_finite() && value > 0.0 {
            self.state.write().await.portfolio_value = value;
        }
    }

    // --- agent lifecycle ---------------------------------------------------

    pub async fn register_agent(&self, id: &str) {
        info!("agent registered with kill switch: {id}");
        self.agents
            .write()
            .await
            .insert(id.to_string(), AgentTimers::default());
    }

    pub async fn unregister_agent(&self, id: &str) {
        if let Some(mut timers) = self.agents.write().await.remove(id) {
            timers.abort();
            info!("agent unregistered from kill switch: {id}");
        }
    }

    /// Incoming `bot-stopped` confirmation: cancels both shutdown timers so
    /// no force-stop is emitted for this agent.
    pub async fn confirm_stopped(&self, id: &str) {
        let mut agents = self.agents.write().await;
        if let Some(timers) = agents.get_mut(id) {
            timers.abort();
            timers.resolved = true;
            info!("agent confirmed stopped: {id}");
        }
    }

    pub async fn registered_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    // --- trigger / reset ---------------------------------------------------

    /// Trip the switch. Critical severity forces all agents immediately;
    /// anything lower takes the graceful path. A second trigger while tripped
    /// is a no-op that surfaces a duplicate warning.
    pub async fn trigger(self: &Arc<Self>, reason: &str, severity: TriggerSeverity) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            warn!("kill switch already triggered — ignoring duplicate ({reason})");
            self.bus.publish(RiskEvent::RiskAlert(
                Alert::new(
                    AlertKind::KillSwitch,
                    AlertSeverity::Warning,
                    format!("duplicate kill-switch trigger ignored: {reason}"),
                )
                .with_action("no action; switch already triggered"),
            ));
            return;
        }

        let timestamp = Utc::now();
        {
            let mut state = self.state.write().await;
            state.mode = if severity == TriggerSeverity::Critical {
                OperatingMode::Emergency
            } else {
                OperatingMode::Recovery
            };
            if let Some(timer) = state.recovery_timer.take() {
                timer.abort();
            }
            if state.trigger_history.len() >= TRIGGER_HISTORY_CAP {
                state.trigger_history.pop_front();
            }
            state.trigger_history.push_back(TriggerRecord {
                reason: reason.to_string(),
                severity,
                timestamp,
            });
        }

        error!("KILL SWITCH TRIGGERED ({severity:?}): {reason}");
        self.bus.publish(RiskEvent::KillSwitchTriggered {
            reason: reason.to_string(),
            severity,
            timestamp,
        });

        let contacts = self.config.read().await.emergency_contacts.clone();
        if !contacts.is_empty() {
            self.bus.publish(RiskEvent::EmergencyNotification {
                contacts,
                event: format!("kill-switch-triggered: {reason}"),
            });
        }

        if severity == TriggerSeverity::Critical {
            self.force_stop_all().await;
        } else {
            self.graceful_stop_all().await;
        }
    }

    /// Re-arm the switch. Enters recovery and returns to normal after a
    /// 30-second hold.
    pub async fn reset(self: &Arc<Self>, reason: &str, reset_by: &str) {
        self.triggered.store(false, Ordering::SeqCst);
        {
            let mut agents = self.agents.write().await;
            for timers in agents.values_mut() {
                timers.abort();
                timers.resolved = false;
            }
        }
        {
            let mut state = self.state.write().await;
            state.mode = OperatingMode::Recovery;
            if let Some(timer) = state.recovery_timer.take() {
                timer.abort();
            }
            let this = Arc::clone(self);
            state.recovery_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(RECOVERY_HOLD_MS)).await;
                let mut state = this.state.write().await;
                if state.mode == OperatingMode::Recovery && !this.is_triggered() {
                    state.mode = OperatingMode::Normal;
                    info!("kill switch recovery hold elapsed — back to normal");
                }
            }));
        }
        info!("kill switch reset by {reset_by}: {reason}");
        self.bus.publish(RiskEvent::KillSwitchReset {
            reason: reason.to_string(),
            reset_by: reset_by.to_string(),
        });
    }

    async fn graceful_stop_all(self: &Arc<Self>) {
        let (graceful_ms, force_ms) = {
            let config = self.config.read().await;
            (
                config.graceful_shutdown_timeout_ms,
                config.force_shutdown_after_ms,
            )
        };
        let ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        for id in ids {
            self.bus.publish(RiskEvent::GracefulStopBot {
                bot_id: id.clone(),
                timeout_ms: graceful_ms,
            });

            let graceful = {
                let this = Arc::clone(self);
                let id = id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(graceful_ms)).await;
                    this.force_stop_agent(&id).await;
                })
            };
            let force = {
                let this = Arc::clone(self);
                let id = id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(force_ms)).await;
                    this.force_stop_agent(&id).await;
                })
            };

            let mut agents = self.agents.write().await;
            match agents.get_mut(&id) {
                Some(timers) => {
                    timers.abort();
                    timers.graceful = Some(graceful);
                    timers.force = Some(force);
                    timers.resolved = false;
                }
                None => {
                    // Unregistered between snapshot and now
                    graceful.abort();
                    force.abort();
                }
            }
        }
    }

    /// Escalation on window expiry; emits at most one force-stop per agent.
    async fn force_stop_agent(&self, id: &str) {
        let mut agents = self.agents.write().await;
        if let Some(timers) = agents.get_mut(id) {
            if !timers.resolved {
                timers.resolved = true;
                warn!("graceful window expired for {id} — forcing stop");
                self.bus
                    .publish(RiskEvent::ForceStopBot { bot_id: id.to_string() });
            }
        }
    }

    async fn force_stop_all(&self) {
        let mut agents = self.agents.write().await;
        for (id, timers) in agents.iter_mut() {
            timers.abort();
            self.bus
                .publish(RiskEvent::ForceStopBot { bot_id: id.clone() });
        }
        agents.clear();
    }

    // --- counters ----------------------------------------------------------

    /// Record a realized loss; updates the drawdown watermark and runs the
    /// auto-trigger checks.
    pub async fn report_loss(self: &Arc<Self>, amount: f64) {
        if !amount.is_finite() {
            return;
        }
        let drawdown = {
            let mut state = self.state.write().await;
            state.daily_loss += amount.abs();
            let loss_pct = if state.portfolio_value > 0.0 {
                (state.daily_loss / state.portfolio_value * 100.0).min(100.0)
            } else {
                100.0
            };
            state.current_drawdown = state.current_drawdown.max(loss_pct);
            if state.drawdown_since.is_none() && state.current_drawdown > 0.0 {
                state.drawdown_since = Some(Utc::now());
            }
            state.current_drawdown
        };
        self.bus.publish(RiskEvent::DrawdownUpdated {
            drawdown_pct: drawdown,
        });
        self.check_auto_triggers().await;
    }

    pub async fn report_failure(self: &Arc<Self>) {
        self.state.write().await.consecutive_failures += 1;
        self.check_auto_triggers().await;
    }

    pub async fn report_success(&self) {
        self.state.write().await.consecutive_failures = 0;
    }

    /// Enhanced-monitoring inputs; only consulted when the feature is on.
    pub async fn update_market_conditions(
        self: &Arc<Self>,
        volatility: f64,
        liquidity: f64,
        correlation: f64,
    ) {
        let config = self.config.read().await.clone();
        if !config.enable_auto_trigger || !config.enable_enhanced_monitoring || self.is_triggered()
        {
            return;
        }
        if volatility > config.volatility_threshold {
            self.trigger(
                &format!("Market volatility {volatility:.2} above threshold"),
                TriggerSeverity::High,
            )
            .await;
        } else if liquidity < config.liquidity_threshold {
            self.trigger(
                &format!("Market liquidity {liquidity:.2} below threshold"),
                TriggerSeverity::Medium,
            )
            .await;
        } else if correlation > config.correlation_threshold {
            self.trigger(
                &format!("Portfolio correlation {correlation:.2} above threshold"),
                TriggerSeverity::Medium,
            )
            .await;
        }
    }

    async fn check_auto_triggers(self: &Arc<Self>) {
        let config = self.config.read().await.clone();
        if !config.enable_auto_trigger || self.is_triggered() {
            return;
        }
        let (daily_loss, drawdown, failures) = {
            let state = self.state.read().await;
            (
                state.daily_loss,
                state.current_drawdown,
                state.consecutive_failures,
            )
        };

        if daily_loss >= config.max_daily_loss {
            self.trigger(
                &format!("Daily loss limit exceeded: {daily_loss:.2} >= {:.2}", config.max_daily_loss),
                TriggerSeverity::High,
            )
            .await;
        } else if drawdown >= config.max_drawdown {
            self.trigger(
                &format!("Maximum drawdown exceeded: {drawdown:.2}% >= {:.2}%", config.max_drawdown),
                TriggerSeverity::High,
            )
            .await;
        } else if failures >= config.max_consecutive_failures {
            self.trigger(
                &format!("Consecutive failure limit reached: {failures}"),
                TriggerSeverity::Medium,
            )
            .await;
        }
    }

    /// Unresolved-drawdown watchdog, consulted from the health tick.
    async fn check_recovery_time(self: &Arc<Self>) {
        let config = self.config.read().await.clone();
        if !config.enable_auto_trigger || !config.enable_enhanced_monitoring || self.is_triggered()
        {
            return;
        }
        let elapsed_ms = {
            let state = self.state.read().await;
            if state.current_drawdown <= 0.0 {
                return;
            }
            state
                .drawdown_since
                .map(|since| (Utc::now() - since).num_milliseconds().max(0) as u64)
        };
        if let Some(elapsed) = elapsed_ms {
            if elapsed > config.recovery_time_limit_ms {
                self.trigger("Drawdown recovery time limit exceeded", TriggerSeverity::High)
                    .await;
            }
        }
    }

    // --- timers ------------------------------------------------------------

    /// Zero the daily counters once per UTC day crossing. Failure streaks
    /// survive the roll.
    pub async fn perform_daily_reset(&self) -> bool {
        let today = Utc::now().date_naive();
        let timestamp = {
            let mut state = self.state.write().await;
            if state.last_reset_day == today {
                return false;
            }
            state.last_reset_day = today;
            state.daily_loss = 0.0;
            state.current_drawdown = 0.0;
            state.drawdown_since = None;
            Utc::now()
        };
        info!("daily risk counters reset");
        self.bus.publish(RiskEvent::DailyReset { timestamp });
        true
    }

    pub async fn get_status(&self) -> KillSwitchStatus {
        let state = self.state.read().await;
        let agents = self.registered_agents().await;
        KillSwitchStatus {
            triggered: self.is_triggered(),
            mode: state.mode,
            daily_loss: state.daily_loss,
            current_drawdown: state.current_drawdown,
            consecutive_failures: state.consecutive_failures,
            registered_agents: agents,
            recent_triggers: state.trigger_history.iter().cloned().collect(),
        }
    }

    /// Spawn the health tick, the UTC-midnight reset loop, and the incoming
    /// `bot-stopped` listener. Each stops on the shutdown signal.
    pub fn spawn_timers(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) {
        // Health tick
        {
            let this = Arc::clone(self);
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_millis(HEALTH_TICK_MS));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let status = this.get_status().await;
                            this.bus.publish(RiskEvent::HealthCheck(status));
                            this.check_recovery_time().await;
                            this.check_auto_triggers().await;
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }

        // Daily reset at the next UTC midnight, then every 24h
        {
            let this = Arc::clone(self);
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    let now = Utc::now();
                    let next_midnight = (now + chrono::Duration::days(1))
                        .date_naive()
                        .and_hms_opt(0, 0, 0)
                        .expect("valid midnight")
                        .and_utc();
                    let until = (next_midnight - now)
                        .to_std()
                        .unwrap_or(std::time::Duration::from_secs(86_400));
                    tokio::select! {
                        _ = tokio::time::sleep(until) => {
                            this.perform_daily_reset().await;
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }

        // Agent stop confirmations arriving on the bus
        {
            let this = Arc::clone(self);
            let mut events = self.bus.subscribe();
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = events.recv() => match event {
                            Ok(RiskEvent::BotStopped { bot_id }) => {
                                this.confirm_stopped(&bot_id).await;
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("kill-switch event listener lagged by {n}");
                            }
                            Err(_) => break,
                        },
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }
    }

    /// Deactivate and cancel every outstanding timer. The switch refuses all
    /// operations afterwards.
    pub async fn destroy(&self) {
        self.active.store(false, Ordering::SeqCst);
        let mut agents = self.agents.write().await;
        for timers in agents.values_mut() {
            timers.abort();
        }
        agents.clear();
        if let Some(timer) = self.state.write().await.recovery_timer.take() {
            timer.abort();
        }
        info!("kill switch destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> KillSwitchConfig {
        KillSwitchConfig {
            max_daily_loss: 1_000.0,
            max_drawdown: 15.0,
            max_consecutive_failures: 3,
            graceful_shutdown_timeout_ms: 50,
            force_shutdown_after_ms: 200,
            ..Default::default()
        }
    }

    fn build(config: KillSwitchConfig) -> (Arc<KillSwitch>, EventBus) {
        let bus = EventBus::new(64);
        let switch = KillSwitch::new(config, 100_000.0, bus.clone()).expect("valid config");
        (switch, bus)
    }

    async fn collect_events(
        rx: &mut broadcast::Receiver<RiskEvent>,
        wait_ms: u64,
    ) -> Vec<RiskEvent> {
        tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_trigger_sets_mode_by_severity() {
        let (switch, _bus) = build(test_config());
        switch.trigger("manual", TriggerSeverity::High).await;

        let status = switch.get_status().await;
        assert!(status.triggered);
        assert_eq!(status.mode, OperatingMode::Recovery);
        assert_eq!(status.recent_triggers.len(), 1);

        let (critical, _bus) = build(test_config());
        critical.trigger("manual", TriggerSeverity::Critical).await;
        assert_eq!(critical.get_status().await.mode, OperatingMode::Emergency);
    }

    #[tokio::test]
    async fn test_duplicate_trigger_is_noop_with_warning() {
        let (switch, bus) = build(test_config());
        let mut rx = bus.subscribe();

        switch.trigger("first", TriggerSeverity::High).await;
        switch.trigger("second", TriggerSeverity::Critical).await;

        let events = collect_events(&mut rx, 10).await;
        let triggers = events
            .iter()
            .filter(|e| matches!(e, RiskEvent::KillSwitchTriggered { .. }))
            .count();
        assert_eq!(triggers, 1, "only the first trigger fires");
        assert!(events.iter().any(|e| matches!(e, RiskEvent::RiskAlert(a) if a.severity == AlertSeverity::Warning)));
        // Still recovery from the first, non-critical trigger
        assert_eq!(switch.get_status().await.mode, OperatingMode::Recovery);
    }

    #[tokio::test]
    async fn test_daily_loss_auto_trigger() {
        let (switch, _bus) = build(test_config());
        switch.report_loss(300.0).await;
        switch.report_loss(400.0).await;
        assert!(!switch.is_triggered());

        switch.report_loss(500.0).await;
        assert!(switch.is_triggered());

        let status = switch.get_status().await;
        assert!(status.recent_triggers[0].reason.contains("Daily loss limit exceeded"));
        assert_eq!(status.recent_triggers[0].severity, TriggerSeverity::High);
        assert!(!switch.is_operation_allowed(Operation::Trade).await);
        assert!(switch.is_operation_allowed(Operation::Stop).await);
    }

    #[tokio::test]
    async fn test_consecutive_failures_trigger_and_success_reset() {
        let (switch, _bus) = build(test_config());
        switch.report_failure().await;
        switch.report_failure().await;
        switch.report_success().await;
        assert_eq!(switch.get_status().await.consecutive_failures, 0);

        switch.report_failure().await;
        switch.report_failure().await;
        switch.report_failure().await;
        assert!(switch.is_triggered());
        assert_eq!(
            switch.get_status().await.recent_triggers[0].severity,
            TriggerSeverity::Medium
        );
    }

    #[tokio::test]
    async fn test_graceful_confirmation_prevents_force_stop() {
        let (switch, bus) = build(test_config());
        switch.register_agent("agent-a").await;
        switch.register_agent("agent-b").await;
        let mut rx = bus.subscribe();

        switch.trigger("risk breach", TriggerSeverity::High).await;
        // A confirms inside the 50ms window; B never does
        switch.confirm_stopped("agent-a").await;

        let events = collect_events(&mut rx, 120).await;
        let graceful: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RiskEvent::GracefulStopBot { bot_id, .. } => Some(bot_id.clone()),
                _ => None,
            })
            .collect();
        let forced: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RiskEvent::ForceStopBot { bot_id } => Some(bot_id.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(graceful.len(), 2);
        assert_eq!(forced, vec!["agent-b".to_string()], "only the silent agent is forced");
    }

    #[tokio::test]
    async fn test_critical_trigger_forces_immediately_and_deregisters() {
        let (switch, bus) = build(test_config());
        switch.register_agent("agent-a").await;
        let mut rx = bus.subscribe();

        switch.trigger("catastrophe", TriggerSeverity::Critical).await;

        let events = collect_events(&mut rx, 10).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, RiskEvent::ForceStopBot { bot_id } if bot_id == "agent-a")));
        assert!(events
            .iter()
            .all(|e| !matches!(e, RiskEvent::GracefulStopBot { .. })));
        assert!(switch.registered_agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_enters_recovery() {
        let (switch, _bus) = build(test_config());
        switch.trigger("breach", TriggerSeverity::High).await;
        switch.reset("resolved", "operator").await;

        assert!(!switch.is_triggered());
        let status = switch.get_status().await;
        assert_eq!(status.mode, OperatingMode::Recovery);
        assert!(switch.is_operation_allowed(Operation::Trade).await);
    }

    #[tokio::test]
    async fn test_daily_reset_idempotent_per_day() {
        let (switch, bus) = build(test_config());
        let mut rx = bus.subscribe();
        switch.report_loss(500.0).await;
        switch.report_failure().await;

        assert!(switch.perform_daily_reset().await);
        assert!(!switch.perform_daily_reset().await, "second roll same day is a no-op");

        let status = switch.get_status().await;
        assert_eq!(status.daily_loss, 0.0);
        assert_eq!(status.current_drawdown, 0.0);
        assert_eq!(status.consecutive_failures, 1, "failure streak survives the roll");

        let events = collect_events(&mut rx, 10).await;
        let resets = events
            .iter()
            .filter(|e| matches!(e, RiskEvent::DailyReset { .. }))
            .count();
        assert_eq!(resets, 1);
    }

    #[tokio::test]
    async fn test_enhanced_monitoring_triggers() {
        let mut config = test_config();
        config.enable_enhanced_monitoring = true;
        config.volatility_threshold = 0.8;
        let (switch, _bus) = build(config);

        switch.update_market_conditions(0.5, 0.9, 0.2).await;
        assert!(!switch.is_triggered());

        switch.update_market_conditions(1.2, 0.9, 0.2).await;
        assert!(switch.is_triggered());
    }

    #[tokio::test]
    async fn test_destroy_blocks_everything() {
        let (switch, _bus) = build(test_config());
        switch.destroy().await;
        assert!(!switch.is_operation_allowed(Operation::Trade).await);
        assert!(!switch.is_operation_allowed(Operation::Stop).await);
    }
}
