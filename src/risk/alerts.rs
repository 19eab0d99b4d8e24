use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{Duration, Utc};
use tracing::warn;

use crate::error::RiskError;
use crate::events::{EventBus, RiskEvent};
use crate::models::alert::{Alert, AlertKind, AlertSeverity};

/// Unacknowledged critical alerts escalate after this long.
const ESCALATION_AFTER_MS: i64 = 300_000;

/// Bounded advisory-alert store with per-(kind, severity) cooldown dedup.
///
/// Owned by the risk manager; mutation is serialized by its owner, so the
/// store itself carries no locks.
pub struct AlertStore {
    alerts: VecDeque<Alert>,
    cooldowns: HashMap<(AlertKind, AlertSeverity), chrono::DateTime<Utc>>,
    escalated: HashSet<String>,
    cooldown: Duration,
    cap: usize,
    bus: EventBus,
}

impl AlertStore {
    pub fn new(cap: usize, cooldown_ms: u64, bus: EventBus) -> Self {
        Self {
            alerts: VecDeque::with_capacity(cap.min(256)),
            cooldowns: HashMap::new(),
            escalated: HashSet::new(),
            cooldown: Duration::milliseconds(cooldown_ms as i64),
            cap,
            bus,
        }
    }

    /// Store an alert and emit `risk-alert`, unless an alert with the same
    /// (kind, severity) fired within the cooldown window.
    pub fn raise(&mut self, alert: Alert) -> Option<&Alert> {
        let key = (alert.kind, alert.severity);
        let now = Utc::now();
        if let Some(last) = self.cooldowns.get(&key) {
            if now - *last < self.cooldown {
                return None;
            }
        }
        self.cooldowns.insert(key, now);

        if self.alerts.len() >= self.cap {
            if let Some(evicted) = self.alerts.pop_front() {
                self.escalated.remove(&evicted.id);
            }
        }
        warn!("risk alert [{:?}/{:?}]: {}", alert.kind, alert.severity, alert.message);
        self.bus.publish(RiskEvent::RiskAlert(alert.clone()));
        self.alerts.push_back(alert);
        self.alerts.back()
    }

    pub fn acknowledge(&mut self, id: &str) -> Result<(), RiskError> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| RiskError::NotFound(format!("alert {id}")))?;
        alert.acknowledged = true;
        Ok(())
    }

    /// Escalate critical alerts that sat unacknowledged past the window.
    /// Each alert escalates at most once.
    pub fn escalate_overdue(&mut self, contacts: &[String]) -> usize {
        let now = Utc::now();
        let window = Duration::milliseconds(ESCALATION_AFTER_MS);
        let mut escalations = 0;
        for alert in &self.alerts {
            if alert.severity != AlertSeverity::Critical
                || alert.acknowledged
                || now - alert.timestamp < window
                || self.escalated.contains(&alert.id)
            {
                continue;
            }
            self.escalated.insert(alert.id.clone());
            self.bus.publish(RiskEvent::EmergencyNotification {
                contacts: contacts.to_vec(),
                event: format!("unacknowledged critical alert: {}", alert.message),
            });
            escalations += 1;
        }
        escalations
    }

    /// Most-recent-first snapshot.
    pub fn snapshot(&self) -> Vec<Alert> {
        self.alerts.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(cooldown_ms: u64) -> AlertStore {
        AlertStore::new(5, cooldown_ms, EventBus::new(64))
    }

    #[test]
    fn test_cooldown_dedup() {
        let mut alerts = store(60_000);
        assert!(alerts
            .raise(Alert::new(AlertKind::RiskLimit, AlertSeverity::Warning, "first"))
            .is_some());
        assert!(
            alerts
                .raise(Alert::new(AlertKind::RiskLimit, AlertSeverity::Warning, "suppressed"))
                .is_none(),
            "same key inside cooldown must dedup"
        );
        // Different severity is a different key
        assert!(alerts
            .raise(Alert::new(AlertKind::RiskLimit, AlertSeverity::Error, "distinct"))
            .is_some());
        assert_eq!(alerts.len(), 2);
    }

    #[test]
    fn test_bounded_store_evicts_oldest() {
        let mut alerts = store(0);
        for i in 0..8 {
            // Cooldown of zero: every raise lands
            alerts.raise(Alert::new(AlertKind::System, AlertSeverity::Info, format!("a{i}")));
        }
        assert_eq!(alerts.len(), 5);
        assert_eq!(alerts.snapshot()[0].message, "a7");
    }

    #[test]
    fn test_acknowledge() {
        let mut alerts = store(60_000);
        let id = alerts
            .raise(Alert::new(AlertKind::Drawdown, AlertSeverity::Error, "dd"))
            .unwrap()
            .id
            .clone();
        assert!(alerts.acknowledge(&id).is_ok());
        assert!(alerts.snapshot()[0].acknowledged);
        assert!(matches!(alerts.acknowledge("missing"), Err(RiskError::NotFound(_))));
    }

    #[test]
    fn test_critical_escalation_once() {
        let mut alerts = store(60_000);
        let mut alert = Alert::new(AlertKind::KillSwitch, AlertSeverity::Critical, "tripped");
        alert.timestamp = Utc::now() - Duration::milliseconds(ESCALATION_AFTER_MS + 1_000);
        alerts.raise(alert);

        let contacts = vec!["ops@example.com".to_string()];
        assert_eq!(alerts.escalate_overdue(&contacts), 1);
        assert_eq!(alerts.escalate_overdue(&contacts), 0, "escalate at most once");
    }

    #[test]
    fn test_acknowledged_critical_does_not_escalate() {
        let mut alerts = store(60_000);
        let mut alert = Alert::new(AlertKind::KillSwitch, AlertSeverity::Critical, "tripped");
        alert.timestamp = Utc::now() - Duration::milliseconds(ESCALATION_AFTER_MS + 1_000);
        let id = alerts.raise(alert).unwrap().id.clone();
        alerts.acknowledge(&id).unwrap();

        assert_eq!(alerts.escalate_overdue(&[]), 0);
    }
}
