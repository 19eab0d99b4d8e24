use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::alert::{Alert, TriggerSeverity};
use crate::models::position::Position;
use crate::models::report::{KillSwitchStatus, RiskReport, StressTestResult};
use crate::risk::sizing::SizingResult;

/// Lifecycle and advisory events published by the risk core.
///
/// The serialized `event` tag is the contract-stable name; subscribers must
/// treat payloads as immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum RiskEvent {
    PositionAdded(Position),
    PositionUpdated(Position),
    PositionRemoved {
        position_id: String,
        symbol: String,
    },
    PositionSized(SizingResult),
    TradeResult {
        position_id: String,
        pnl: f64,
        success: bool,
    },
    RiskAlert(Alert),
    RiskReportGenerated(Box<RiskReport>),
    StressTestCompleted(StressTestResult),
    KillSwitchTriggered {
        reason: String,
        severity: TriggerSeverity,
        timestamp: DateTime<Utc>,
    },
    KillSwitchReset {
        reason: String,
        reset_by: String,
    },
    GracefulStopBot {
        bot_id: String,
        timeout_ms: u64,
    },
    ForceStopBot {
        bot_id: String,
    },
    /// Incoming confirmation from a registered agent.
    BotStopped {
        bot_id: String,
    },
    EmergencyClosePosition {
        position_id: String,
        symbol: String,
    },
    EmergencyNotification {
        contacts: Vec<String>,
        event: String,
    },
    DailyReset {
        timestamp: DateTime<Utc>,
    },
    HealthCheck(KillSwitchStatus),
    ConfigUpdated {
        component: String,
    },
    PortfolioValueUpdated {
        value: f64,
    },
    DrawdownUpdated {
        drawdown_pct: f64,
    },
}

impl RiskEvent {
    /// Contract-stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            RiskEvent::PositionAdded(_) => "position-added",
            RiskEvent::PositionUpdated(_) => "position-updated",
            RiskEvent::PositionRemoved { .. } => "position-removed",
            RiskEvent::PositionSized(_) => "position-sized",
            RiskEvent::TradeResult { .. } => "trade-result",
            RiskEvent::RiskAlert(_) => "risk-alert",
            RiskEvent::RiskReportGenerated(_) => "risk-report-generated",
            RiskEvent::StressTestCompleted(_) => "stress-test-completed",
            RiskEvent::KillSwitchTriggered { .. } => "kill-switch-triggered",
            RiskEvent::KillSwitchReset { .. } => "kill-switch-reset",
            RiskEvent::GracefulStopBot { .. } => "graceful-stop-bot",
            RiskEvent::ForceStopBot { .. } => "force-stop-bot",
            RiskEvent::BotStopped { .. } => "bot-stopped",
            RiskEvent::EmergencyClosePosition { .. } => "emergency-close-position",
            RiskEvent::EmergencyNotification { .. } => "emergency-notification",
            RiskEvent::DailyReset { .. } => "daily-reset",
            RiskEvent::HealthCheck(_) => "health-check",
            RiskEvent::ConfigUpdated { .. } => "config-updated",
            RiskEvent::PortfolioValueUpdated { .. } => "portfolio-value-updated",
            RiskEvent::DrawdownUpdated { .. } => "drawdown-updated",
        }
    }
}

/// In-process pub/sub conduit. One instance per risk manager; delivery is
/// synchronous on the publishing task, slow subscribers observe lag.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RiskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. A bus with no subscribers drops events silently.
    pub fn publish(&self, event: RiskEvent) {
        debug!("event: {}", event.name());
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RiskEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(RiskEvent::PortfolioValueUpdated { value: 100_000.0 });

        match rx.recv().await.expect("event delivered") {
            RiskEvent::PortfolioValueUpdated { value } => assert_eq!(value, 100_000.0),
            other => panic!("unexpected event: {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(16);
        bus.publish(RiskEvent::DailyReset { timestamp: Utc::now() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_contract_stable_names() {
        let event = RiskEvent::ForceStopBot { bot_id: "bot-1".into() };
        assert_eq!(event.name(), "force-stop-bot");

        let json = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["event"], "force-stop-bot");
        assert_eq!(json["payload"]["bot_id"], "bot-1");
    }
}
