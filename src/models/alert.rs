use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity ladder for advisory alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Severity ladder for kill-switch triggers. Critical forces the emergency
/// (immediate force-stop) path; everything below takes the graceful path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Category of the condition an alert describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RiskLimit,
    Concentration,
    Correlation,
    Leverage,
    Liquidity,
    Drawdown,
    StressTest,
    KillSwitch,
    System,
}

/// An advisory event surfaced to collaborators. Stored bounded and
/// deduplicated by the alert store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    /// Positions implicated in the condition, if any.
    pub position_ids: Vec<String>,
    pub current_value: Option<f64>,
    pub threshold: Option<f64>,
    pub recommended_action: Option<String>,
}

impl Alert {
    pub fn new(kind: AlertKind, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            acknowledged: false,
            position_ids: Vec::new(),
            current_value: None,
            threshold: None,
            recommended_action: None,
        }
    }

    pub fn with_values(mut self, current: f64, threshold: f64) -> Self {
        self.current_value = Some(current);
        self.threshold = Some(threshold);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.recommended_action = Some(action.into());
        self
    }

    pub fn with_positions(mut self, ids: Vec<String>) -> Self {
        self.position_ids = ids;
        self
    }
}
