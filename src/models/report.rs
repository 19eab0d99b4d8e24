use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::{Alert, TriggerSeverity};
use super::position::PortfolioRisk;
use super::signal::MarketRegime;

/// Trading-authorization mode of the kill switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Normal,
    Recovery,
    Emergency,
}

/// One recorded kill-switch trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub reason: String,
    pub severity: TriggerSeverity,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time kill-switch snapshot; reflects all mutations that preceded
/// the call that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchStatus {
    pub triggered: bool,
    pub mode: OperatingMode,
    pub daily_loss: f64,
    pub current_drawdown: f64,
    pub consecutive_failures: u32,
    pub registered_agents: Vec<String>,
    pub recent_triggers: Vec<TriggerRecord>,
}

/// Per-position impact of a stress scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionImpact {
    pub position_id: String,
    pub symbol: String,
    pub shocked_price: f64,
    pub pnl: f64,
}

/// Outcome of one deterministic stress scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressTestResult {
    pub scenario: String,
    pub total_loss: f64,
    /// Loss as % of portfolio value.
    pub loss_pct: f64,
    /// Worst-case VaR as % of portfolio value.
    pub worst_case_var_pct: f64,
    pub passed: bool,
    pub time_to_recovery_days: u32,
    pub position_impacts: Vec<PositionImpact>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of the Monte-Carlo stress variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub iterations: u32,
    /// Mean simulated loss as % of portfolio value.
    pub expected_loss_pct: f64,
    /// Loss at the configured confidence level, % of portfolio value.
    pub worst_case_pct: f64,
    /// 95% confidence interval on the loss distribution, % of portfolio value.
    pub ci_95: (f64, f64),
}

/// Risk broken out along the report's four axes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskDecomposition {
    pub by_position: HashMap<String, f64>,
    pub by_sector: HashMap<String, f64>,
    pub by_factor: HashMap<String, f64>,
    pub temporal: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    ReducePosition,
    ReduceExposure,
    Diversify,
    HedgeCorrelation,
    IncreaseLiquidity,
    HaltTrading,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: RecommendationPriority,
    pub action: RecommendedAction,
    pub message: String,
}

/// Realized-performance summary over the recorded trade history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub sharpe: f64,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub var_95: f64,
    /// Mean loss in the tail beyond VaR-95.
    pub expected_shortfall_95: f64,
    pub profit_factor: f64,
    pub trades: u64,
}

/// Full advisory snapshot produced by the risk manager. All numeric fields
/// are finite; timestamps serialize as ISO-8601 UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub timestamp: DateTime<Utc>,
    pub portfolio_risk: PortfolioRisk,
    pub kill_switch_status: KillSwitchStatus,
    pub stress_test_results: Option<Vec<StressTestResult>>,
    pub risk_decomposition: RiskDecomposition,
    pub recommendations: Vec<Recommendation>,
    pub alerts: Vec<Alert>,
    pub market_regime: MarketRegime,
    pub performance_metrics: PerformanceMetrics,
}
