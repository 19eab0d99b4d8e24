use serde::{Deserialize, Serialize};

use crate::error::RiskError;

/// Position-sizing algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMethod {
    Fixed,
    Volatility,
    Kelly,
    Adaptive,
    BlackLitterman,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Base % of portfolio risked per trade, [0.1, 10].
    pub base_risk_per_trade: f64,
    /// Per-position cap as % of portfolio, [1, 50].
    pub max_position_size: f64,
    /// USD floor below which no position is opened.
    pub min_position_size: f64,
    /// Days of history for volatility estimates, [1, 252].
    pub volatility_lookback: u32,
    /// Cumulative daily risk cap as % of portfolio, [1, 50].
    pub max_daily_risk: f64,
    /// Pairwise correlation above which the sizing penalty kicks in, [0, 1].
    pub correlation_threshold: f64,
    pub risk_scaling_method: ScalingMethod,
    /// Off means base size is used without adjustment multipliers.
    pub enable_dynamic_sizing: bool,
    pub enable_volatility_caching: bool,
    /// Cache entry lifetime in milliseconds.
    pub volatility_cache_ttl_ms: u64,
    /// Completed trades retained for performance feedback, [10, 10000].
    pub max_position_history: u32,
    /// Hard cap on the kelly allocation fraction, [0.01, 0.5].
    pub kelly_fraction_cap: f64,
    /// Trades in the adaptive performance window, [5, 100].
    pub adaptive_performance_window: u32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_risk_per_trade: 2.0,
            max_position_size: 10.0,
            min_position_size: 100.0,
            volatility_lookback: 30,
            max_daily_risk: 5.0,
            correlation_threshold: 0.7,
            risk_scaling_method: ScalingMethod::Volatility,
            enable_dynamic_sizing: true,
            enable_volatility_caching: true,
            volatility_cache_ttl_ms: 300_000,
            max_position_history: 1_000,
            kelly_fraction_cap: 0.25,
            adaptive_performance_window: 20,
        }
    }
}

impl SizingConfig {
    pub fn validate(&self) -> Result<(), RiskError> {
        check_range("base_risk_per_trade", self.base_risk_per_trade, 0.1, 10.0)?;
        check_range("max_position_size", self.max_position_size, 1.0, 50.0)?;
        check_positive("min_position_size", self.min_position_size)?;
        check_range("volatility_lookback", self.volatility_lookback as f64, 1.0, 252.0)?;
        check_range("max_daily_risk", self.max_daily_risk, 1.0, 50.0)?;
        check_range("correlation_threshold", self.correlation_threshold, 0.0, 1.0)?;
        check_positive("volatility_cache_ttl_ms", self.volatility_cache_ttl_ms as f64)?;
        check_range("max_position_history", self.max_position_history as f64, 10.0, 10_000.0)?;
        check_range("kelly_fraction_cap", self.kelly_fraction_cap, 0.01, 0.5)?;
        check_range(
            "adaptive_performance_window",
            self.adaptive_performance_window as f64,
            5.0,
            100.0,
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    pub enable_auto_trigger: bool,
    /// Daily loss ceiling in USD.
    pub max_daily_loss: f64,
    /// Drawdown ceiling as % of portfolio, [0, 100].
    pub max_drawdown: f64,
    pub max_consecutive_failures: u32,
    pub emergency_contacts: Vec<String>,
    /// Per-agent graceful window in milliseconds.
    pub graceful_shutdown_timeout_ms: u64,
    /// Absolute force cap in milliseconds, independent of the graceful window.
    pub force_shutdown_after_ms: u64,
    pub enable_enhanced_monitoring: bool,
    pub volatility_threshold: f64,
    /// Liquidity floor in [0, 1]; readings below it trigger when enhanced.
    pub liquidity_threshold: f64,
    /// Correlation ceiling in [0, 1]; readings above it trigger when enhanced.
    pub correlation_threshold: f64,
    /// Longest tolerated unresolved drawdown in milliseconds.
    pub recovery_time_limit_ms: u64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            enable_auto_trigger: true,
            max_daily_loss: 1_000.0,
            max_drawdown: 15.0,
            max_consecutive_failures: 5,
            emergency_contacts: Vec::new(),
            graceful_shutdown_timeout_ms: 30_000,
            force_shutdown_after_ms: 60_000,
            enable_enhanced_monitoring: false,
            volatility_threshold: 1.0,
            liquidity_threshold: 0.3,
            correlation_threshold: 0.9,
            recovery_time_limit_ms: 3_600_000,
        }
    }
}

impl KillSwitchConfig {
    pub fn validate(&self) -> Result<(), RiskError> {
        check_positive("max_daily_loss", self.max_daily_loss)?;
        check_range("max_drawdown", self.max_drawdown, 0.0, 100.0)?;
        check_positive("max_consecutive_failures", self.max_consecutive_failures as f64)?;
        check_positive("graceful_shutdown_timeout_ms", self.graceful_shutdown_timeout_ms as f64)?;
        check_positive("force_shutdown_after_ms", self.force_shutdown_after_ms as f64)?;
        if self.volatility_threshold < 0.0 || !self.volatility_threshold.is_finite() {
            return Err(invalid("volatility_threshold", self.volatility_threshold, ">= 0"));
        }
        check_range("liquidity_threshold", self.liquidity_threshold, 0.0, 1.0)?;
        check_range("correlation_threshold", self.correlation_threshold, 0.0, 1.0)?;
        check_positive("recovery_time_limit_ms", self.recovery_time_limit_ms as f64)?;
        for contact in &self.emergency_contacts {
            if !is_valid_email(contact) {
                return Err(RiskError::InvalidConfig {
                    field: "emergency_contacts",
                    value: contact.clone(),
                    allowed: "valid email address".into(),
                });
            }
        }
        Ok(())
    }
}

/// Portfolio-wide ceilings enforced before any position is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioLimits {
    /// Σ risk_amount ceiling as % of portfolio.
    pub max_portfolio_risk: f64,
    /// Largest sector exposure as % of portfolio.
    pub max_sector_concentration: f64,
    /// Average pairwise correlation ceiling, [0, 1].
    pub max_correlation: f64,
    /// Drift % that flags a rebalance recommendation.
    pub rebalance_threshold: f64,
    pub max_leverage: f64,
    /// Drawdown % that raises a limit alert.
    pub max_drawdown_limit: f64,
    /// Portfolio share to keep liquid, %.
    pub liquidity_buffer_percent: f64,
}

impl Default for PortfolioLimits {
    fn default() -> Self {
        Self {
            max_portfolio_risk: 10.0,
            max_sector_concentration: 30.0,
            max_correlation: 0.8,
            rebalance_threshold: 5.0,
            max_leverage: 3.0,
            max_drawdown_limit: 20.0,
            liquidity_buffer_percent: 10.0,
        }
    }
}

impl PortfolioLimits {
    pub fn validate(&self) -> Result<(), RiskError> {
        check_range("max_portfolio_risk", self.max_portfolio_risk, 0.0, 100.0)?;
        check_range("max_sector_concentration", self.max_sector_concentration, 0.0, 100.0)?;
        check_range("max_correlation", self.max_correlation, 0.0, 1.0)?;
        check_positive("rebalance_threshold", self.rebalance_threshold)?;
        check_positive("max_leverage", self.max_leverage)?;
        check_range("max_drawdown_limit", self.max_drawdown_limit, 0.0, 100.0)?;
        check_range("liquidity_buffer_percent", self.liquidity_buffer_percent, 0.0, 100.0)?;
        Ok(())
    }
}

/// One deterministic stress scenario. Accepts the superset of historical
/// shapes; unset fields fall back permissively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    /// Price shock in %, signed (−20 = 20% drop).
    pub market_shock: f64,
    pub volatility_multiplier: f64,
    /// Liquidity haircut in %.
    pub liquidity_reduction: f64,
    pub correlation_increase: f64,
    /// Shock duration in days.
    pub duration_days: f64,
    /// Assumed recovery span in days.
    pub recovery_time_days: f64,
}

impl StressScenario {
    pub fn new(name: impl Into<String>, market_shock: f64, volatility_multiplier: f64) -> Self {
        Self {
            name: name.into(),
            market_shock,
            volatility_multiplier,
            liquidity_reduction: 0.0,
            correlation_increase: 0.0,
            duration_days: 1.0,
            recovery_time_days: 5.0,
        }
    }

    fn validate(&self) -> Result<(), RiskError> {
        if self.name.is_empty() {
            return Err(RiskError::InvalidConfig {
                field: "stress.scenario.name",
                value: String::new(),
                allowed: "non-empty".into(),
            });
        }
        for (field, value) in [
            ("stress.market_shock", self.market_shock),
            ("stress.volatility_multiplier", self.volatility_multiplier),
            ("stress.liquidity_reduction", self.liquidity_reduction),
            ("stress.correlation_increase", self.correlation_increase),
        ] {
            if !value.is_finite() {
                return Err(invalid(field, value, "finite"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressTestConfig {
    pub enabled: bool,
    /// Hours between scheduled runs.
    pub frequency_hours: f64,
    /// Loss % above which a scenario fails.
    pub failure_threshold: f64,
    pub monte_carlo_enabled: bool,
    pub monte_carlo_iterations: u32,
    /// Confidence level for the Monte-Carlo worst case, (0, 1).
    pub confidence_level: f64,
    pub scenarios: Vec<StressScenario>,
}

impl Default for StressTestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency_hours: 24.0,
            failure_threshold: 20.0,
            monte_carlo_enabled: false,
            monte_carlo_iterations: 1_000,
            confidence_level: 0.99,
            scenarios: vec![
                StressScenario::new("market_crash", -20.0, 2.0),
                StressScenario::new("flash_crash", -10.0, 3.0),
                StressScenario {
                    liquidity_reduction: 50.0,
                    correlation_increase: 0.3,
                    ..StressScenario::new("liquidity_crunch", -5.0, 1.5)
                },
            ],
        }
    }
}

impl StressTestConfig {
    pub fn validate(&self) -> Result<(), RiskError> {
        check_positive("stress.frequency_hours", self.frequency_hours)?;
        check_range("stress.failure_threshold", self.failure_threshold, 0.0, 100.0)?;
        check_positive("stress.monte_carlo_iterations", self.monte_carlo_iterations as f64)?;
        if !(0.0 < self.confidence_level && self.confidence_level < 1.0) {
            return Err(invalid("stress.confidence_level", self.confidence_level, "(0, 1)"));
        }
        for scenario in &self.scenarios {
            scenario.validate()?;
        }
        Ok(())
    }
}

/// Top-level configuration for one risk-manager instance. Frozen at
/// construction; update paths re-validate before applying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskManagerConfig {
    pub limits: PortfolioLimits,
    pub sizing: SizingConfig,
    pub kill_switch: KillSwitchConfig,
    pub stress: StressTestConfig,
    /// Monitoring-loop cadence in milliseconds.
    pub risk_check_interval_ms: u64,
    /// Annualized risk-free rate used by Sharpe and Black-Litterman math.
    pub risk_free_rate: f64,
    /// Aligned return samples required before measured correlation is used.
    pub correlation_min_samples: usize,
    /// Dedup window per (kind, severity) alert key, milliseconds.
    pub alert_cooldown_ms: u64,
    /// Bounded alert-store size.
    pub max_alerts: usize,
}

impl Default for RiskManagerConfig {
    fn default() -> Self {
        Self {
            limits: PortfolioLimits::default(),
            sizing: SizingConfig::default(),
            kill_switch: KillSwitchConfig::default(),
            stress: StressTestConfig::default(),
            risk_check_interval_ms: 30_000,
            risk_free_rate: 0.02,
            correlation_min_samples: 10,
            alert_cooldown_ms: 300_000,
            max_alerts: 100,
        }
    }
}

impl RiskManagerConfig {
    pub fn validate(&self) -> Result<(), RiskError> {
        self.limits.validate()?;
        self.sizing.validate()?;
        self.kill_switch.validate()?;
        self.stress.validate()?;
        check_positive("risk_check_interval_ms", self.risk_check_interval_ms as f64)?;
        if !self.risk_free_rate.is_finite() {
            return Err(invalid("risk_free_rate", self.risk_free_rate, "finite"));
        }
        check_positive("correlation_min_samples", self.correlation_min_samples as f64)?;
        check_positive("alert_cooldown_ms", self.alert_cooldown_ms as f64)?;
        check_positive("max_alerts", self.max_alerts as f64)?;
        Ok(())
    }

    /// Load defaults with environment overrides (reads `.env` if present).
    ///
    /// Recognized vars: SENTINEL_MAX_DAILY_LOSS, SENTINEL_MAX_DRAWDOWN,
    /// SENTINEL_MAX_PORTFOLIO_RISK, SENTINEL_SCALING_METHOD,
    /// SENTINEL_EMERGENCY_CONTACTS (comma-separated).
    pub fn load_or_default() -> Self {
        let _ = dotenv::dotenv();
        let mut config = Self::default();

        if let Some(v) = env_f64("SENTINEL_MAX_DAILY_LOSS") {
            config.kill_switch.max_daily_loss = v;
        }
        if let Some(v) = env_f64("SENTINEL_MAX_DRAWDOWN") {
            config.kill_switch.max_drawdown = v;
        }
        if let Some(v) = env_f64("SENTINEL_MAX_PORTFOLIO_RISK") {
            config.limits.max_portfolio_risk = v;
        }
        if let Ok(method) = std::env::var("SENTINEL_SCALING_METHOD") {
            config.apply_scaling_override(&method);
        }
        if let Ok(contacts) = std::env::var("SENTINEL_EMERGENCY_CONTACTS") {
            config.kill_switch.emergency_contacts = contacts
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config
    }

    fn apply_scaling_override(&mut self, method: &str) {
        self.sizing.risk_scaling_method = match method {
            "fixed" => ScalingMethod::Fixed,
            "volatility" => ScalingMethod::Volatility,
            "kelly" => ScalingMethod::Kelly,
            "adaptive" => ScalingMethod::Adaptive,
            "black_litterman" => ScalingMethod::BlackLitterman,
            other => {
                tracing::warn!("Unknown SENTINEL_SCALING_METHOD '{other}' — keeping default");
                self.sizing.risk_scaling_method
            }
        };
    }
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn invalid(field: &'static str, value: f64, allowed: &str) -> RiskError {
    RiskError::InvalidConfig {
        field,
        value: format!("{value}"),
        allowed: allowed.into(),
    }
}

fn check_range(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), RiskError> {
    if !value.is_finite() || value < lo || value > hi {
        return Err(RiskError::InvalidConfig {
            field,
            value: format!("{value}"),
            allowed: format!("[{lo}, {hi}]"),
        });
    }
    Ok(())
}

fn check_positive(field: &'static str, value: f64) -> Result<(), RiskError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(field, value, "> 0"));
    }
    Ok(())
}

fn is_valid_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}
