use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ScalingMethod, SizingConfig};
use crate::error::RiskError;
use crate::events::{EventBus, RiskEvent};
use crate::metrics;
use crate::models::position::PortfolioRisk;
use crate::models::signal::{Direction, MarketData, MarketRegime, TradeSignal};
use crate::risk::volatility::{VolMethod, VolatilityCache};

const TRADING_DAYS: f64 = 252.0;
/// Baseline conditional-VaR multiplier over daily VaR.
const CVAR_BASE_MULTIPLIER: f64 = 2.063;

/// The five adjustment multipliers applied to the base size, each bounded
/// in [0.1, 2.5].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizingAdjustments {
    pub volatility: f64,
    pub liquidity: f64,
    pub correlation: f64,
    pub portfolio_risk: f64,
    pub market_regime: f64,
}

impl SizingAdjustments {
    fn neutral() -> Self {
        Self {
            volatility: 1.0,
            liquidity: 1.0,
            correlation: 1.0,
            portfolio_risk: 1.0,
            market_regime: 1.0,
        }
    }

    fn product(&self) -> f64 {
        self.volatility * self.liquidity * self.correlation * self.portfolio_risk * self.market_regime
    }

    fn mean_deviation(&self) -> f64 {
        let factors = [
            self.volatility,
            self.liquidity,
            self.correlation,
            self.portfolio_risk,
            self.market_regime,
        ];
        factors.iter().map(|f| (f - 1.0).abs()).sum::<f64>() / factors.len() as f64
    }
}

/// Fully sized candidate position. No partial results: every field is finite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingResult {
    pub symbol: String,
    pub direction: Direction,
    /// Notional USD size.
    pub position_size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub leverage: f64,
    /// USD lost if the stop is hit.
    pub risk_amount: f64,
    /// risk_amount as % of portfolio value.
    pub portfolio_risk_pct: f64,
    /// One-day 95% value-at-risk in USD.
    pub daily_var: f64,
    /// Conditional VaR (expected shortfall) in USD.
    pub conditional_var: f64,
    pub information_ratio: f64,
    /// Post-adjustment confidence in the sizing itself.
    pub confidence: f64,
    pub method: ScalingMethod,
    pub adjustments: SizingAdjustments,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct TradeOutcome {
    pnl: f64,
    success: bool,
}

/// Bounded history of completed trades feeding adaptive sizing and the
/// sizing-confidence boost.
#[derive(Debug)]
pub struct PerformanceHistory {
    outcomes: VecDeque<TradeOutcome>,
    cap: usize,
}

impl PerformanceHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(cap.min(1024)),
            cap,
        }
    }

    pub fn record(&mut self, pnl: f64, success: bool) {
        if !pnl.is_finite() {
            return;
        }
        if self.outcomes.len() >= self.cap {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(TradeOutcome { pnl, success });
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Win rate over the trailing `window` trades; `None` without history.
    pub fn win_rate(&self, window: usize) -> Option<f64> {
        if self.outcomes.is_empty() {
            return None;
        }
        let tail: Vec<_> = self.outcomes.iter().rev().take(window).collect();
        let wins = tail.iter().filter(|o| o.success).count();
        Some(wins as f64 / tail.len() as f64)
    }

    pub fn profit_factor(&self) -> f64 {
        let gains: f64 = self.outcomes.iter().filter(|o| o.pnl > 0.0).map(|o| o.pnl).sum();
        let losses: f64 = self.outcomes.iter().filter(|o| o.pnl < 0.0).map(|o| -o.pnl).sum();
        if losses == 0.0 {
            return if gains > 0.0 { 2.0 } else { 1.0 };
        }
        metrics::finite_or(gains / losses, 1.0)
    }

    /// Streak-sensitive multiplier in [0.5, 1.5]: 1.0 at a 50% win rate.
    pub fn performance_multiplier(&self, window: usize) -> f64 {
        match self.win_rate(window) {
            Some(rate) => (0.5 + rate).clamp(0.5, 1.5),
            None => 1.0,
        }
    }

    pub fn realized_pnls(&self) -> Vec<f64> {
        self.outcomes.iter().map(|o| o.pnl).collect()
    }
}

/// Computes a sized position for a proposed trade against the live portfolio
/// risk picture. Pure computation plus two side effects: a volatility-cache
/// refresh and a `position-sized` event.
pub struct SizingEngine {
    config: SizingConfig,
    risk_free_rate: f64,
    portfolio_value: f64,
    cache: Arc<VolatilityCache>,
    history: PerformanceHistory,
    bus: EventBus,
}

impl SizingEngine {
    pub fn new(
        config: SizingConfig,
        risk_free_rate: f64,
        portfolio_value: f64,
        cache: Arc<VolatilityCache>,
        bus: EventBus,
    ) -> Self {
        let history = PerformanceHistory::new(config.max_position_history as usize);
        Self {
            config,
            risk_free_rate,
            portfolio_value,
            cache,
            history,
            bus,
        }
    }

    pub fn set_portfolio_value(&mut self, value: f64) {
        if value.is_finite() && value > 0.0 {
            self.portfolio_value = value;
        }
    }

    pub fn portfolio_value(&self) -> f64 {
        self.portfolio_value
    }

    pub fn record_trade_result(&mut self, pnl: f64, success: bool) {
        self.history.record(pnl, success);
    }

    pub fn history(&self) -> &PerformanceHistory {
        &self.history
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: SizingConfig) -> Result<(), RiskError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Size a candidate trade. Fail-closed: any error leaves no trace beyond
    /// the volatility-cache refresh.
    pub fn size(
        &self,
        symbol: &str,
        signal: &TradeSignal,
        market: &MarketData,
        portfolio_risk: &PortfolioRisk,
    ) -> Result<SizingResult, RiskError> {
        if symbol.is_empty() {
            return Err(RiskError::invalid_input("symbol is empty"));
        }
        signal.validate()?;
        market.validate()?;

        let volatility = self.resolve_volatility(symbol, market);
        let base = self.base_size(signal, volatility);

        let adjustments = if self.config.enable_dynamic_sizing {
            self.adjustments(signal, market, portfolio_risk, volatility)
        } else {
            SizingAdjustments::neutral()
        };

        let adjusted = base * adjustments.product();
        if !adjusted.is_finite() {
            return Err(RiskError::invalid_input("computed size is not finite"));
        }

        let position_size = self.apply_limits(adjusted, portfolio_risk)?;

        // Stop distance scales with daily volatility, widened for weak
        // confidence and tightened for strong signals; capped at 15%.
        let daily_vol = volatility * (1.0 / TRADING_DAYS).sqrt();
        let stop_distance = (daily_vol
            * (1.0 + (1.0 - signal.confidence) * 0.5)
            * (1.5 - 0.5 * signal.signal_strength)
            * 2.0)
            .min(0.15);
        let (stop_loss, take_profit) = match signal.direction {
            Direction::Long => (
                market.price * (1.0 - stop_distance),
                market.price * (1.0 + signal.expected_return.abs()),
            ),
            Direction::Short => (
                market.price * (1.0 + stop_distance),
                market.price * (1.0 - signal.expected_return.abs()),
            ),
        };

        let risk_amount = position_size * stop_distance;
        let portfolio_risk_pct = risk_amount / self.portfolio_value * 100.0;
        let daily_var = position_size * daily_vol * metrics::z_score(0.95);
        let conditional_var = daily_var * self.cvar_multiplier(market);
        let information_ratio = self.information_ratio(position_size, signal, daily_vol);
        let leverage = (adjustments.portfolio_risk * adjustments.market_regime).clamp(0.25, 2.0);
        let confidence = self.sizing_confidence(signal, market, &adjustments);

        let result = SizingResult {
            symbol: symbol.to_string(),
            direction: signal.direction,
            position_size,
            stop_loss: metrics::finite_or(stop_loss, market.price),
            take_profit: metrics::finite_or(take_profit, market.price),
            leverage,
            risk_amount: metrics::finite_or(risk_amount, 0.0),
            portfolio_risk_pct: metrics::finite_or(portfolio_risk_pct, 0.0),
            daily_var: metrics::finite_or(daily_var, 0.0),
            conditional_var: metrics::finite_or(conditional_var, 0.0),
            information_ratio: metrics::finite_or(information_ratio, 0.0),
            confidence,
            method: self.config.risk_scaling_method,
            adjustments,
            timestamp: Utc::now(),
        };

        debug!(
            "sized {symbol}: {:.2} USD ({:?}, stop {:.4}, tp {:.4})",
            result.position_size, result.method, result.stop_loss, result.take_profit
        );
        self.bus.publish(RiskEvent::PositionSized(result.clone()));

        Ok(result)
    }

    /// Cache lookup with write-back on miss.
    fn resolve_volatility(&self, symbol: &str, market: &MarketData) -> f64 {
        if self.config.enable_volatility_caching {
            if let Some(entry) = self.cache.get(symbol) {
                return entry.volatility;
            }
            self.cache.insert(
                symbol,
                market.volatility,
                market.volume_24h,
                market.liquidity,
                VolMethod::Market,
            );
        }
        market.volatility
    }

    fn fixed_base(&self) -> f64 {
        self.portfolio_value * self.config.base_risk_per_trade / 100.0
    }

    fn base_size(&self, signal: &TradeSignal, volatility: f64) -> f64 {
        let base = self.fixed_base();
        match self.config.risk_scaling_method {
            ScalingMethod::Fixed => base,
            ScalingMethod::Volatility => base / (volatility / 0.3).clamp(0.1, 2.0),
            ScalingMethod::Kelly => {
                let win_prob = (signal.confidence * (1.0 + 0.1 * signal.signal_strength)).min(1.0);
                let avg_loss = -signal.expected_return / signal.risk_reward;
                let kelly = metrics::kelly_fraction(win_prob, signal.expected_return, avg_loss);
                let fraction =
                    (kelly * 0.25 * signal.confidence).clamp(0.0, self.config.kelly_fraction_cap);
                self.portfolio_value * fraction
            }
            ScalingMethod::Adaptive => {
                let performance = self
                    .history
                    .performance_multiplier(self.config.adaptive_performance_window as usize);
                base * performance
                    * (0.5 + 0.5 * signal.confidence)
                    * (0.8 + 0.4 * signal.signal_strength)
            }
            ScalingMethod::BlackLitterman => {
                let daily_vol = volatility / TRADING_DAYS.sqrt();
                let variance = (daily_vol * daily_vol).max(1e-10);
                let view = ((signal.expected_return - self.risk_free_rate) / (3.0 * variance))
                    .clamp(0.0, 1.0);
                let weight = 0.5 * 0.10 + 0.5 * view;
                self.portfolio_value * metrics::finite_or(weight, 0.0)
            }
        }
    }

    fn adjustments(
        &self,
        signal: &TradeSignal,
        market: &MarketData,
        portfolio_risk: &PortfolioRisk,
        volatility: f64,
    ) -> SizingAdjustments {
        let volatility_adj = if volatility > 0.0 {
            (0.3 / volatility).clamp(0.1, 2.5)
        } else {
            1.0
        };

        let liquidity_adj = (0.7 + 0.3 * market.liquidity - 2.0 * market.spread).clamp(0.1, 2.5);

        let correlation_adj = {
            let c = portfolio_risk.correlation;
            let threshold = self.config.correlation_threshold;
            if c <= threshold || threshold >= 1.0 {
                1.0
            } else {
                (1.0 - (c - threshold) / (1.0 - threshold) * 0.5).clamp(0.1, 2.5)
            }
        };

        let portfolio_adj = (1.0 - portfolio_risk.total_risk / 50.0).clamp(0.1, 2.5);

        let mut regime_adj: f64 = match signal.market_regime {
            Some(MarketRegime::Volatile) => 0.7,
            Some(MarketRegime::Sideways) => 1.2,
            _ => 1.0,
        };
        if market.skewness.map(|s| s.abs() > 1.0).unwrap_or(false) {
            regime_adj *= 0.9;
        }
        if market.kurtosis.map(|k| k > 4.0).unwrap_or(false) {
            regime_adj *= 0.85;
        }

        SizingAdjustments {
            volatility: volatility_adj,
            liquidity: liquidity_adj,
            correlation: correlation_adj,
            portfolio_risk: portfolio_adj,
            market_regime: regime_adj.clamp(0.1, 2.5),
        }
    }

    /// Floor, per-position cap, then the remaining daily-risk budget, in that
    /// order. Ending below the floor is a rejection, not a clamp.
    fn apply_limits(&self, size: f64, portfolio_risk: &PortfolioRisk) -> Result<f64, RiskError> {
        let floor = self.config.min_position_size;
        let cap = self.portfolio_value * self.config.max_position_size / 100.0;
        let budget = self.portfolio_value
            * (self.config.max_daily_risk - portfolio_risk.daily_risk).max(0.0)
            / 100.0;

        let limited = size.max(floor).min(cap).min(budget);
        if limited < floor {
            return Err(RiskError::LimitExceeded {
                limit: "daily_risk_budget",
                current: limited,
                threshold: floor,
            });
        }
        Ok(limited)
    }

    fn cvar_multiplier(&self, market: &MarketData) -> f64 {
        let mut multiplier = CVAR_BASE_MULTIPLIER;
        if market.skewness.map(|s| s.abs() > 1.0).unwrap_or(false) {
            multiplier *= 1.1;
        }
        if market.kurtosis.map(|k| k > 4.0).unwrap_or(false) {
            multiplier *= 1.1;
        }
        if market.liquidity < 0.5 {
            multiplier *= 1.1;
        }
        multiplier
    }

    fn information_ratio(&self, size: f64, signal: &TradeSignal, daily_vol: f64) -> f64 {
        let daily_rf = self.risk_free_rate / TRADING_DAYS;
        let edge = signal.expected_return * signal.confidence - daily_rf;
        (size / self.portfolio_value) * edge / (daily_vol * 0.5).max(0.001)
    }

    fn sizing_confidence(
        &self,
        signal: &TradeSignal,
        market: &MarketData,
        adjustments: &SizingAdjustments,
    ) -> f64 {
        let mut confidence = signal.confidence;
        if market.volume_24h > 1_000_000.0 {
            confidence += 0.05;
        }
        if market.liquidity > 0.7 {
            confidence += 0.05;
        }
        if market.spread < 0.01 {
            confidence += 0.05;
        }
        confidence *= 1.0 - adjustments.mean_deviation() * 0.2;
        if let Some(rate) = self
            .history
            .win_rate(self.config.adaptive_performance_window as usize)
        {
            if rate > 0.55 {
                confidence += 0.05;
            }
        }
        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SizingConfig;
    use approx::assert_relative_eq;

    fn engine_with(config: SizingConfig) -> SizingEngine {
        let cache = Arc::new(VolatilityCache::new(
            config.volatility_cache_ttl_ms,
            252,
            10,
        ));
        SizingEngine::new(config, 0.02, 100_000.0, cache, EventBus::new(16))
    }

    fn strong_signal() -> TradeSignal {
        TradeSignal {
            direction: Direction::Long,
            confidence: 1.0,
            expected_return: 0.05,
            risk_reward: 2.0,
            time_horizon: 24.0,
            signal_strength: 1.0,
            market_regime: None,
        }
    }

    fn benign_market() -> MarketData {
        MarketData {
            price: 100.0,
            volume_24h: 2_000_000.0,
            volatility: 0.3,
            liquidity: 1.0,
            spread: 0.0,
            beta: None,
            skewness: None,
            kurtosis: None,
        }
    }

    #[test]
    fn test_fixed_sizing_two_percent() {
        let config = SizingConfig {
            risk_scaling_method: ScalingMethod::Fixed,
            ..Default::default()
        };
        let engine = engine_with(config);
        let result = engine
            .size("BTC-USD", &strong_signal(), &benign_market(), &PortfolioRisk::default())
            .expect("sized");

        assert_relative_eq!(result.position_size, 2_000.0, epsilon = 1.0);
        assert_relative_eq!(result.leverage, 1.0, epsilon = 1e-9);
        assert!(result.stop_loss < 100.0);
        assert_relative_eq!(result.take_profit, 105.0, epsilon = 1e-6);
    }

    #[test]
    fn test_volatility_scaling_shrinks_in_high_vol() {
        let config = SizingConfig {
            risk_scaling_method: ScalingMethod::Volatility,
            enable_dynamic_sizing: false,
            enable_volatility_caching: false,
            ..Default::default()
        };
        let engine = engine_with(config);

        let calm = engine
            .size("A", &strong_signal(), &benign_market(), &PortfolioRisk::default())
            .unwrap();
        let mut stormy_market = benign_market();
        stormy_market.volatility = 0.6;
        let stormy = engine
            .size("B", &strong_signal(), &stormy_market, &PortfolioRisk::default())
            .unwrap();

        assert!(stormy.position_size < calm.position_size);
        assert_relative_eq!(stormy.position_size, calm.position_size / 2.0, epsilon = 1.0);
    }

    #[test]
    fn test_kelly_respects_cap() {
        let config = SizingConfig {
            risk_scaling_method: ScalingMethod::Kelly,
            kelly_fraction_cap: 0.05,
            ..Default::default()
        };
        let engine = engine_with(config);
        let result = engine
            .size("BTC-USD", &strong_signal(), &benign_market(), &PortfolioRisk::default())
            .expect("sized");

        assert!(result.position_size <= 100_000.0 * 0.05 + 1e-6);
    }

    #[test]
    fn test_size_bounds_property() {
        let engine = engine_with(SizingConfig::default());
        let config = engine.config().clone();
        let mut signal = strong_signal();

        for confidence in [0.2, 0.5, 0.8, 1.0] {
            signal.confidence = confidence;
            let result = engine
                .size("ETH-USD", &signal, &benign_market(), &PortfolioRisk::default())
                .expect("sized");
            assert!(result.position_size >= config.min_position_size);
            assert!(result.position_size <= 100_000.0 * config.max_position_size / 100.0);
            assert!(result.position_size.is_finite());
        }
    }

    #[test]
    fn test_exhausted_daily_budget_rejects() {
        let engine = engine_with(SizingConfig::default());
        let portfolio_risk = PortfolioRisk {
            daily_risk: 5.0, // equal to max_daily_risk → zero budget
            ..Default::default()
        };
        let err = engine
            .size("BTC-USD", &strong_signal(), &benign_market(), &portfolio_risk)
            .unwrap_err();
        assert!(matches!(err, RiskError::LimitExceeded { .. }));
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let engine = engine_with(SizingConfig::default());

        let mut signal = strong_signal();
        signal.confidence = f64::NAN;
        assert!(matches!(
            engine.size("BTC-USD", &signal, &benign_market(), &PortfolioRisk::default()),
            Err(RiskError::InvalidInput(_))
        ));

        assert!(matches!(
            engine.size("", &strong_signal(), &benign_market(), &PortfolioRisk::default()),
            Err(RiskError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_short_levels_mirror_long() {
        let engine = engine_with(SizingConfig::default());
        let mut signal = strong_signal();
        signal.direction = Direction::Short;
        let result = engine
            .size("BTC-USD", &signal, &benign_market(), &PortfolioRisk::default())
            .expect("sized");

        assert!(result.stop_loss > 100.0);
        assert!(result.take_profit < 100.0);
    }

    #[test]
    fn test_volatile_regime_damps_size() {
        let engine = engine_with(SizingConfig::default());
        let calm = engine
            .size("A", &strong_signal(), &benign_market(), &PortfolioRisk::default())
            .unwrap();

        let mut signal = strong_signal();
        signal.market_regime = Some(MarketRegime::Volatile);
        let volatile = engine
            .size("B", &signal, &benign_market(), &PortfolioRisk::default())
            .unwrap();

        assert!(volatile.position_size < calm.position_size);
        assert_relative_eq!(volatile.adjustments.market_regime, 0.7, epsilon = 1e-9);
    }

    #[test]
    fn test_adaptive_uses_performance_history() {
        let config = SizingConfig {
            risk_scaling_method: ScalingMethod::Adaptive,
            ..Default::default()
        };
        let mut engine = engine_with(config);
        let cold = engine
            .size("A", &strong_signal(), &benign_market(), &PortfolioRisk::default())
            .unwrap();

        for _ in 0..20 {
            engine.record_trade_result(50.0, true);
        }
        let hot = engine
            .size("B", &strong_signal(), &benign_market(), &PortfolioRisk::default())
            .unwrap();

        assert!(
            hot.position_size > cold.position_size,
            "a winning streak should scale size up: {} vs {}",
            hot.position_size,
            cold.position_size
        );
    }

    #[test]
    fn test_performance_history_bounds() {
        let mut history = PerformanceHistory::new(10);
        for i in 0..25 {
            history.record(if i % 2 == 0 { 10.0 } else { -5.0 }, i % 2 == 0);
        }
        assert_eq!(history.len(), 10);
        let multiplier = history.performance_multiplier(20);
        assert!((0.5..=1.5).contains(&multiplier));
    }
}
