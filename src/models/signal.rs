use serde::{Deserialize, Serialize};

use crate::error::RiskError;

/// Trade direction for a position or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, −1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

/// Broad market regime supplied by the signal source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Bull,
    Bear,
    Sideways,
    Volatile,
}

/// A candidate-trade signal handed to the sizing engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub direction: Direction,
    /// Win-probability estimate in [0, 1].
    pub confidence: f64,
    /// Expected move over the horizon, fraction in (−1, 1).
    pub expected_return: f64,
    /// Reward-to-risk ratio, must be positive.
    pub risk_reward: f64,
    /// Holding horizon in hours.
    pub time_horizon: f64,
    /// Conviction in [0, 1], scales sizing aggressiveness.
    pub signal_strength: f64,
    pub market_regime: Option<MarketRegime>,
}

impl TradeSignal {
    pub fn validate(&self) -> Result<(), RiskError> {
        let fields = [
            ("confidence", self.confidence),
            ("expected_return", self.expected_return),
            ("risk_reward", self.risk_reward),
            ("time_horizon", self.time_horizon),
            ("signal_strength", self.signal_strength),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(RiskError::invalid_input(format!("signal.{name} is not finite")));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(RiskError::invalid_input("signal.confidence outside [0, 1]"));
        }
        if self.expected_return <= -1.0 || self.expected_return >= 1.0 {
            return Err(RiskError::invalid_input("signal.expected_return outside (-1, 1)"));
        }
        if self.risk_reward <= 0.0 {
            return Err(RiskError::invalid_input("signal.risk_reward must be positive"));
        }
        if !(0.0..=1.0).contains(&self.signal_strength) {
            return Err(RiskError::invalid_input("signal.signal_strength outside [0, 1]"));
        }
        Ok(())
    }
}

/// Market snapshot for the symbol being sized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub price: f64,
    pub volume_24h: f64,
    /// Annualized volatility, e.g. 0.3 for 30%.
    pub volatility: f64,
    /// Liquidity score in [0, 1].
    pub liquidity: f64,
    /// Relative bid-ask spread in [0, 1].
    pub spread: f64,
    pub beta: Option<f64>,
    pub skewness: Option<f64>,
    pub kurtosis: Option<f64>,
}

impl MarketData {
    pub fn validate(&self) -> Result<(), RiskError> {
        let fields = [
            ("price", self.price),
            ("volume_24h", self.volume_24h),
            ("volatility", self.volatility),
            ("liquidity", self.liquidity),
            ("spread", self.spread),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(RiskError::invalid_input(format!("market.{name} is not finite")));
            }
        }
        if self.price <= 0.0 {
            return Err(RiskError::invalid_input("market.price must be positive"));
        }
        if self.volume_24h < 0.0 || self.volatility < 0.0 {
            return Err(RiskError::invalid_input(
                "market.volume_24h/volatility must be non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.liquidity) || !(0.0..=1.0).contains(&self.spread) {
            return Err(RiskError::invalid_input("market.liquidity/spread outside [0, 1]"));
        }
        for (name, value) in [
            ("beta", self.beta),
            ("skewness", self.skewness),
            ("kurtosis", self.kurtosis),
        ] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(RiskError::invalid_input(format!("market.{name} is not finite")));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_signal() -> TradeSignal {
        TradeSignal {
            direction: Direction::Long,
            confidence: 0.8,
            expected_return: 0.05,
            risk_reward: 2.0,
            time_horizon: 24.0,
            signal_strength: 0.7,
            market_regime: None,
        }
    }

    #[test]
    fn test_signal_validation() {
        assert!(valid_signal().validate().is_ok());

        let mut s = valid_signal();
        s.confidence = 1.5;
        assert!(s.validate().is_err());

        let mut s = valid_signal();
        s.expected_return = f64::NAN;
        assert!(s.validate().is_err());

        let mut s = valid_signal();
        s.risk_reward = 0.0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_market_data_validation() {
        let market = MarketData {
            price: 100.0,
            volume_24h: 2_000_000.0,
            volatility: 0.3,
            liquidity: 0.9,
            spread: 0.001,
            beta: None,
            skewness: None,
            kurtosis: None,
        };
        assert!(market.validate().is_ok());

        let mut m = market.clone();
        m.price = 0.0;
        assert!(m.validate().is_err());

        let mut m = market;
        m.spread = 1.2;
        assert!(m.validate().is_err());
    }
}
