use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::Direction;
use crate::error::RiskError;

/// A tracked open exposure. Owned exclusively by the risk manager; external
/// callers see clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    /// Notional USD size; sign convention follows `direction`.
    pub size: f64,
    pub direction: Direction,
    pub entry_price: f64,
    pub current_price: f64,
    pub pnl: f64,
    /// USD at risk if the stop is hit.
    pub risk_amount: f64,
    pub sector: Option<String>,
    pub beta: Option<f64>,
    pub volatility: Option<f64>,
    /// Liquidity score in [0, 1].
    pub liquidity_score: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, size: f64, direction: Direction, entry_price: f64) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            symbol: symbol.into(),
            size,
            direction,
            entry_price,
            current_price: entry_price,
            pnl: 0.0,
            risk_amount: 0.0,
            sector: None,
            beta: None,
            volatility: None,
            liquidity_score: None,
            opened_at: now,
            updated_at: now,
        }
    }

    /// Absolute notional exposure.
    pub fn exposure(&self) -> f64 {
        self.size.abs()
    }

    /// Price move from entry, signed by direction, as a percentage.
    pub fn price_move_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.current_price / self.entry_price - 1.0) * 100.0
    }

    pub fn validate(&self) -> Result<(), RiskError> {
        if self.symbol.is_empty() {
            return Err(RiskError::invalid_input("position.symbol is empty"));
        }
        let fields = [
            ("size", self.size),
            ("entry_price", self.entry_price),
            ("current_price", self.current_price),
            ("pnl", self.pnl),
            ("risk_amount", self.risk_amount),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(RiskError::invalid_input(format!("position.{name} is not finite")));
            }
        }
        if self.entry_price <= 0.0 || self.current_price <= 0.0 {
            return Err(RiskError::invalid_input("position prices must be positive"));
        }
        if self.risk_amount < 0.0 {
            return Err(RiskError::invalid_input("position.risk_amount must be non-negative"));
        }
        if let Some(score) = self.liquidity_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(RiskError::invalid_input("position.liquidity_score outside [0, 1]"));
            }
        }
        Ok(())
    }
}

/// Partial update for an open position; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionPatch {
    pub size: Option<f64>,
    pub current_price: Option<f64>,
    pub pnl: Option<f64>,
    pub risk_amount: Option<f64>,
    pub sector: Option<String>,
    pub beta: Option<f64>,
    pub volatility: Option<f64>,
    pub liquidity_score: Option<f64>,
}

impl PositionPatch {
    pub fn apply(&self, position: &mut Position) {
        if let Some(size) = self.size {
            position.size = size;
        }
        if let Some(price) = self.current_price {
            position.current_price = price;
        }
        if let Some(pnl) = self.pnl {
            position.pnl = pnl;
        }
        if let Some(risk) = self.risk_amount {
            position.risk_amount = risk;
        }
        if let Some(sector) = &self.sector {
            position.sector = Some(sector.clone());
        }
        if let Some(beta) = self.beta {
            position.beta = Some(beta);
        }
        if let Some(vol) = self.volatility {
            position.volatility = Some(vol);
        }
        if let Some(score) = self.liquidity_score {
            position.liquidity_score = Some(score);
        }
        position.updated_at = Utc::now();
    }
}

/// Derived portfolio-level risk snapshot. All percentages are of portfolio
/// value; recomputed on demand, never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioRisk {
    /// Σ risk_amount / portfolio value × 100.
    pub total_risk: f64,
    /// |Σ pnl| / portfolio value × 100.
    pub daily_risk: f64,
    /// Largest single exposure / portfolio value × 100.
    pub concentration: f64,
    /// Average pairwise absolute return correlation in [0, 1].
    pub correlation: f64,
    /// Σ |size| / portfolio value.
    pub leverage: f64,
    /// Size-weighted illiquidity in [0, 100].
    pub liquidity_risk: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_validation() {
        let p = Position::new("p1", "BTC-USD", 1_000.0, Direction::Long, 50_000.0);
        assert!(p.validate().is_ok());

        let mut bad = p.clone();
        bad.entry_price = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = p.clone();
        bad.symbol = String::new();
        assert!(bad.validate().is_err());

        let mut bad = p;
        bad.pnl = f64::INFINITY;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_patch_merges_only_set_fields() {
        let mut p = Position::new("p1", "ETH-USD", 500.0, Direction::Short, 2_000.0);
        let patch = PositionPatch {
            current_price: Some(1_900.0),
            pnl: Some(25.0),
            ..Default::default()
        };
        patch.apply(&mut p);
        assert_eq!(p.current_price, 1_900.0);
        assert_eq!(p.pnl, 25.0);
        assert_eq!(p.size, 500.0);
        assert_eq!(p.entry_price, 2_000.0);
    }

    #[test]
    fn test_price_move_pct() {
        let mut p = Position::new("p1", "SOL-USD", 100.0, Direction::Long, 100.0);
        p.current_price = 110.0;
        assert!((p.price_move_pct() - 10.0).abs() < 1e-9);
    }
}
