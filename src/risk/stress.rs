use chrono::Utc;
use rand::distributions::Distribution;
use rand::thread_rng;
use statrs::distribution::Normal;

use crate::config::StressScenario;
use crate::metrics;
use crate::models::position::Position;
use crate::models::report::{MonteCarloResult, PositionImpact, StressTestResult};

const TRADING_DAYS: f64 = 252.0;
/// Annualized volatility assumed for positions that carry no estimate.
const DEFAULT_VOLATILITY: f64 = 0.3;

/// Apply one deterministic scenario to the current book.
///
/// Each position is shocked adversely for its direction; PnL is the price
/// delta times the unit count (size / entry price). Pure computation — the
/// caller owns event emission and alerting.
pub fn run_scenario(
    scenario: &StressScenario,
    positions: &[Position],
    portfolio_value: f64,
    failure_threshold: f64,
) -> StressTestResult {
    let mut total_pnl = 0.0;
    let mut worst_case_var = 0.0;
    let mut impacts = Vec::with_capacity(positions.len());

    for position in positions {
        let sign = position.direction.sign();
        let shocked_price = position.current_price * (1.0 + sign * scenario.market_shock / 100.0);
        let units = position.size / position.entry_price;
        let pnl = (shocked_price - position.current_price) * units * sign;
        let pnl = metrics::finite_or(pnl, 0.0);

        total_pnl += pnl;
        worst_case_var += pnl.abs() * scenario.volatility_multiplier;
        impacts.push(PositionImpact {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            shocked_price: metrics::finite_or(shocked_price, position.current_price),
            pnl,
        });
    }

    let total_loss = (-total_pnl).max(0.0);
    let loss_pct = if portfolio_value > 0.0 {
        metrics::finite_or(total_loss / portfolio_value * 100.0, 0.0)
    } else {
        0.0
    };
    let worst_case_var_pct = if portfolio_value > 0.0 {
        metrics::finite_or(worst_case_var / portfolio_value * 100.0, 0.0)
    } else {
        0.0
    };

    StressTestResult {
        scenario: scenario.name.clone(),
        total_loss,
        loss_pct,
        worst_case_var_pct,
        passed: loss_pct <= failure_threshold,
        time_to_recovery_days: (loss_pct / 2.0).ceil().max(0.0) as u32,
        position_impacts: impacts,
        timestamp: Utc::now(),
    }
}

/// Monte-Carlo stress variant: simulate correlated one-day returns with a
/// single-factor model and report the loss distribution as % of portfolio.
pub fn monte_carlo(
    positions: &[Position],
    portfolio_value: f64,
    iterations: u32,
    confidence_level: f64,
    avg_correlation: f64,
) -> MonteCarloResult {
    let normal = Normal::new(0.0, 1.0).expect("valid normal distribution");
    let mut rng = thread_rng();
    let rho = avg_correlation.clamp(0.0, 1.0);
    let common_weight = rho.sqrt();
    let idio_weight = (1.0 - rho).sqrt();

    let mut losses = Vec::with_capacity(iterations as usize);
    for _ in 0..iterations {
        let common = normal.sample(&mut rng);
        let mut pnl = 0.0;
        for position in positions {
            let daily_vol =
                position.volatility.unwrap_or(DEFAULT_VOLATILITY) / TRADING_DAYS.sqrt();
            let idio = normal.sample(&mut rng);
            let ret = (common_weight * common + idio_weight * idio) * daily_vol;
            pnl += ret * position.size * position.direction.sign();
        }
        let loss_pct = if portfolio_value > 0.0 {
            ((-pnl).max(0.0) / portfolio_value * 100.0).min(100.0)
        } else {
            0.0
        };
        losses.push(metrics::finite_or(loss_pct, 0.0));
    }

    losses.sort_by(|a, b| a.partial_cmp(b).expect("finite losses"));
    let expected = if losses.is_empty() {
        0.0
    } else {
        losses.iter().sum::<f64>() / losses.len() as f64
    };

    MonteCarloResult {
        iterations,
        expected_loss_pct: expected,
        worst_case_pct: percentile(&losses, confidence_level),
        ci_95: (percentile(&losses, 0.025), percentile(&losses, 0.975)),
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((q * sorted.len() as f64) as usize).min(sorted.len() - 1);
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::signal::Direction;
    use approx::assert_relative_eq;

    fn long_position(size: f64, entry: f64) -> Position {
        Position::new("p1", "BTC-USD", size, Direction::Long, entry)
    }

    #[test]
    fn test_crash_scenario_half_allocated_book() {
        // 50% allocation, 20% crash → 10% portfolio loss, 20% worst-case VaR
        let scenario = StressScenario::new("market_crash", -20.0, 2.0);
        let positions = vec![long_position(50_000.0, 100.0)];

        let result = run_scenario(&scenario, &positions, 100_000.0, 20.0);
        assert_relative_eq!(result.loss_pct, 10.0, epsilon = 1e-9);
        assert_relative_eq!(result.worst_case_var_pct, 20.0, epsilon = 1e-9);
        assert!(result.passed);
        assert_eq!(result.time_to_recovery_days, 5);
        assert_eq!(result.position_impacts.len(), 1);
        assert_relative_eq!(result.position_impacts[0].pnl, -10_000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_failure_threshold() {
        let scenario = StressScenario::new("deep_crash", -40.0, 2.0);
        let positions = vec![long_position(60_000.0, 100.0)];

        let result = run_scenario(&scenario, &positions, 100_000.0, 20.0);
        assert_relative_eq!(result.loss_pct, 24.0, epsilon = 1e-9);
        assert!(!result.passed);
        assert_eq!(result.time_to_recovery_days, 12);
    }

    #[test]
    fn test_shock_is_adverse_for_shorts_too() {
        let scenario = StressScenario::new("crash", -20.0, 1.0);
        let mut short = long_position(10_000.0, 100.0);
        short.direction = Direction::Short;

        let result = run_scenario(&scenario, &[short], 100_000.0, 20.0);
        assert!(
            result.total_loss > 0.0,
            "a stress scenario must hurt shorts as well, got {}",
            result.total_loss
        );
    }

    #[test]
    fn test_empty_book_passes() {
        let scenario = StressScenario::new("crash", -20.0, 2.0);
        let result = run_scenario(&scenario, &[], 100_000.0, 20.0);
        assert_eq!(result.loss_pct, 0.0);
        assert!(result.passed);
        assert_eq!(result.time_to_recovery_days, 0);
    }

    #[test]
    fn test_monte_carlo_distribution_shape() {
        let mut position = long_position(50_000.0, 100.0);
        position.volatility = Some(0.5);
        let result = monte_carlo(&[position], 100_000.0, 500, 0.99, 0.5);

        assert_eq!(result.iterations, 500);
        assert!(result.expected_loss_pct >= 0.0);
        assert!(result.worst_case_pct >= result.expected_loss_pct);
        assert!(result.ci_95.0 <= result.ci_95.1);
        assert!(result.worst_case_pct.is_finite());
    }

    #[test]
    fn test_monte_carlo_empty_book() {
        let result = monte_carlo(&[], 100_000.0, 100, 0.99, 0.5);
        assert_eq!(result.expected_loss_pct, 0.0);
        assert_eq!(result.worst_case_pct, 0.0);
    }
}
