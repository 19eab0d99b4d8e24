use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Pure statistical primitives over return series.
///
/// Every function documents its fallback for empty input; non-finite inputs
/// take the same fallback. Nothing here returns NaN or infinity.

/// Risk classification relative to a configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

fn all_finite(xs: &[f64]) -> bool {
    xs.iter().all(|x| x.is_finite())
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn stdev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Annualized-return Sharpe ratio: (mean − rf) / stdev.
/// Falls back to 0 on an empty series or zero deviation.
pub fn sharpe(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.is_empty() || !all_finite(returns) || !risk_free_rate.is_finite() {
        return 0.0;
    }
    let sd = stdev(returns);
    if sd == 0.0 {
        return 0.0;
    }
    (mean(returns) - risk_free_rate) / sd
}

/// Maximum relative dip of the running cumulative return from its peak.
/// Falls back to 0 on an empty series.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    if returns.is_empty() || !all_finite(returns) {
        return 0.0;
    }
    let mut cumulative = 0.0;
    let mut peak = 0.0;
    let mut worst = 0.0f64;
    for r in returns {
        cumulative += r;
        if cumulative > peak {
            peak = cumulative;
        }
        if peak > 0.0 {
            worst = worst.max((peak - cumulative) / peak);
        }
    }
    worst
}

/// Historical value-at-risk: the return at the (1 − confidence) quantile.
/// Falls back to 0 on an empty series; the index is clamped to [0, n − 1].
pub fn var(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() || !all_finite(returns) || !confidence.is_finite() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite returns"));
    let idx = (((1.0 - confidence) * sorted.len() as f64).floor() as usize)
        .min(sorted.len() - 1);
    sorted[idx]
}

/// Expected shortfall: mean return in the tail at or below the VaR quantile.
/// Falls back to 0 on an empty series.
pub fn expected_shortfall(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() || !all_finite(returns) || !confidence.is_finite() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite returns"));
    let cut = (((1.0 - confidence) * sorted.len() as f64).floor() as usize)
        .min(sorted.len() - 1);
    mean(&sorted[..=cut])
}

/// Pearson correlation. Falls back to 0 on a length mismatch, an empty
/// series, or zero variance on either side.
pub fn correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 || !all_finite(x) || !all_finite(y) {
        return 0.0;
    }
    let mx = mean(x);
    let my = mean(y);
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for i in 0..x.len() {
        let dx = x[i] - mx;
        let dy = y[i] - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx == 0.0 || vy == 0.0 {
        return 0.0;
    }
    cov / (vx.sqrt() * vy.sqrt())
}

/// Kelly optimal fraction with a 0.25 safety factor baked in.
///
/// f* = (b·p − q) / b with b = |avg_win / avg_loss|, then scaled by 0.25 and
/// capped so the effective maximum allocation is 0.0625. Falls back to 0 when
/// avg_loss is zero or any input is non-finite.
pub fn kelly_fraction(win_prob: f64, avg_win: f64, avg_loss: f64) -> f64 {
    if !win_prob.is_finite() || !avg_win.is_finite() || !avg_loss.is_finite() {
        return 0.0;
    }
    if avg_loss == 0.0 {
        return 0.0;
    }
    let b = (avg_win / avg_loss).abs();
    if b == 0.0 {
        return 0.0;
    }
    let kelly = (b * win_prob - (1.0 - win_prob)) / b;
    (kelly * 0.25).clamp(0.0, 0.0625)
}

/// Herfindahl concentration index: Σ wᵢ². Falls back to 0 on empty input.
pub fn herfindahl(weights: &[f64]) -> f64 {
    if !all_finite(weights) {
        return 0.0;
    }
    weights.iter().map(|w| w * w).sum()
}

/// Classify a risk reading against its ceiling.
pub fn classify_risk(value: f64, max: f64) -> RiskLevel {
    if !value.is_finite() || !max.is_finite() || max <= 0.0 {
        return RiskLevel::Critical;
    }
    match value {
        v if v <= 0.5 * max => RiskLevel::Low,
        v if v <= 0.75 * max => RiskLevel::Medium,
        v if v <= max => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

/// One-sided standard normal z-score for a confidence level (e.g. 0.95 → 1.645).
pub fn z_score(confidence: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).expect("valid normal distribution");
    normal.inverse_cdf(confidence.clamp(0.5, 0.9999))
}

/// Replace a non-finite intermediate with its fallback.
pub fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sharpe_zero_stdev() {
        assert_eq!(sharpe(&[0.05, 0.05, 0.05], 0.02), 0.0);
        assert_eq!(sharpe(&[], 0.02), 0.0);
    }

    #[test]
    fn test_sharpe_positive() {
        let returns = [0.05, 0.07, 0.03, 0.06, 0.04];
        let s = sharpe(&returns, 0.02);
        assert!(s > 0.0, "positive excess returns should have positive Sharpe, got {s}");
    }

    #[test]
    fn test_max_drawdown_monotonic_gain() {
        assert_eq!(max_drawdown(&[0.01, 0.02, 0.03]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_max_drawdown_dip() {
        // Climb to 0.10, drop to 0.05 → 50% dip from peak
        let dd = max_drawdown(&[0.10, -0.05]);
        assert_relative_eq!(dd, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_var_quantile() {
        let returns = [-0.05, 0.01, 0.02, -0.03, 0.04, 0.00, -0.01, 0.03, 0.02, 0.01];
        // 95% confidence on 10 samples → index 0 → worst return
        assert_relative_eq!(var(&returns, 0.95), -0.05, epsilon = 1e-9);
        assert_eq!(var(&[], 0.95), 0.0);
    }

    #[test]
    fn test_expected_shortfall_below_var() {
        let returns = [-0.05, -0.04, 0.01, 0.02, 0.03, 0.00, 0.01, -0.02, 0.02, 0.01];
        let es = expected_shortfall(&returns, 0.90);
        let v = var(&returns, 0.90);
        assert!(es <= v, "ES {es} should be at least as severe as VaR {v}");
    }

    #[test]
    fn test_correlation_identity() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(correlation(&x, &x), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_correlation_reversed() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let rev: Vec<f64> = x.iter().rev().copied().collect();
        assert!(correlation(&x, &rev) <= 0.0);
    }

    #[test]
    fn test_correlation_degenerate() {
        assert_eq!(correlation(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(correlation(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(correlation(&[], &[]), 0.0);
    }

    #[test]
    fn test_kelly_effective_cap() {
        // Overwhelming edge still capped at 0.0625
        let f = kelly_fraction(0.99, 10.0, 1.0);
        assert!(f <= 0.0625, "kelly {f} above effective cap");
        assert!(f > 0.0);
    }

    #[test]
    fn test_kelly_no_edge() {
        assert_eq!(kelly_fraction(0.30, 1.0, 1.0), 0.0);
        assert_eq!(kelly_fraction(0.60, 1.0, 0.0), 0.0);
    }

    #[test]
    fn test_herfindahl() {
        assert_relative_eq!(herfindahl(&[0.5, 0.5]), 0.5, epsilon = 1e-9);
        assert_relative_eq!(herfindahl(&[1.0]), 1.0, epsilon = 1e-9);
        assert_eq!(herfindahl(&[]), 0.0);
    }

    #[test]
    fn test_classify_risk_bands() {
        assert_eq!(classify_risk(4.0, 10.0), RiskLevel::Low);
        assert_eq!(classify_risk(7.0, 10.0), RiskLevel::Medium);
        assert_eq!(classify_risk(9.5, 10.0), RiskLevel::High);
        assert_eq!(classify_risk(11.0, 10.0), RiskLevel::Critical);
    }

    #[test]
    fn test_non_finite_inputs_fall_back() {
        assert_eq!(sharpe(&[f64::NAN, 0.01], 0.02), 0.0);
        assert_eq!(var(&[f64::INFINITY], 0.95), 0.0);
        assert_eq!(correlation(&[f64::NAN, 1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(kelly_fraction(f64::NAN, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_z_score_95() {
        assert_relative_eq!(z_score(0.95), 1.645, epsilon = 1e-3);
    }
}
