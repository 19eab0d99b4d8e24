use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::metrics;

/// How a cached volatility estimate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolMethod {
    /// Taken straight from the caller's market data.
    Market,
    /// Derived from the recorded return history.
    Realized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolEntry {
    pub volatility: f64,
    /// Estimate quality in [0, 1]; hits below 0.8 are not honored.
    pub confidence: f64,
    pub cached_at: DateTime<Utc>,
    pub method: VolMethod,
}

/// Per-symbol volatility cache with TTL expiry plus per-symbol return
/// histories feeding the pairwise correlation matrix.
///
/// Entries are fresh iff `now − cached_at < ttl`; the background sweep at
/// `ttl/2` only evicts early, it never extends freshness.
pub struct VolatilityCache {
    entries: DashMap<String, VolEntry>,
    histories: DashMap<String, VecDeque<f64>>,
    last_prices: DashMap<String, f64>,
    ttl: Duration,
    history_cap: usize,
    /// Aligned samples required before a measured pairwise correlation is used.
    min_samples: usize,
}

/// Fallback when two symbols have too little aligned history.
pub const DEFAULT_CORRELATION: f64 = 0.5;

impl VolatilityCache {
    pub fn new(ttl_ms: u64, history_cap: usize, min_samples: usize) -> Self {
        Self {
            entries: DashMap::new(),
            histories: DashMap::new(),
            last_prices: DashMap::new(),
            ttl: Duration::milliseconds(ttl_ms as i64),
            history_cap,
            min_samples,
        }
    }

    /// Look up a fresh, high-confidence entry. Stale entries are evicted and
    /// reported as a miss; entries with confidence ≤ 0.8 are a miss too.
    pub fn get(&self, symbol: &str) -> Option<VolEntry> {
        let entry = self.entries.get(symbol)?;
        if Utc::now() - entry.cached_at >= self.ttl {
            drop(entry);
            self.entries.remove(symbol);
            return None;
        }
        if entry.confidence <= 0.8 {
            return None;
        }
        Some(entry.clone())
    }

    /// Store an estimate. Confidence starts at 0.8 and earns +0.1 each for
    /// deep 24h volume (> 1M) and a strong liquidity score (> 0.8), capped at 1.
    pub fn insert(
        &self,
        symbol: &str,
        volatility: f64,
        volume_24h: f64,
        liquidity: f64,
        method: VolMethod,
    ) {
        let mut confidence: f64 = 0.8;
        if volume_24h > 1_000_000.0 {
            confidence += 0.1;
        }
        if liquidity > 0.8 {
            confidence += 0.1;
        }
        self.entries.insert(
            symbol.to_string(),
            VolEntry {
                volatility: metrics::finite_or(volatility, 0.0),
                confidence: confidence.min(1.0),
                cached_at: Utc::now(),
                method,
            },
        );
    }

    /// Record a price observation, appending a simple return to the symbol's
    /// bounded history.
    pub fn record_price(&self, symbol: &str, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        if let Some(last) = self.last_prices.get(symbol).map(|p| *p) {
            if last > 0.0 {
                let ret = price / last - 1.0;
                let cap = self.history_cap;
                self.histories
                    .entry(symbol.to_string())
                    .and_modify(|h| {
                        if h.len() >= cap {
                            h.pop_front();
                        }
                        h.push_back(ret);
                    })
                    .or_insert_with(|| {
                        let mut h = VecDeque::with_capacity(cap);
                        h.push_back(ret);
                        h
                    });
            }
        }
        self.last_prices.insert(symbol.to_string(), price);
    }

    pub fn history_len(&self, symbol: &str) -> usize {
        self.histories.get(symbol).map(|h| h.len()).unwrap_or(0)
    }

    pub fn returns(&self, symbol: &str) -> Vec<f64> {
        self.histories
            .get(symbol)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Pairwise return correlation over the aligned tail of both histories.
    /// Falls back to the moderate default below the sample threshold.
    pub fn pairwise_correlation(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let xs = self.returns(a);
        let ys = self.returns(b);
        let n = xs.len().min(ys.len());
        if n < self.min_samples {
            return DEFAULT_CORRELATION;
        }
        metrics::correlation(&xs[xs.len() - n..], &ys[ys.len() - n..])
    }

    /// Average pairwise |correlation| across all measured symbol pairs.
    /// `None` when no pair has enough aligned history.
    pub fn average_abs_correlation(&self, symbols: &[String]) -> Option<f64> {
        let mut sum = 0.0;
        let mut pairs = 0usize;
        for i in 0..symbols.len() {
            for j in (i + 1)..symbols.len() {
                let n = self
                    .history_len(&symbols[i])
                    .min(self.history_len(&symbols[j]));
                if n < self.min_samples {
                    continue;
                }
                sum += self.pairwise_correlation(&symbols[i], &symbols[j]).abs();
                pairs += 1;
            }
        }
        if pairs == 0 {
            None
        } else {
            Some((sum / pairs as f64).clamp(0.0, 1.0))
        }
    }

    /// Drop every expired entry. Returns the eviction count.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.cached_at < self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Background eviction at half the TTL; stops on the shutdown signal.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let cache = Arc::clone(self);
        let period = (cache.ttl / 2)
            .to_std()
            .unwrap_or(std::time::Duration::from_millis(500));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = cache.sweep();
                        if evicted > 0 {
                            debug!("volatility cache sweep evicted {evicted} entries");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_insert_and_hit() {
        let cache = VolatilityCache::new(60_000, 252, 10);
        cache.insert("BTC-USD", 0.45, 2_000_000.0, 0.9, VolMethod::Market);

        let entry = cache.get("BTC-USD").expect("fresh entry");
        assert_relative_eq!(entry.volatility, 0.45);
        assert_relative_eq!(entry.confidence, 1.0);
    }

    #[test]
    fn test_low_confidence_is_a_miss() {
        let cache = VolatilityCache::new(60_000, 252, 10);
        // Thin volume, weak liquidity → confidence stays at 0.8, not honored
        cache.insert("ALT-USD", 0.90, 1_000.0, 0.2, VolMethod::Market);
        assert!(cache.get("ALT-USD").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_on_lookup() {
        let cache = VolatilityCache::new(20, 252, 10);
        cache.insert("ETH-USD", 0.6, 2_000_000.0, 0.9, VolMethod::Market);
        assert!(cache.get("ETH-USD").is_some());

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert!(cache.get("ETH-USD").is_none(), "stale entry must be evicted");
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired() {
        let cache = VolatilityCache::new(20, 252, 10);
        cache.insert("A", 0.3, 2_000_000.0, 0.9, VolMethod::Market);
        cache.insert("B", 0.4, 2_000_000.0, 0.9, VolMethod::Market);

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert_eq!(cache.sweep(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_history_cap_fifo() {
        let cache = VolatilityCache::new(60_000, 5, 3);
        for i in 0..10 {
            cache.record_price("SOL-USD", 100.0 + i as f64);
        }
        // 10 prices → 9 returns, capped at 5
        assert_eq!(cache.history_len("SOL-USD"), 5);
    }

    #[test]
    fn test_correlation_default_below_threshold() {
        let cache = VolatilityCache::new(60_000, 252, 10);
        cache.record_price("A", 100.0);
        cache.record_price("A", 101.0);
        cache.record_price("B", 50.0);
        cache.record_price("B", 49.0);
        assert_relative_eq!(cache.pairwise_correlation("A", "B"), DEFAULT_CORRELATION);
        assert!(cache.average_abs_correlation(&["A".into(), "B".into()]).is_none());
    }

    #[test]
    fn test_correlation_measured_when_enough_samples() {
        let cache = VolatilityCache::new(60_000, 252, 10);
        let mut price_a = 100.0;
        let mut price_b = 50.0;
        for i in 0..15 {
            let step = if i % 2 == 0 { 1.01 } else { 0.995 };
            price_a *= step;
            price_b *= step;
            cache.record_price("A", price_a);
            cache.record_price("B", price_b);
        }
        let corr = cache.pairwise_correlation("A", "B");
        assert!(corr > 0.99, "lock-step series should correlate, got {corr}");
        let avg = cache
            .average_abs_correlation(&["A".into(), "B".into()])
            .expect("measured");
        assert!(avg > 0.99);
    }
}
