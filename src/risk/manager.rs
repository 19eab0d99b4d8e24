use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

use crate::config::RiskManagerConfig;
use crate::error::RiskError;
use crate::events::{EventBus, RiskEvent};
use crate::metrics;
use crate::models::alert::{Alert, AlertKind, AlertSeverity, TriggerSeverity};
use crate::models::position::{PortfolioRisk, Position, PositionPatch};
use crate::models::report::{
    MonteCarloResult, PerformanceMetrics, Recommendation, RecommendationPriority,
    RecommendedAction, RiskDecomposition, RiskReport, StressTestResult,
};
use crate::models::signal::{MarketData, MarketRegime, TradeSignal};
use crate::risk::alerts::AlertStore;
use crate::risk::kill_switch::{KillSwitch, Operation};
use crate::risk::sizing::{SizingEngine, SizingResult};
use crate::risk::stress;
use crate::risk::volatility::VolatilityCache;

const STRESS_TICK_MS: u64 = 3_600_000;
/// Per-position adverse move that raises a drawdown alert, %.
const POSITION_DRAWDOWN_ALERT_PCT: f64 = 20.0;

struct ManagerInner {
    positions: HashMap<String, Position>,
    sizing: SizingEngine,
    alerts: AlertStore,
    portfolio_value: f64,
    last_stress_results: Option<Vec<StressTestResult>>,
    last_stress_at: Option<DateTime<Utc>>,
    last_monte_carlo: Option<MonteCarloResult>,
}

/// The in-process risk authority for one portfolio.
///
/// Owns the position registry, the sizing engine, the alert store and the
/// kill switch; all mutation funnels through one lock so public operations
/// serialize (§concurrency contract). Collaborators observe it through the
/// event bus and report snapshots only.
pub struct RiskManager {
    config: RwLock<RiskManagerConfig>,
    bus: EventBus,
    kill_switch: Arc<KillSwitch>,
    cache: Arc<VolatilityCache>,
    inner: RwLock<ManagerInner>,
    shutdown: broadcast::Sender<()>,
}

impl RiskManager {
    pub fn new(config: RiskManagerConfig, portfolio_value: f64) -> Result<Arc<Self>, RiskError> {
        config.validate()?;
        if !(portfolio_value.is_finite() && portfolio_value > 0.0) {
            return Err(RiskError::invalid_input("portfolio_value must be positive"));
        }

        let bus = EventBus::default();
        let cache = Arc::new(VolatilityCache::new(
            config.sizing.volatility_cache_ttl_ms,
            252,
            config.correlation_min_samples,
        ));
        let kill_switch = KillSwitch::new(config.kill_switch.clone(), portfolio_value, bus.clone())?;
        let sizing = SizingEngine::new(
            config.sizing.clone(),
            config.risk_free_rate,
            portfolio_value,
            Arc::clone(&cache),
            bus.clone(),
        );
        let alerts = AlertStore::new(config.max_alerts, config.alert_cooldown_ms, bus.clone());
        let (shutdown, _) = broadcast::channel(1);

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            bus,
            kill_switch,
            cache,
            inner: RwLock::new(ManagerInner {
                positions: HashMap::new(),
                sizing,
                alerts,
                portfolio_value,
                last_stress_results: None,
                last_stress_at: None,
                last_monte_carlo: None,
            }),
            shutdown,
        }))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RiskEvent> {
        self.bus.subscribe()
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    /// Spawn the monitoring loop, the stress-test scheduler, the cache
    /// sweeper and the kill-switch timers.
    pub fn start(self: &Arc<Self>) {
        self.kill_switch.spawn_timers(&self.shutdown);
        self.cache.spawn_sweeper(self.shutdown.subscribe());

        // Monitoring loop: limit checks, alert escalation, fresh report.
        {
            let this = Arc::clone(self);
            let mut shutdown_rx = self.shutdown.subscribe();
            tokio::spawn(async move {
                let interval_ms = this.config.read().await.risk_check_interval_ms;
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_millis(interval_ms));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = this.monitoring_pass().await {
                                error!("monitoring pass failed: {e}");
                                let mut inner = this.inner.write().await;
                                inner.alerts.raise(Alert::new(
                                    AlertKind::System,
                                    AlertSeverity::Warning,
                                    format!("monitoring pass failed: {e}"),
                                ));
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }

        // Stress scheduler: hourly tick, runs when the configured frequency
        // has elapsed.
        {
            let this = Arc::clone(self);
            let mut shutdown_rx = self.shutdown.subscribe();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_millis(STRESS_TICK_MS));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let config = this.config.read().await.clone();
                            if !config.stress.enabled {
                                continue;
                            }
                            let due = {
                                let inner = this.inner.read().await;
                                match inner.last_stress_at {
                                    None => true,
                                    Some(at) => {
                                        (Utc::now() - at).num_hours() as f64
                                            >= config.stress.frequency_hours
                                    }
                                }
                            };
                            if due {
                                this.run_stress_tests().await;
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }

        info!("risk manager started");
    }

    /// Stop all timers and deactivate the kill switch. The instance refuses
    /// trading operations afterwards.
    pub async fn destroy(&self) {
        let _ = self.shutdown.send(());
        self.kill_switch.destroy().await;
        info!("risk manager destroyed");
    }

    // --- sizing ------------------------------------------------------------

    /// Size a candidate trade. Fail-closed: kill-switch denial, saturated
    /// portfolio risk, or a candidate that would cross any limit all reject
    /// without mutating state.
    pub async fn calculate_position_size(
        &self,
        symbol: &str,
        signal: &TradeSignal,
        market: &MarketData,
    ) -> Result<SizingResult, RiskError> {
        if !self.kill_switch.is_operation_allowed(Operation::Trade).await {
            return Err(RiskError::blocked("trade", "kill switch disallows trading"));
        }

        let config = self.config.read().await.clone();
        let inner = self.inner.read().await;
        let portfolio_risk = self.portfolio_risk_of(&inner);

        if portfolio_risk.total_risk > config.limits.max_portfolio_risk {
            return Err(RiskError::LimitExceeded {
                limit: "portfolio_risk",
                current: portfolio_risk.total_risk,
                threshold: config.limits.max_portfolio_risk,
            });
        }

        self.cache.record_price(symbol, market.price);
        let result = inner.sizing.size(symbol, signal, market, &portfolio_risk)?;

        // Project the candidate onto the book before handing it back.
        let pv = inner.portfolio_value;
        let projected_risk = portfolio_risk.total_risk + result.portfolio_risk_pct;
        if projected_risk > config.limits.max_portfolio_risk {
            return Err(RiskError::LimitExceeded {
                limit: "portfolio_risk",
                current: projected_risk,
                threshold: config.limits.max_portfolio_risk,
            });
        }
        let projected_concentration = inner
            .positions
            .values()
            .map(|p| p.exposure())
            .fold(result.position_size, f64::max)
            / pv
            * 100.0;
        if projected_concentration > config.limits.max_sector_concentration {
            return Err(RiskError::LimitExceeded {
                limit: "concentration",
                current: projected_concentration,
                threshold: config.limits.max_sector_concentration,
            });
        }
        let gross: f64 = inner.positions.values().map(|p| p.exposure()).sum();
        let projected_leverage = (gross + result.position_size) / pv;
        if projected_leverage > config.limits.max_leverage {
            return Err(RiskError::LimitExceeded {
                limit: "leverage",
                current: projected_leverage,
                threshold: config.limits.max_leverage,
            });
        }

        Ok(result)
    }

    // --- position lifecycle ------------------------------------------------

    /// Admit a position into the registry. Fail-closed: the post-acceptance
    /// book must satisfy every portfolio limit or nothing changes.
    pub async fn add_position(&self, position: Position) -> Result<(), RiskError> {
        position.validate()?;
        if !self.kill_switch.is_operation_allowed(Operation::Trade).await {
            return Err(RiskError::blocked("add_position", "kill switch disallows trading"));
        }

        let config = self.config.read().await.clone();
        let report = {
            let mut inner = self.inner.write().await;
            if inner.positions.contains_key(&position.id) {
                return Err(RiskError::invalid_input(format!(
                    "position id already tracked: {}",
                    position.id
                )));
            }

            let pv = inner.portfolio_value;
            let current = self.portfolio_risk_of(&inner);
            let projected_risk = current.total_risk + position.risk_amount / pv * 100.0;
            if projected_risk > config.limits.max_portfolio_risk {
                return Err(RiskError::LimitExceeded {
                    limit: "portfolio_risk",
                    current: projected_risk,
                    threshold: config.limits.max_portfolio_risk,
                });
            }
            let projected_concentration = inner
                .positions
                .values()
                .map(|p| p.exposure())
                .fold(position.exposure(), f64::max)
                / pv
                * 100.0;
            if projected_concentration > config.limits.max_sector_concentration {
                return Err(RiskError::LimitExceeded {
                    limit: "concentration",
                    current: projected_concentration,
                    threshold: config.limits.max_sector_concentration,
                });
            }
            let gross: f64 = inner.positions.values().map(|p| p.exposure()).sum();
            let projected_leverage = (gross + position.exposure()) / pv;
            if projected_leverage > config.limits.max_leverage {
                return Err(RiskError::LimitExceeded {
                    limit: "leverage",
                    current: projected_leverage,
                    threshold: config.limits.max_leverage,
                });
            }

            self.cache.record_price(&position.symbol, position.current_price);
            info!("position added: {} {} ({:.2} USD)", position.id, position.symbol, position.size);
            self.bus.publish(RiskEvent::PositionAdded(position.clone()));
            inner.positions.insert(position.id.clone(), position);

            self.limit_checks(&mut inner, &config).await;
            self.build_report(&inner, &config).await
        };
        self.bus.publish(RiskEvent::RiskReportGenerated(Box::new(report)));
        Ok(())
    }

    /// Merge a patch into an open position. A >20% adverse move from entry
    /// raises a drawdown alert.
    pub async fn update_position(&self, id: &str, patch: PositionPatch) -> Result<(), RiskError> {
        let mut inner = self.inner.write().await;
        let position = inner
            .positions
            .get_mut(id)
            .ok_or_else(|| RiskError::NotFound(id.to_string()))?;

        // Validate the merged result before committing it
        let mut updated = position.clone();
        patch.apply(&mut updated);
        updated.validate()?;
        *position = updated.clone();
        let move_pct = updated.price_move_pct().abs();
        self.cache.record_price(&updated.symbol, updated.current_price);
        self.bus.publish(RiskEvent::PositionUpdated(updated.clone()));

        if move_pct > POSITION_DRAWDOWN_ALERT_PCT {
            inner.alerts.raise(
                Alert::new(
                    AlertKind::Drawdown,
                    AlertSeverity::Error,
                    format!("position {} moved {move_pct:.1}% from entry", updated.symbol),
                )
                .with_values(move_pct, POSITION_DRAWDOWN_ALERT_PCT)
                .with_positions(vec![updated.id.clone()])
                .with_action("review stop placement or reduce the position"),
            );
        }
        Ok(())
    }

    pub async fn remove_position(&self, id: &str) -> Result<Position, RiskError> {
        let config = self.config.read().await.clone();
        let (removed, report) = {
            let mut inner = self.inner.write().await;
            let removed = inner
                .positions
                .remove(id)
                .ok_or_else(|| RiskError::NotFound(id.to_string()))?;
            self.bus.publish(RiskEvent::PositionRemoved {
                position_id: removed.id.clone(),
                symbol: removed.symbol.clone(),
            });
            let report = self.build_report(&inner, &config).await;
            (removed, report)
        };
        self.bus.publish(RiskEvent::RiskReportGenerated(Box::new(report)));
        Ok(removed)
    }

    /// Feed a completed trade back into performance history and the
    /// kill-switch counters.
    pub async fn report_trade_result(
        &self,
        position_id: &str,
        pnl: f64,
        success: bool,
    ) -> Result<(), RiskError> {
        if !pnl.is_finite() {
            return Err(RiskError::invalid_input("pnl is not finite"));
        }
        {
            let mut inner = self.inner.write().await;
            if !inner.positions.contains_key(position_id) {
                return Err(RiskError::NotFound(position_id.to_string()));
            }
            inner.sizing.record_trade_result(pnl, success);
        }

        self.bus.publish(RiskEvent::TradeResult {
            position_id: position_id.to_string(),
            pnl,
            success,
        });

        if success {
            self.kill_switch.report_success().await;
        } else {
            self.kill_switch.report_failure().await;
        }
        if pnl < 0.0 {
            self.kill_switch.report_loss(pnl.abs()).await;
        }
        Ok(())
    }

    // --- snapshots ---------------------------------------------------------

    pub async fn get_portfolio_risk(&self) -> PortfolioRisk {
        let inner = self.inner.read().await;
        self.portfolio_risk_of(&inner)
    }

    pub async fn get_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> =
            self.inner.read().await.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.id.cmp(&b.id));
        positions
    }

    pub async fn get_config(&self) -> RiskManagerConfig {
        self.config.read().await.clone()
    }

    /// Full memory-resident snapshot: the current report plus configuration.
    pub async fn snapshot(&self) -> (RiskReport, RiskManagerConfig) {
        (self.generate_risk_report().await, self.get_config().await)
    }

    pub async fn generate_risk_report(&self) -> RiskReport {
        let config = self.config.read().await.clone();
        let report = {
            let inner = self.inner.read().await;
            self.build_report(&inner, &config).await
        };
        self.bus.publish(RiskEvent::RiskReportGenerated(Box::new(report.clone())));
        report
    }

    pub async fn update_portfolio_value(&self, value: f64) -> Result<(), RiskError> {
        if !(value.is_finite() && value > 0.0) {
            return Err(RiskError::invalid_input("portfolio_value must be positive"));
        }
        {
            let mut inner = self.inner.write().await;
            inner.portfolio_value = value;
            inner.sizing.set_portfolio_value(value);
        }
        self.kill_switch.update_portfolio_value(value).await;
        self.bus.publish(RiskEvent::PortfolioValueUpdated { value });
        Ok(())
    }

    pub async fn acknowledge_alert(&self, id: &str) -> Result<(), RiskError> {
        self.inner.write().await.alerts.acknowledge(id)
    }

    /// Swap in a new configuration. Validated before anything changes; the
    /// kill switch and sizing engine pick up their sections atomically.
    pub async fn update_config(&self, config: RiskManagerConfig) -> Result<(), RiskError> {
        config.validate()?;
        self.kill_switch.update_config(config.kill_switch.clone()).await?;
        {
            let mut inner = self.inner.write().await;
            inner.sizing.update_config(config.sizing.clone())?;
        }
        *self.config.write().await = config;
        self.bus.publish(RiskEvent::ConfigUpdated {
            component: "risk_manager".into(),
        });
        Ok(())
    }

    /// Force-trigger the kill switch and command emergency close of every
    /// open position.
    pub async fn trigger_emergency_stop(&self, reason: &str) {
        self.kill_switch.trigger(reason, TriggerSeverity::Critical).await;
        let positions = self.get_positions().await;
        for position in positions {
            self.bus.publish(RiskEvent::EmergencyClosePosition {
                position_id: position.id,
                symbol: position.symbol,
            });
        }
    }

    /// Run every configured deterministic scenario now (plus Monte Carlo when
    /// enabled) and record the results for the next report.
    pub async fn run_stress_tests(&self) -> Vec<StressTestResult> {
        let config = self.config.read().await.clone();
        let mut inner = self.inner.write().await;
        let positions: Vec<Position> = inner.positions.values().cloned().collect();
        let pv = inner.portfolio_value;

        let mut results = Vec::with_capacity(config.stress.scenarios.len());
        for scenario in &config.stress.scenarios {
            let result =
                stress::run_scenario(scenario, &positions, pv, config.stress.failure_threshold);
            self.bus.publish(RiskEvent::StressTestCompleted(result.clone()));
            if !result.passed {
                inner.alerts.raise(
                    Alert::new(
                        AlertKind::StressTest,
                        AlertSeverity::Error,
                        format!(
                            "stress scenario '{}' failed: {:.1}% loss",
                            result.scenario, result.loss_pct
                        ),
                    )
                    .with_values(result.loss_pct, config.stress.failure_threshold)
                    .with_action("reduce positions until the scenario passes"),
                );
            }
            results.push(result);
        }

        if config.stress.monte_carlo_enabled {
            let symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
            let correlation = self
                .cache
                .average_abs_correlation(&symbols)
                .unwrap_or(crate::risk::volatility::DEFAULT_CORRELATION);
            inner.last_monte_carlo = Some(stress::monte_carlo(
                &positions,
                pv,
                config.stress.monte_carlo_iterations,
                config.stress.confidence_level,
                correlation,
            ));
        }

        inner.last_stress_results = Some(results.clone());
        inner.last_stress_at = Some(Utc::now());
        results
    }

    pub async fn last_monte_carlo(&self) -> Option<MonteCarloResult> {
        self.inner.read().await.last_monte_carlo.clone()
    }

    /// Threshold sweep that raises alerts, never errors.
    pub async fn check_risk_limits(&self) -> usize {
        let config = self.config.read().await.clone();
        let mut inner = self.inner.write().await;
        self.limit_checks(&mut inner, &config).await
    }

    // --- internals ---------------------------------------------------------

    async fn monitoring_pass(&self) -> Result<(), RiskError> {
        let config = self.config.read().await.clone();
        let report = {
            let mut inner = self.inner.write().await;
            self.limit_checks(&mut inner, &config).await;
            let contacts = config.kill_switch.emergency_contacts.clone();
            inner.alerts.escalate_overdue(&contacts);
            self.build_report(&inner, &config).await
        };
        self.bus.publish(RiskEvent::RiskReportGenerated(Box::new(report)));
        debug!("monitoring pass complete");
        Ok(())
    }

    fn portfolio_risk_of(&self, inner: &ManagerInner) -> PortfolioRisk {
        let pv = inner.portfolio_value;
        let positions: Vec<&Position> = inner.positions.values().collect();
        if positions.is_empty() || pv <= 0.0 {
            return PortfolioRisk::default();
        }

        let total_risk = positions.iter().map(|p| p.risk_amount).sum::<f64>() / pv * 100.0;
        let daily_risk = positions.iter().map(|p| p.pnl).sum::<f64>().abs() / pv * 100.0;
        let concentration =
            positions.iter().map(|p| p.exposure()).fold(0.0, f64::max) / pv * 100.0;
        let leverage = positions.iter().map(|p| p.exposure()).sum::<f64>() / pv;

        let symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        let correlation = match self.cache.average_abs_correlation(&symbols) {
            Some(measured) => measured,
            None => {
                // Sector fallback: share of the book in the busiest sector
                let mut sector_counts: HashMap<&str, usize> = HashMap::new();
                for position in &positions {
                    let sector = position.sector.as_deref().unwrap_or("unclassified");
                    *sector_counts.entry(sector).or_insert(0) += 1;
                }
                let max_count = sector_counts.values().copied().max().unwrap_or(0);
                max_count as f64 / positions.len() as f64
            }
        };

        let gross: f64 = positions.iter().map(|p| p.exposure()).sum();
        let liquidity_risk = if gross > 0.0 {
            positions
                .iter()
                .map(|p| (1.0 - p.liquidity_score.unwrap_or(0.5)) * p.exposure())
                .sum::<f64>()
                / gross
                * 100.0
        } else {
            0.0
        };

        PortfolioRisk {
            total_risk: metrics::finite_or(total_risk, 0.0),
            daily_risk: metrics::finite_or(daily_risk, 0.0),
            concentration: metrics::finite_or(concentration, 0.0),
            correlation: metrics::finite_or(correlation, 0.0).clamp(0.0, 1.0),
            leverage: metrics::finite_or(leverage, 0.0),
            liquidity_risk: metrics::finite_or(liquidity_risk, 0.0).clamp(0.0, 100.0),
        }
    }

    async fn limit_checks(&self, inner: &mut ManagerInner, config: &RiskManagerConfig) -> usize {
        let risk = self.portfolio_risk_of(inner);
        let limits = &config.limits;
        let mut raised = 0;

        let check = |alerts: &mut AlertStore,
                     kind: AlertKind,
                     value: f64,
                     threshold: f64,
                     label: &str,
                     action: &str| {
            if threshold <= 0.0 {
                return 0;
            }
            let severity = match metrics::classify_risk(value, threshold) {
                metrics::RiskLevel::Critical => AlertSeverity::Error,
                metrics::RiskLevel::High => AlertSeverity::Warning,
                metrics::RiskLevel::Low | metrics::RiskLevel::Medium => return 0,
            };
            let raised = alerts.raise(
                Alert::new(
                    kind,
                    severity,
                    format!("{label} at {value:.2} against limit {threshold:.2}"),
                )
                .with_values(value, threshold)
                .with_action(action),
            );
            usize::from(raised.is_some())
        };

        raised += check(
            &mut inner.alerts,
            AlertKind::RiskLimit,
            risk.total_risk,
            limits.max_portfolio_risk,
            "portfolio risk",
            "reduce aggregate position risk",
        );
        raised += check(
            &mut inner.alerts,
            AlertKind::Concentration,
            risk.concentration,
            limits.max_sector_concentration,
            "concentration",
            "diversify the largest exposure",
        );
        raised += check(
            &mut inner.alerts,
            AlertKind::Leverage,
            risk.leverage,
            limits.max_leverage,
            "leverage",
            "deleverage the book",
        );
        raised += check(
            &mut inner.alerts,
            AlertKind::Correlation,
            risk.correlation,
            limits.max_correlation,
            "average correlation",
            "add uncorrelated exposure",
        );
        raised += check(
            &mut inner.alerts,
            AlertKind::Liquidity,
            risk.liquidity_risk,
            100.0 - limits.liquidity_buffer_percent,
            "liquidity risk",
            "rotate into more liquid instruments",
        );

        let drawdown = self.kill_switch.get_status().await.current_drawdown;
        raised += check(
            &mut inner.alerts,
            AlertKind::Drawdown,
            drawdown,
            limits.max_drawdown_limit,
            "drawdown",
            "halt new risk until the book recovers",
        );

        raised
    }

    async fn build_report(&self, inner: &ManagerInner, config: &RiskManagerConfig) -> RiskReport {
        let risk = self.portfolio_risk_of(inner);
        let kill_switch_status = self.kill_switch.get_status().await;
        let pv = inner.portfolio_value;

        let mut by_position = HashMap::new();
        let mut by_sector: HashMap<String, f64> = HashMap::new();
        let mut market_factor = 0.0;
        for position in inner.positions.values() {
            by_position.insert(position.id.clone(), position.risk_amount / pv * 100.0);
            let sector = position.sector.clone().unwrap_or_else(|| "unclassified".into());
            *by_sector.entry(sector).or_insert(0.0) += position.exposure() / pv * 100.0;
            market_factor += position.beta.unwrap_or(1.0) * position.exposure() / pv * 100.0;
        }
        let gross_pct = risk.leverage * 100.0;
        let gross: f64 = inner.positions.values().map(|p| p.exposure()).sum();
        let weights: Vec<f64> = inner
            .positions
            .values()
            .map(|p| if gross > 0.0 { p.exposure() / gross } else { 0.0 })
            .collect();
        let mut by_factor = HashMap::new();
        by_factor.insert("market".to_string(), metrics::finite_or(market_factor, 0.0));
        by_factor.insert(
            "idiosyncratic".to_string(),
            metrics::finite_or((gross_pct - market_factor).abs(), 0.0),
        );
        by_factor.insert("herfindahl".to_string(), metrics::herfindahl(&weights));
        let mut temporal = HashMap::new();
        temporal.insert("daily".to_string(), risk.daily_risk);
        temporal.insert("weekly".to_string(), risk.daily_risk * 5.0_f64.sqrt());
        temporal.insert("monthly".to_string(), risk.daily_risk * 21.0_f64.sqrt());

        let recommendations =
            self.recommendations(&risk, kill_switch_status.current_drawdown, inner, config);
        let performance_metrics = self.performance_metrics(inner, config);
        let market_regime = self.classify_regime(inner, &risk);

        RiskReport {
            timestamp: Utc::now(),
            portfolio_risk: risk,
            kill_switch_status,
            stress_test_results: inner.last_stress_results.clone(),
            risk_decomposition: RiskDecomposition {
                by_position,
                by_sector,
                by_factor,
                temporal,
            },
            recommendations,
            alerts: inner.alerts.snapshot(),
            market_regime,
            performance_metrics,
        }
    }

    fn recommendations(
        &self,
        risk: &PortfolioRisk,
        drawdown: f64,
        inner: &ManagerInner,
        config: &RiskManagerConfig,
    ) -> Vec<Recommendation> {
        let limits = &config.limits;
        let mut recommendations = Vec::new();

        let mut over = |value: f64, threshold: f64, action: RecommendedAction, message: String| {
            if threshold > 0.0 && value >= 0.8 * threshold {
                let priority = if value > threshold {
                    RecommendationPriority::High
                } else {
                    RecommendationPriority::Medium
                };
                recommendations.push(Recommendation {
                    priority,
                    action,
                    message,
                });
            }
        };

        over(
            risk.total_risk,
            limits.max_portfolio_risk,
            RecommendedAction::ReduceExposure,
            format!("portfolio risk {:.1}% nearing limit {:.1}%", risk.total_risk, limits.max_portfolio_risk),
        );
        over(
            risk.concentration,
            limits.max_sector_concentration,
            RecommendedAction::Diversify,
            format!("largest exposure {:.1}% nearing limit {:.1}%", risk.concentration, limits.max_sector_concentration),
        );
        over(
            risk.leverage,
            limits.max_leverage,
            RecommendedAction::ReduceExposure,
            format!("leverage {:.2}x nearing limit {:.2}x", risk.leverage, limits.max_leverage),
        );
        over(
            risk.correlation,
            limits.max_correlation,
            RecommendedAction::HedgeCorrelation,
            format!("average correlation {:.2} nearing limit {:.2}", risk.correlation, limits.max_correlation),
        );
        over(
            drawdown,
            limits.max_drawdown_limit,
            RecommendedAction::HaltTrading,
            format!("drawdown {drawdown:.1}% nearing limit {:.1}%", limits.max_drawdown_limit),
        );

        if let Some(results) = &inner.last_stress_results {
            for result in results.iter().filter(|r| !r.passed) {
                recommendations.push(Recommendation {
                    priority: RecommendationPriority::Critical,
                    action: RecommendedAction::ReducePosition,
                    message: format!(
                        "stress scenario '{}' fails with {:.1}% loss",
                        result.scenario, result.loss_pct
                    ),
                });
            }
        }

        recommendations
    }

    fn performance_metrics(
        &self,
        inner: &ManagerInner,
        config: &RiskManagerConfig,
    ) -> PerformanceMetrics {
        let pnls = inner.sizing.history().realized_pnls();
        let pv = inner.portfolio_value;
        let returns: Vec<f64> = pnls.iter().map(|pnl| pnl / pv).collect();
        let window = inner.sizing.config().adaptive_performance_window as usize;

        PerformanceMetrics {
            sharpe: metrics::sharpe(&returns, config.risk_free_rate / 252.0),
            win_rate: inner.sizing.history().win_rate(window).unwrap_or(0.0),
            max_drawdown: metrics::max_drawdown(&returns),
            var_95: metrics::var(&returns, 0.95),
            expected_shortfall_95: metrics::expected_shortfall(&returns, 0.95),
            profit_factor: inner.sizing.history().profit_factor(),
            trades: inner.sizing.history().len() as u64,
        }
    }

    fn classify_regime(&self, inner: &ManagerInner, risk: &PortfolioRisk) -> MarketRegime {
        let positions: Vec<&Position> = inner.positions.values().collect();
        if positions.is_empty() {
            return MarketRegime::Sideways;
        }
        let gross: f64 = positions.iter().map(|p| p.exposure()).sum();
        let avg_vol = if gross > 0.0 {
            positions
                .iter()
                .map(|p| p.volatility.unwrap_or(0.3) * p.exposure())
                .sum::<f64>()
                / gross
        } else {
            0.3
        };
        if avg_vol > 0.6 || risk.correlation > 0.9 {
            return MarketRegime::Volatile;
        }
        let net_pnl: f64 = positions.iter().map(|p| p.pnl).sum();
        let pnl_pct = net_pnl / inner.portfolio_value * 100.0;
        if pnl_pct > 1.0 {
            MarketRegime::Bull
        } else if pnl_pct < -1.0 {
            MarketRegime::Bear
        } else {
            MarketRegime::Sideways
        }
    }
}
