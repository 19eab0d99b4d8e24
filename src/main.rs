use tracing::{info, warn};

use sentinel::config::RiskManagerConfig;
use sentinel::models::position::{Position, PositionPatch};
use sentinel::models::signal::{Direction, MarketData, TradeSignal};
use sentinel::risk::manager::RiskManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("================================================");
    info!("  SENTINEL — portfolio risk management core");
    info!("================================================");

    let config = RiskManagerConfig::load_or_default();
    let portfolio_value = std::env::var("SENTINEL_PORTFOLIO_VALUE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100_000.0);

    info!("Portfolio value: ${portfolio_value:.2}");
    info!("--- Risk configuration ---");
    info!("  Max portfolio risk: {}%", config.limits.max_portfolio_risk);
    info!("  Max daily loss:     ${}", config.kill_switch.max_daily_loss);
    info!("  Max drawdown:       {}%", config.kill_switch.max_drawdown);
    info!("  Scaling method:     {:?}", config.sizing.risk_scaling_method);

    let manager = RiskManager::new(config, portfolio_value)?;
    manager.start();

    // Log every event the core emits
    {
        let mut events = manager.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                info!("[event] {}", event.name());
            }
        });
    }

    // Two simulated trading agents opt into the shutdown protocol
    manager.kill_switch().register_agent("momentum-bot").await;
    manager.kill_switch().register_agent("market-maker-bot").await;

    // --- scripted demo flow ---

    let signal = TradeSignal {
        direction: Direction::Long,
        confidence: 0.85,
        expected_return: 0.04,
        risk_reward: 2.5,
        time_horizon: 12.0,
        signal_strength: 0.7,
        market_regime: None,
    };
    let market = MarketData {
        price: 62_000.0,
        volume_24h: 5_000_000.0,
        volatility: 0.45,
        liquidity: 0.9,
        spread: 0.0005,
        beta: Some(1.2),
        skewness: None,
        kurtosis: None,
    };

    match manager.calculate_position_size("BTC-USD", &signal, &market).await {
        Ok(sized) => {
            info!(
                "Sized BTC-USD: ${:.2} (stop {:.2}, take-profit {:.2}, confidence {:.2})",
                sized.position_size, sized.stop_loss, sized.take_profit, sized.confidence
            );

            let mut position = Position::new(
                "demo-btc-1",
                "BTC-USD",
                sized.position_size,
                Direction::Long,
                market.price,
            );
            position.risk_amount = sized.risk_amount;
            position.volatility = Some(market.volatility);
            position.liquidity_score = Some(market.liquidity);
            position.sector = Some("crypto".into());
            manager.add_position(position).await?;

            // Mark the position down and report a losing trade
            manager
                .update_position(
                    "demo-btc-1",
                    PositionPatch {
                        current_price: Some(60_500.0),
                        pnl: Some(-150.0),
                        ..Default::default()
                    },
                )
                .await?;
            manager.report_trade_result("demo-btc-1", -150.0, false).await?;
        }
        Err(e) => warn!("Sizing rejected: {e}"),
    }

    let results = manager.run_stress_tests().await;
    for result in &results {
        info!(
            "Stress '{}': loss {:.2}% (worst-case VaR {:.2}%) passed={}",
            result.scenario, result.loss_pct, result.worst_case_var_pct, result.passed
        );
    }

    let report = manager.generate_risk_report().await;
    info!(
        "Risk report: total_risk={:.2}% leverage={:.2}x regime={:?} alerts={}",
        report.portfolio_risk.total_risk,
        report.portfolio_risk.leverage,
        report.market_regime,
        report.alerts.len()
    );

    info!("=== SENTINEL running ===");
    info!("Monitoring loop and kill-switch timers active. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Cleaning up...");
    manager.destroy().await;

    let status = manager.kill_switch().get_status().await;
    info!(
        "Final status: daily_loss=${:.2} drawdown={:.2}% failures={}",
        status.daily_loss, status.current_drawdown, status.consecutive_failures
    );
    info!("SENTINEL shutdown complete.");
    Ok(())
}
