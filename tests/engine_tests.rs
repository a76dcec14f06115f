// End-to-end tests for the trading engine: risk signals, grid trading
// and the take-profit lifecycle

mod common;

use common::{build_engine, create_test_config, ScriptedSource};
use equity_position_engine::core::GridStatus;
use equity_position_engine::db::TradeRecord;
use equity_position_engine::types::SignalKind;

#[tokio::test]
async fn take_profit_lifecycle_halves_then_closes() {
    let mut config = create_test_config();
    config.grid.enabled = false;
    let source = ScriptedSource::new(10.0);
    let (engine, db) = build_engine(config, source.clone());

    engine.buy("600036", "Bank", 1000, 10.0).await.unwrap();

    // 5% gain: the first take-profit sells half and arms the trailing stop.
    source.set_price(10.5);
    engine.tick_once().await.unwrap();

    let position = engine.store().get("600036").unwrap();
    assert_eq!(position.volume, 500);
    assert_eq!(position.available, 500);
    assert!(position.profit_triggered);
    // Peak 10.5 on cost 10.0 matches the 5% tier: stop = 10.5 * 0.96.
    assert!((position.stop_loss_price - 10.08).abs() < 1e-9);

    // Price falls through the trailing stop: the remainder is closed.
    source.set_price(10.0);
    engine.tick_once().await.unwrap();
    assert!(engine.store().get("600036").is_none());

    // Ledger saw the buy and both sells, in reverse order.
    let records = TradeRecord::list_by_symbol(db.get_connection(), "600036").unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].reason, "TAKE_PROFIT_FULL");
    assert_eq!(records[0].volume, 500);
    assert_eq!(records[1].reason, "TAKE_PROFIT_HALF");
    assert_eq!(records[1].volume, 500);
    assert_eq!(records[2].reason, "manual");
}

#[tokio::test]
async fn stop_loss_closes_untriggered_position() {
    let mut config = create_test_config();
    config.grid.enabled = false;
    config.risk.stop_loss_ratio = -0.10;
    let source = ScriptedSource::new(100.0);
    let (engine, _db) = build_engine(config, source.clone());

    engine.buy("600519", "Liquor", 100, 100.0).await.unwrap();

    // Above the stop: no action.
    source.set_price(91.0);
    engine.tick_once().await.unwrap();
    assert!(engine.store().get("600519").is_some());
    assert!(engine.pending_signals().is_empty());

    // At the stop: the whole position goes.
    source.set_price(90.0);
    engine.tick_once().await.unwrap();
    assert!(engine.store().get("600519").is_none());
}

#[tokio::test]
async fn signals_are_pulled_not_executed_when_auto_trade_is_off() {
    let mut config = create_test_config();
    config.grid.enabled = false;
    config.trading.auto_trade = false;
    let source = ScriptedSource::new(10.0);
    let (engine, _db) = build_engine(config, source.clone());

    engine.buy("600036", "Bank", 1000, 10.0).await.unwrap();
    source.set_price(10.5);
    engine.tick_once().await.unwrap();

    // The position is untouched; the signal waits for an external consumer.
    assert_eq!(engine.store().get("600036").unwrap().volume, 1000);
    let signals = engine.pending_signals();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].kind, SignalKind::TakeProfitHalf);
    assert_eq!(signals[0].volume, 500);

    // Re-detection is idempotent: still one signal after another tick.
    engine.tick_once().await.unwrap();
    assert_eq!(engine.pending_signals().len(), 1);

    let consumed = engine.consume_signal("600036").unwrap();
    assert_eq!(consumed.kind, SignalKind::TakeProfitHalf);
    assert!(engine.pending_signals().is_empty());
}

#[tokio::test]
async fn grid_ladder_buys_low_and_sells_high() {
    let mut config = create_test_config();
    config.trading.auto_trade = false;
    let source = ScriptedSource::new(10.0);
    let (engine, _db) = build_engine(config, source.clone());

    engine.buy("600036", "Bank", 10_000, 10.0).await.unwrap();
    let levels = engine.store().grid_levels("600036");
    assert_eq!(levels.len(), 5);
    assert!(levels.iter().all(|l| l.volume == 400));

    // Down through the first rung: a 400-share buy fills.
    source.set_price(9.69);
    engine.tick_once().await.unwrap();
    let position = engine.store().get("600036").unwrap();
    assert_eq!(position.volume, 10_400);
    let levels = engine.store().grid_levels("600036");
    assert_eq!(levels[0].status, GridStatus::Active);

    // Back up through the first rung's sell: the level completes.
    source.set_price(10.31);
    engine.tick_once().await.unwrap();
    let position = engine.store().get("600036").unwrap();
    assert_eq!(position.volume, 10_000);
    let levels = engine.store().grid_levels("600036");
    assert_eq!(levels[0].status, GridStatus::Completed);
}

#[tokio::test]
async fn small_position_gets_no_ladder() {
    let config = create_test_config();
    let source = ScriptedSource::new(10.0);
    let (engine, _db) = build_engine(config, source);

    // 450 * 0.2 / 5 = 18 shares per level, below one lot.
    engine.buy("000001", "Small", 450, 10.0).await.unwrap();
    assert!(engine.store().grid_levels("000001").is_empty());
}

#[tokio::test]
async fn manual_sell_validates_available_shares() {
    let mut config = create_test_config();
    config.grid.enabled = false;
    let source = ScriptedSource::new(10.0);
    let (engine, _db) = build_engine(config, source);

    engine.buy("600036", "Bank", 1000, 10.0).await.unwrap();
    assert!(engine.sell("600036", 1500, 10.0).await.is_err());
    assert_eq!(engine.store().get("600036").unwrap().volume, 1000);

    engine.sell("600036", 1000, 10.2).await.unwrap();
    assert!(engine.store().get("600036").is_none());
}

#[tokio::test]
async fn engine_starts_and_shuts_down_within_deadline() {
    let config = create_test_config();
    let source = ScriptedSource::new(10.0);
    let (engine, _db) = build_engine(config, source);

    engine.start();
    engine.shutdown().await.unwrap();
}
