//! The live guard and the bar simulator must trail identically.
//!
//! Both run the same position over the same price path; the stop the
//! simulator ends with must be the stop resting on the exchange and the
//! one persisted for the position.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use warden_domain::{Candle, Leverage, Price, Quantity, Side, Symbol};
use warden_exec::{MarketDataPort, PriceUpdate, StubExchange, StubMarketData};
use warden_sim::{EntryOrder, ExecutionSimulator, FillResult, Liquidity, PositionSimulator, SimConfig};
use warden_store::{MemoryStore, PositionRepository, Store};
use wardend::{Config, Daemon, GuardExit};

fn price(value: Decimal) -> Price {
    Price::new(value).unwrap()
}

fn frictionless() -> SimConfig {
    SimConfig {
        slippage_percent: Decimal::ZERO,
        taker_fee: Decimal::ZERO,
        maker_fee: Decimal::ZERO,
        take_profit_slippage_percent: Decimal::ZERO,
        ..SimConfig::default()
    }
}

/// Flat bars: open, high, low and close all at the tick price.
fn bars(symbol: &Symbol, path: &[Decimal]) -> Vec<Candle> {
    let start = Utc::now();
    path.iter()
        .enumerate()
        .map(|(i, value)| {
            let p = price(*value);
            let open_time = start + Duration::minutes(i as i64);
            Candle::new(
                symbol.clone(),
                p,
                p,
                p,
                p,
                dec!(1),
                open_time,
                open_time + Duration::minutes(1),
            )
            .unwrap()
        })
        .collect()
}

async fn run_parity(side: Side, path: &[Decimal]) {
    let symbol = Symbol::from_pair("ETHUSDTM").unwrap();
    let config = Config::test();

    // Simulator: 9% ROI risk at 100x, target far outside the path
    let fill = FillResult {
        filled: true,
        fill_price: Some(price(dec!(2000))),
        fill_time: Utc::now(),
        fee: Decimal::ZERO,
        slippage: Decimal::ZERO,
        liquidity: Liquidity::Taker,
    };
    let mut sim = PositionSimulator::open(
        ExecutionSimulator::new(frictionless()).unwrap(),
        config.trailing.clone(),
        EntryOrder {
            symbol: symbol.clone(),
            side,
            size: Quantity::new(dec!(1)).unwrap(),
            leverage: Leverage::from_u32(100).unwrap(),
            roi_risk: dec!(9),
            roi_reward: dec!(500),
        },
        &fill,
    )
    .unwrap();
    let opened = sim.position().unwrap().clone();
    let initial_stop = opened.stop_loss_price;

    // Live guard on the same position
    let exchange = Arc::new(StubExchange::new());
    let market_data = Arc::new(StubMarketData::new());
    let store = Arc::new(MemoryStore::new());
    let daemon = Daemon::new(
        config,
        Arc::clone(&exchange),
        Arc::clone(&market_data) as Arc<dyn MarketDataPort>,
        Arc::clone(&store) as Arc<dyn Store>,
    );
    daemon.guard_position(opened).await.unwrap();

    for bar in bars(&symbol, path) {
        sim.on_bar(&bar).unwrap();
        market_data
            .inject_price_update(PriceUpdate {
                symbol: symbol.clone(),
                price: bar.close,
                timestamp: bar.close_time,
            })
            .await;
    }

    // Closing the feed lets the guard drain every update first
    market_data.unsubscribe(&symbol).await.unwrap();
    assert_eq!(daemon.wait_for_guard(&symbol).await, Some(GuardExit::FeedClosed));

    let simulated = sim.position().expect("path never reaches the stop");
    let live = store.find_position(&symbol).await.unwrap().unwrap();

    assert_ne!(simulated.stop_loss_price, initial_stop, "path should trail the stop");
    assert_eq!(live.stop_loss_price, simulated.stop_loss_price);
    assert_eq!(live.last_trailed_roi, simulated.last_trailed_roi);
    assert_eq!(live.break_even_armed, simulated.break_even_armed);

    let open = exchange.open_stops();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].params.stop_price, Some(simulated.stop_loss_price));
}

#[tokio::test]
async fn test_long_trailing_matches_simulator() {
    run_parity(
        Side::Long,
        &[dec!(2001), dec!(2002.5), dec!(2004), dec!(2005.5), dec!(2007), dec!(2006.5)],
    )
    .await;
}

#[tokio::test]
async fn test_short_trailing_matches_simulator() {
    run_parity(
        Side::Short,
        &[dec!(1999), dec!(1997.5), dec!(1996), dec!(1994.5), dec!(1993), dec!(1993.5)],
    )
    .await;
}
