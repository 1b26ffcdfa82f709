// Pre-halt snapshot and post-halt restore through the engine

mod common;

use std::collections::BTreeSet;

use grid_executor::core::{OrderTag, SymbolStatus, TradingStatus, WindowKind};
use grid_executor::{BrokerError, Side, StateRepository};
use common::{at, config_with, strategy, Harness, TICKER};

/// Grid opened at 100 before the midday window: entries 99/98/97, exit 102
async fn opened_grid() -> Harness {
    let h = Harness::new(config_with(strategy(Side::Long)), 100.0);
    h.engine.sweep_at(at(10, 50, 0)).await;
    h.engine.sweep_at(at(10, 51, 0)).await;
    assert_eq!(h.entry_prices(), vec![99.0, 98.0, 97.0]);
    assert_eq!(h.exit_prices(), vec![102.0]);
    h
}

/// 13:58 venue time
async fn snapshot(h: &Harness) {
    h.engine.sweep_at(at(10, 58, 0)).await;
}

#[tokio::test]
async fn test_snapshot_cancels_and_remembers_ladder() {
    let h = opened_grid().await;
    snapshot(&h).await;

    let state = h.state();
    let snap = state.snapshot.as_ref().expect("snapshot taken");
    assert_eq!(snap.kind, WindowKind::Midday);
    assert_eq!(snap.orders.len(), 4);
    assert_eq!(snap.restore_at, at(11, 5, 0));
    assert_eq!(state.order_count(), 0);
    assert!(state.clearing_flags.contains_key(&WindowKind::Midday));
    assert!(h.paper.live_orders(TICKER).is_empty());
    assert_eq!(h.paper.cancels(), 4);

    // Still inside the window: already handled, and too early to restore
    let submitted = h.paper.submissions();
    h.engine.sweep_at(at(10, 59, 0)).await;
    assert_eq!(h.paper.submissions(), submitted);
    assert!(h.state().snapshot.is_some());
}

#[tokio::test]
async fn test_restore_without_gap_resubmits_everything() {
    let h = opened_grid().await;
    snapshot(&h).await;

    h.engine.sweep_at(at(11, 6, 0)).await;
    let state = h.state();
    assert!(state.snapshot.is_none());
    assert_eq!(state.status, SymbolStatus::On);
    assert_eq!(h.entry_prices(), vec![99.0, 98.0, 97.0]);
    assert_eq!(h.exit_prices(), vec![102.0]);
    assert_eq!(h.paper.live_orders(TICKER).len(), 4);
}

#[tokio::test]
async fn test_gap_through_exit_closes_at_market() {
    let h = opened_grid().await;
    snapshot(&h).await;

    h.paper.gap_price(TICKER, 103.0);
    h.engine.sweep_at(at(11, 6, 0)).await;
    let state = h.state();
    assert!(state.snapshot.is_none());
    assert_eq!(h.entry_prices(), vec![99.0, 98.0, 97.0]);
    let close = state.exits.values().find(|r| r.tag == OrderTag::GapClose).unwrap();
    assert_eq!(close.price, 102.0);
    assert_eq!(h.paper.held_lots(TICKER), 0);

    // The close is reconciled like any exit fill and reopens below
    h.engine.sweep_at(at(11, 7, 0)).await;
    let fills = h.fills.fills();
    let last = fills.last().unwrap();
    assert_eq!((last.tag, last.price), (OrderTag::GapClose, 103.0));
    let state = h.state();
    let reopen = state.entries.values().find(|r| r.tag == OrderTag::Reopen).unwrap();
    assert_eq!(reopen.price, 100.0);
    // No exits left and the market is three steps above the last layer
    assert_eq!(h.entry_prices(), vec![102.0, 101.0, 100.0, 99.0, 98.0, 97.0, 96.0]);
    assert_eq!(state.live_held_same_side, 0);
}

#[tokio::test]
async fn test_gap_through_entries_reseeds_beyond_market() {
    let h = opened_grid().await;
    snapshot(&h).await;

    h.paper.gap_price(TICKER, 97.5);
    h.engine.sweep_at(at(11, 6, 0)).await;
    let state = h.state();
    assert!(state.snapshot.is_none());
    // 99 and 98 would trade at once and are dropped; 97 rests again
    assert_eq!(h.entry_prices(), vec![97.0, 96.5, 95.5]);
    assert_eq!(h.exit_prices(), vec![102.0]);
    let reseeded = state.entries.values().filter(|r| r.tag == OrderTag::GapReseed).count();
    assert_eq!(reseeded, 2);
    assert_eq!(h.paper.held_lots(TICKER), 1);
}

#[tokio::test]
async fn test_restore_waits_for_trading() {
    let h = opened_grid().await;
    snapshot(&h).await;

    h.paper.set_trading_status(TICKER, TradingStatus::Halted("clearing".to_string()));
    h.engine.sweep_at(at(11, 6, 0)).await;
    assert!(h.state().snapshot.is_some());
    assert!(h.paper.live_orders(TICKER).is_empty());

    h.paper.set_trading_status(TICKER, TradingStatus::Normal);
    h.engine.sweep_at(at(11, 7, 0)).await;
    assert!(h.state().snapshot.is_none());
    assert_eq!(h.paper.live_orders(TICKER).len(), 4);
}

#[tokio::test]
async fn test_snapshot_kept_when_nothing_restores() {
    let h = opened_grid().await;
    snapshot(&h).await;

    h.paper.fail_next("place_order", BrokerError::Rejected("price band".to_string()), 4);
    h.engine.sweep_at(at(11, 6, 0)).await;
    assert_eq!(h.state().snapshot.as_ref().map(|s| s.orders.len()), Some(4));

    h.engine.sweep_at(at(11, 7, 0)).await;
    assert!(h.state().snapshot.is_none());
    assert_eq!(h.paper.live_orders(TICKER).len(), 4);
}

#[tokio::test]
async fn test_repeated_restore_never_duplicates_orders() {
    let h = opened_grid().await;
    snapshot(&h).await;
    let before_restore = h.state();

    h.engine.sweep_at(at(11, 6, 0)).await;
    let submitted = h.paper.submissions();
    let first_ids: BTreeSet<String> = h.state().orders.iter().cloned().collect();
    assert_eq!(first_ids.len(), 4);

    // The restored state is lost, so the same snapshot is replayed
    h.store.save(&before_restore).unwrap();
    h.engine.sweep_at(at(11, 7, 0)).await;

    let second_ids: BTreeSet<String> = h.state().orders.iter().cloned().collect();
    assert_eq!(second_ids, first_ids);
    assert_eq!(h.paper.submissions(), submitted);
    assert_eq!(h.paper.live_orders(TICKER).len(), 4);
}

/// Short grid opened at 100: entries 101/102/103, exit 98
async fn opened_short_grid() -> Harness {
    let h = Harness::new(config_with(strategy(Side::Short)), 100.0);
    h.engine.sweep_at(at(10, 50, 0)).await;
    h.engine.sweep_at(at(10, 51, 0)).await;
    assert_eq!(h.entry_prices(), vec![103.0, 102.0, 101.0]);
    assert_eq!(h.exit_prices(), vec![98.0]);
    h
}

#[tokio::test]
async fn test_short_gap_up_reseeds_above_market() {
    let h = opened_short_grid().await;
    snapshot(&h).await;

    h.paper.gap_price(TICKER, 102.5);
    h.engine.sweep_at(at(11, 6, 0)).await;
    let state = h.state();
    assert!(state.snapshot.is_none());
    // 101 and 102 would sell at once and are dropped; 103 rests again
    assert_eq!(h.entry_prices(), vec![104.5, 103.5, 103.0]);
    let reseeded = state.entries.values().filter(|r| r.tag == OrderTag::GapReseed).count();
    assert_eq!(reseeded, 2);
    assert_eq!(h.exit_prices(), vec![98.0]);
    assert_eq!(h.paper.held_lots(TICKER), -1);
}

#[tokio::test]
async fn test_short_gap_down_closes_at_market() {
    let h = opened_short_grid().await;
    snapshot(&h).await;

    h.paper.gap_price(TICKER, 97.0);
    h.engine.sweep_at(at(11, 6, 0)).await;
    let state = h.state();
    assert!(state.snapshot.is_none());
    assert_eq!(h.entry_prices(), vec![103.0, 102.0, 101.0]);
    let close = state.exits.values().find(|r| r.tag == OrderTag::GapClose).unwrap();
    assert_eq!(close.price, 98.0);
    assert_eq!(h.paper.held_lots(TICKER), 0);

    h.engine.sweep_at(at(11, 7, 0)).await;
    let fills = h.fills.fills();
    let last = fills.last().unwrap();
    assert_eq!((last.tag, last.price), (OrderTag::GapClose, 97.0));
    let state = h.state();
    let reopen = state.entries.values().find(|r| r.tag == OrderTag::Reopen).unwrap();
    assert_eq!(reopen.price, 100.0);
    assert_eq!(state.live_held_same_side, 0);
}
