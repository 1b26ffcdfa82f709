// Price-level guard: at most one resting order per tick-wide level

use tracing::{debug, warn};

use super::ledger::SymbolRuntimeState;
use super::types::{BrokerOrder, InstrumentMeta};
use crate::clients::broker::Broker;

/// No tracked order within one tick of `price`
pub fn local_free(state: &SymbolRuntimeState, meta: &InstrumentMeta, price: f64) -> bool {
    !state.level_occupied(meta, price)
}

/// No working broker order within one tick of `price`
pub fn broker_free(orders: &[BrokerOrder], meta: &InstrumentMeta, price: f64) -> bool {
    !orders
        .iter()
        .filter(|o| !o.status.is_terminal())
        .any(|o| meta.same_level(o.price, price))
}

/// Working orders, or `None` when the broker cannot be asked.
/// Callers treat `None` as "every level occupied".
pub async fn broker_levels<B: Broker + ?Sized>(broker: &B, ticker: &str) -> Option<Vec<BrokerOrder>> {
    match broker.get_orders(ticker).await {
        Ok(orders) => Some(orders),
        Err(e) => {
            warn!(ticker, error = %e, "⚠️  Cannot list broker orders, treating levels as occupied");
            None
        }
    }
}

/// Combined ledger and broker check
pub async fn is_level_free<B: Broker + ?Sized>(
    broker: &B,
    ticker: &str,
    state: &SymbolRuntimeState,
    meta: &InstrumentMeta,
    price: f64,
) -> bool {
    if !local_free(state, meta, price) {
        return false;
    }
    match broker_levels(broker, ticker).await {
        Some(orders) => broker_free(&orders, meta, price),
        None => false,
    }
}

/// Walk from `start` with `next` until a free level turns up.
///
/// Gives up after `max_shifts` occupied levels or when the broker cannot be
/// queried.
pub async fn find_free_level<B, F>(
    broker: &B,
    ticker: &str,
    state: &SymbolRuntimeState,
    meta: &InstrumentMeta,
    start: f64,
    max_shifts: u32,
    next: F,
) -> Option<f64>
where
    B: Broker + ?Sized,
    F: Fn(f64) -> f64,
{
    let orders = broker_levels(broker, ticker).await?;
    let mut price = meta.quantize(start);
    for shift in 0..=max_shifts {
        if price <= 0.0 {
            return None;
        }
        if local_free(state, meta, price) && broker_free(&orders, meta, price) {
            if shift > 0 {
                debug!(ticker, price, shift, "level shifted past occupied prices");
            }
            return Some(price);
        }
        price = meta.quantize(next(price));
    }
    warn!(ticker, start, max_shifts, "⚠️  No free price level found, placement aborted");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::broker::BrokerError;
    use crate::core::ledger::OrderRecord;
    use crate::core::types::{Direction, OrderKind, OrderTag, Role};
    use crate::simulation::PaperBroker;
    use chrono::Utc;

    fn meta() -> InstrumentMeta {
        InstrumentMeta {
            instrument_id: "X".to_string(),
            price_step: 0.01,
            lot_size: 1,
            decimals: 2,
        }
    }

    fn tracked(state: &mut SymbolRuntimeState, id: &str, price: f64) {
        state.track(OrderRecord {
            order_id: id.to_string(),
            client_key: id.to_string(),
            price,
            lots: 1,
            role: Role::Entry,
            tag: OrderTag::Grid,
            placed_at: Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_shifts_past_local_and_broker_levels() {
        let paper = PaperBroker::new();
        paper.set_price("SBER", 100.0);
        paper.place_external("SBER", Direction::Buy, 1, 98.0, OrderKind::Limit);

        let mut state = SymbolRuntimeState::new("SBER");
        tracked(&mut state, "1", 99.0);

        let level = find_free_level(&paper, "SBER", &state, &meta(), 99.0, 10, |p| p - 1.0).await;
        assert_eq!(level, Some(97.0));
    }

    #[tokio::test]
    async fn test_guard_counter_bounds_the_search() {
        let paper = PaperBroker::new();
        paper.set_price("SBER", 100.0);
        let mut state = SymbolRuntimeState::new("SBER");
        for (i, p) in [99.0, 98.0, 97.0].iter().enumerate() {
            tracked(&mut state, &i.to_string(), *p);
        }
        let level = find_free_level(&paper, "SBER", &state, &meta(), 99.0, 2, |p| p - 1.0).await;
        assert_eq!(level, None);
    }

    #[tokio::test]
    async fn test_broker_failure_is_fail_safe() {
        let paper = PaperBroker::new();
        paper.set_price("SBER", 100.0);
        paper.fail_next("get_orders", BrokerError::Unavailable("down".into()), 1);
        let state = SymbolRuntimeState::new("SBER");
        assert!(!is_level_free(&paper, "SBER", &state, &meta(), 95.0).await);
        assert!(is_level_free(&paper, "SBER", &state, &meta(), 95.0).await);
    }
}
