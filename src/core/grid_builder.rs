// Grid construction: the initial ladder, extra layers, exits and REOPENs

use tracing::{debug, info, warn};

use super::context::SymbolContext;
use super::ledger::{OrderRecord, SymbolRuntimeState, SymbolStatus, UnprotectedPosition};
use super::portfolio::{self, PortfolioView};
use super::types::{OrderTag, Role};
use crate::clients::broker::{Broker, OrderRequest};
use crate::config::StrategyConfig;
use crate::error::TradingResult;

fn full_grid_lots(strategy: &StrategyConfig) -> u64 {
    strategy.size.saturating_mul(u64::from(strategy.grid_level_count))
}

/// Slots for one more layer: a full grid, or what the ceiling leaves of it
pub fn layer_slots(strategy: &StrategyConfig, view: &PortfolioView) -> u64 {
    let full = full_grid_lots(strategy);
    let lots = view.headroom().map_or(full, |h| h.min(full));
    lots / strategy.size.max(1)
}

/// Slots for rebuilding a ladder after a gap
pub fn reseed_slots(strategy: &StrategyConfig, held: u64) -> u64 {
    let cap = strategy.portfolio_limit.unwrap_or_else(|| full_grid_lots(strategy));
    cap.saturating_sub(held) / strategy.size.max(1)
}

/// Place up to `slots` entries starting at `first`, each sized by what is
/// left of `budget` (`None` = unbounded). Returns the number placed.
async fn place_ladder<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
    first: f64,
    slots: u64,
    mut budget: Option<u64>,
    tag: OrderTag,
) -> usize {
    let side = ctx.side();
    let step = ctx.strategy.step_orders;
    let size = ctx.strategy.size;
    let mut next = first;
    let mut placed = 0;

    for _ in 0..slots {
        let lots = budget.map_or(size, |b| size.min(b));
        if lots == 0 {
            debug!(symbol = ctx.symbol, placed, "headroom exhausted, ladder stops");
            break;
        }
        match ctx.submit_at_free_level(state, Role::Entry, tag, lots, next).await {
            Some(record) => {
                placed += 1;
                if let Some(b) = budget.as_mut() {
                    *b = b.saturating_sub(lots);
                }
                next = side.next_level_away_from_market(record.price, step);
            }
            None => next = side.next_level_away_from_market(next, step),
        }
    }
    placed
}

/// OFF branch: base position at market, then the ladder.
///
/// Returns `false` when nothing could be opened and the symbol stays OFF.
pub async fn open_grid<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
) -> TradingResult<bool> {
    let market = ctx.market_price().await?;
    if !state.unprotected.is_empty() {
        retry_unprotected(ctx, state, market).await;
    }

    let view = portfolio::view(ctx).await?;
    let side = ctx.side();
    let size = ctx.strategy.size;
    let base_lots = view.headroom().map_or(size, |h| size.min(h));
    if base_lots == 0 {
        info!(
            symbol = ctx.symbol,
            held = view.held,
            ceiling = ?view.ceiling,
            "⛔ No headroom, grid stays OFF"
        );
        return Ok(false);
    }

    // ON goes into the same checkpoint as the base order, so a restart
    // reconciles the half-built ladder instead of buying the base again
    state.status = SymbolStatus::On;
    state.last_layer_price = Some(market);
    state.layer_gate_until = Some(ctx.now + chrono::Duration::seconds(ctx.engine.layer_cooldown_secs as i64));
    let request = OrderRequest::entry_market(side, ctx.ticker(), base_lots);
    if ctx
        .submit(state, request, Role::Entry, OrderTag::Market, market)
        .await
        .is_none()
    {
        state.status = SymbolStatus::Off;
        state.last_layer_price = None;
        state.layer_gate_until = None;
        return Ok(false);
    }

    let budget = view.available().map(|a| a.saturating_sub(base_lots));
    let first = side.next_level_away_from_market(market, ctx.strategy.step_orders);
    let placed = place_ladder(
        ctx,
        state,
        first,
        u64::from(ctx.strategy.grid_level_count),
        budget,
        OrderTag::Grid,
    )
    .await;

    info!(
        symbol = ctx.symbol,
        side = %side,
        market,
        base_lots,
        levels = placed,
        headroom = ?view.headroom(),
        "🚀 Grid opened"
    );
    Ok(true)
}

/// One more batch of entries beyond the current market
pub async fn add_layer<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
    market: f64,
) -> TradingResult<usize> {
    let view = portfolio::view(ctx).await?;
    let slots = layer_slots(ctx.strategy, &view);
    state.last_layer_price = Some(market);
    state.layer_gate_until = Some(ctx.now + chrono::Duration::seconds(ctx.engine.layer_cooldown_secs as i64));

    if slots == 0 {
        info!(symbol = ctx.symbol, held = view.held, "No room for another layer");
        return Ok(0);
    }

    let first = ctx.side().next_level_away_from_market(market, ctx.strategy.step_orders);
    let placed = place_ladder(ctx, state, first, slots, view.available(), OrderTag::Layer).await;
    info!(symbol = ctx.symbol, market, slots, placed, "➕ Layer added");
    Ok(placed)
}

/// Refill the ladder up to `grid_level_count` entries once fills, cuts or a
/// manual sale have thinned it.
///
/// Starts one step beyond the farthest tracked entry; headroom is read from
/// the broker again before every order. With no entries left the regrid owns
/// the rebuild, so nothing is placed.
pub async fn top_up_entries<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
) -> TradingResult<usize> {
    let desired = ctx.strategy.grid_level_count as usize;
    let missing = desired.saturating_sub(state.entries.len());
    if missing == 0 {
        return Ok(0);
    }
    let side = ctx.side();
    let step = ctx.strategy.step_orders;
    let Some(farthest) = state
        .entries
        .values()
        .map(|r| r.price)
        .min_by(|a, b| side.farthest_first(*a, *b))
    else {
        return Ok(0);
    };

    let mut next = side.next_level_away_from_market(farthest, step);
    let mut placed = 0;
    for _ in 0..missing {
        let view = portfolio::view(ctx).await?;
        let lots = view.cap(ctx.strategy.size);
        if lots == 0 {
            debug!(symbol = ctx.symbol, held = view.held, pending = view.pending_open, "no headroom left for top-up");
            break;
        }
        match ctx
            .submit_at_free_level(state, Role::Entry, OrderTag::TopUp, lots, next)
            .await
        {
            Some(record) => {
                placed += 1;
                next = side.next_level_away_from_market(record.price, step);
            }
            None => break,
        }
    }
    if placed > 0 {
        info!(symbol = ctx.symbol, placed, missing, entries = state.entries.len(), "🧩 Ladder topped up");
    }
    Ok(placed)
}

/// Take-profit orders for a batch of filled entries.
///
/// The i-th exit sits i steps further out than the first so one batch never
/// stacks on a single level. Each entry is parked as unprotected when its
/// fill is booked; the park is lifted in the same checkpoint that records
/// the exit, and stays when the exit cannot be placed.
pub async fn place_exit_batch<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
    filled: &[OrderRecord],
    market: f64,
) -> usize {
    let side = ctx.side();
    let step = ctx.strategy.step_orders;
    let base = side.exit_price(market, ctx.strategy.take_profit);
    let mut placed = 0;

    for (i, entry) in filled.iter().enumerate() {
        let target = ctx.q(side.next_exit_level(base, step * i as f64));
        let parked = state.unprotected.remove(&entry.order_id);
        match ctx
            .submit_at_free_level(state, Role::Exit, OrderTag::Exit, entry.lots, target)
            .await
        {
            Some(_) => placed += 1,
            None => {
                warn!(
                    symbol = ctx.symbol,
                    entry_id = %entry.order_id,
                    lots = entry.lots,
                    target,
                    "🛡️  Exit not placed, position left unprotected"
                );
                state.unprotected.insert(
                    entry.order_id.clone(),
                    UnprotectedPosition {
                        entry_price: entry.price,
                        lots: entry.lots,
                        side,
                        suggested_exit: target,
                        deferred_at: parked.map_or(ctx.now, |p| p.deferred_at),
                    },
                );
            }
        }
    }
    placed
}

/// Retry exits for positions recorded as unprotected
pub async fn retry_unprotected<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
    market: f64,
) -> usize {
    let side = ctx.side();
    let target = ctx.q(side.exit_price(market, ctx.strategy.take_profit));
    let pending: Vec<String> = state.unprotected.keys().cloned().collect();

    let mut placed = 0;
    for entry_id in pending {
        let Some(mut position) = state.unprotected.remove(&entry_id) else {
            continue;
        };
        match ctx
            .submit_at_free_level(state, Role::Exit, OrderTag::Exit, position.lots, target)
            .await
        {
            Some(_) => placed += 1,
            None => {
                position.suggested_exit = target;
                state.unprotected.insert(entry_id, position);
            }
        }
    }
    if placed > 0 {
        info!(symbol = ctx.symbol, placed, left = state.unprotected.len(), "🛡️  Deferred exits placed");
    }
    placed
}

/// REOPEN after an exit fill: back by one take-profit from the exit's price.
///
/// `budget` is the lots still available under the ceiling and shrinks with
/// every accepted REOPEN.
pub async fn place_reopen<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
    exit: &OrderRecord,
    budget: &mut Option<u64>,
) -> Option<OrderRecord> {
    let price = ctx.q(ctx.side().entry_from_exit(exit.price, ctx.strategy.take_profit));
    let lots = budget.map_or(exit.lots, |b| exit.lots.min(b));
    if lots == 0 {
        info!(symbol = ctx.symbol, exit_id = %exit.order_id, price, "REOPEN skipped, no headroom");
        return None;
    }
    let record = ctx
        .submit_at_free_level(state, Role::Entry, OrderTag::Reopen, lots, price)
        .await?;
    if let Some(b) = budget.as_mut() {
        *b = b.saturating_sub(lots);
    }
    Some(record)
}

/// Rebuild entries on the far side of a post-halt market
pub async fn reseed_beyond_market<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
    market: f64,
    slots: u64,
) -> usize {
    if slots == 0 {
        return 0;
    }
    let budget = match portfolio::view(ctx).await {
        Ok(view) => view.available(),
        Err(e) => {
            warn!(symbol = ctx.symbol, error = %e, "⚠️  Portfolio unavailable, reseed skipped");
            return 0;
        }
    };
    let first = ctx.side().next_level_away_from_market(market, ctx.strategy.step_orders);
    place_ladder(ctx, state, first, slots, budget, OrderTag::GapReseed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::side::Side;

    fn strategy(size: u64, count: u32, ceiling: Option<u64>) -> StrategyConfig {
        StrategyConfig {
            ticker: "X".to_string(),
            side: Side::Long,
            market: String::new(),
            size,
            step_orders: 1.0,
            grid_level_count: count,
            take_profit: 2.0,
            stop_loss: None,
            sell_trigger: None,
            portfolio_limit: ceiling,
            enabled: true,
        }
    }

    #[test]
    fn test_layer_slots() {
        let s = strategy(2, 3, Some(10));
        let view = PortfolioView { held: 6, pending_open: 0, ceiling: Some(10) };
        assert_eq!(layer_slots(&s, &view), 2);

        let unbounded = PortfolioView { held: 6, pending_open: 0, ceiling: None };
        assert_eq!(layer_slots(&strategy(2, 3, None), &unbounded), 3);

        let full = PortfolioView { held: 10, pending_open: 0, ceiling: Some(10) };
        assert_eq!(layer_slots(&s, &full), 0);
    }

    #[test]
    fn test_reseed_slots() {
        assert_eq!(reseed_slots(&strategy(1, 3, Some(5)), 2), 3);
        assert_eq!(reseed_slots(&strategy(1, 3, None), 1), 2);
        assert_eq!(reseed_slots(&strategy(2, 3, Some(4)), 5), 0);
    }
}
