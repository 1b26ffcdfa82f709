// Independent sell-trigger ladder for long strategies.
//
// When the position trades far enough above its average price, the lots not
// yet covered by working sell orders get exits stacked above market.

use tracing::{debug, info, warn};

use super::context::SymbolContext;
use super::ledger::SymbolRuntimeState;
use super::portfolio;
use super::price_guard;
use super::side::Side;
use super::types::{BrokerOrder, Direction, OrderTag, Role};
use crate::clients::broker::{Broker, OrderRequest};
use crate::error::{TradingError, TradingResult};

/// Lots already committed by working sell orders at the broker
fn committed_sell_lots(orders: &[BrokerOrder]) -> u64 {
    orders
        .iter()
        .filter(|o| !o.status.is_terminal())
        .filter(|o| o.direction == Direction::Sell && !o.order_type.is_protective())
        .map(BrokerOrder::remaining_lots)
        .sum()
}

/// Returns the number of exits placed this pass.
pub async fn evaluate<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
) -> TradingResult<usize> {
    if ctx.side() != Side::Long {
        return Ok(0);
    }
    let Some(threshold) = ctx.strategy.sell_trigger_threshold() else {
        return Ok(0);
    };

    let held = portfolio::held(ctx).await?;
    if held == 0 {
        return Ok(0);
    }
    let avg = ctx
        .broker
        .get_average_price(ctx.ticker())
        .await
        .map_err(|e| TradingError::data_unavailable(ctx.symbol, e))?;
    let Some(avg) = avg else {
        return Ok(0);
    };
    let last = ctx.market_price().await?;
    if last - avg <= threshold {
        debug!(symbol = ctx.symbol, last, avg, threshold, "sell trigger not reached");
        return Ok(0);
    }

    let broker_orders = price_guard::broker_levels(ctx.broker, ctx.ticker()).await;
    let committed = match &broker_orders {
        Some(orders) => committed_sell_lots(orders),
        None => {
            warn!(symbol = ctx.symbol, "⚠️  Broker orders unavailable, counting tracked exits only");
            state.exit_lots()
        }
    };
    let to_cover = held.saturating_sub(committed);
    if to_cover == 0 {
        debug!(symbol = ctx.symbol, held, committed, "position fully covered by sells");
        return Ok(0);
    }

    let step = ctx.strategy.step_orders;
    let size = ctx.strategy.size.max(1);
    let start = state
        .sell_trigger_levels()
        .into_iter()
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))))
        .unwrap_or(last);

    info!(
        symbol = ctx.symbol,
        last,
        avg,
        threshold,
        held,
        committed,
        to_cover,
        "🎯 Sell trigger fired"
    );

    let mut remaining = to_cover;
    let mut level = start;
    let mut placed = 0;
    let max_steps = to_cover / size + 1 + u64::from(ctx.engine.max_level_shifts);
    for _ in 0..max_steps {
        if remaining == 0 {
            break;
        }
        level = ctx.q(level + step);
        // Without the listing each level asks the broker again; a failed
        // check leaves the level occupied
        let free = match &broker_orders {
            Some(orders) => {
                price_guard::local_free(state, ctx.meta, level)
                    && price_guard::broker_free(orders, ctx.meta, level)
            }
            None => price_guard::is_level_free(ctx.broker, ctx.ticker(), state, ctx.meta, level).await,
        };
        if !free {
            continue;
        }

        let lots = size.min(remaining);
        let request = OrderRequest::exit_limit(Side::Long, ctx.ticker(), lots, level);
        if ctx
            .submit(state, request, Role::Exit, OrderTag::SellTrigger, level)
            .await
            .is_some()
        {
            remaining -= lots;
            placed += 1;
        }
    }

    if remaining > 0 {
        warn!(symbol = ctx.symbol, remaining, placed, "⚠️  Sell-trigger ladder incomplete");
    }
    Ok(placed)
}
