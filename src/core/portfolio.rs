// Portfolio headroom from broker truth and the cut-to-limit enforcement

use tracing::{debug, info, warn};

use super::context::SymbolContext;
use super::ledger::SymbolRuntimeState;
use super::side::Side;
use super::types::BrokerOrder;
use crate::clients::broker::Broker;
use crate::error::{TradingError, TradingResult};

/// Derived from broker data each time a decision depends on it; never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortfolioView {
    pub held: u64,
    pub pending_open: u64,
    pub ceiling: Option<u64>,
}

impl PortfolioView {
    /// `None` means unbounded
    pub fn headroom(&self) -> Option<u64> {
        self.ceiling.map(|c| c.saturating_sub(self.held))
    }

    /// Headroom not yet spoken for by resting entries
    pub fn available(&self) -> Option<u64> {
        self.headroom().map(|h| h.saturating_sub(self.pending_open))
    }

    /// Lots over the ceiling once resting entries fill
    pub fn excess(&self) -> u64 {
        match self.ceiling {
            Some(c) => (self.held + self.pending_open).saturating_sub(c),
            None => 0,
        }
    }

    /// Cap a desired order size by what is still available
    pub fn cap(&self, lots: u64) -> u64 {
        match self.available() {
            Some(a) => lots.min(a),
            None => lots,
        }
    }
}

/// Remaining lots of working entry-direction orders, protective types excluded
pub fn pending_open(orders: &[BrokerOrder], side: Side) -> u64 {
    orders
        .iter()
        .filter(|o| !o.status.is_terminal())
        .filter(|o| o.direction == side.entry_direction() && !o.order_type.is_protective())
        .map(BrokerOrder::remaining_lots)
        .sum()
}

/// Broker-reported position on the strategy side, floored at zero
pub async fn held<B: Broker + ?Sized>(ctx: &SymbolContext<'_, B>) -> TradingResult<u64> {
    let signed = ctx
        .broker
        .get_held_lots(ctx.ticker())
        .await
        .map_err(|e| TradingError::data_unavailable(ctx.symbol, e))?;
    Ok(ctx.side().held_from_signed(signed))
}

pub async fn view<B: Broker + ?Sized>(ctx: &SymbolContext<'_, B>) -> TradingResult<PortfolioView> {
    let held = held(ctx).await?;
    let orders = ctx
        .broker
        .get_orders(ctx.ticker())
        .await
        .map_err(|e| TradingError::data_unavailable(ctx.symbol, e))?;
    Ok(PortfolioView {
        held,
        pending_open: pending_open(&orders, ctx.side()),
        ceiling: ctx.strategy.portfolio_limit,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CutOutcome {
    pub cancelled: Vec<String>,
    pub freed: u64,
}

/// Cancel entries farthest from market first until held + pending fits the
/// ceiling or no entries are left.
pub async fn cut_to_limit<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
) -> TradingResult<CutOutcome> {
    let mut outcome = CutOutcome::default();
    let Some(ceiling) = ctx.strategy.portfolio_limit else {
        return Ok(outcome);
    };

    let held = held(ctx).await?;
    let orders = ctx
        .broker
        .get_orders(ctx.ticker())
        .await
        .map_err(|e| TradingError::data_unavailable(ctx.symbol, e))?;
    let side = ctx.side();
    let view = PortfolioView {
        held,
        pending_open: pending_open(&orders, side),
        ceiling: Some(ceiling),
    };
    let excess = view.excess();
    if excess == 0 || view.pending_open == 0 {
        debug!(symbol = ctx.symbol, held, pending = view.pending_open, ceiling, "within portfolio limit");
        return Ok(outcome);
    }

    warn!(
        symbol = ctx.symbol,
        held,
        pending = view.pending_open,
        ceiling,
        excess,
        "✂️  Portfolio limit exceeded, cancelling far entries"
    );

    let mut candidates: Vec<&BrokerOrder> = orders
        .iter()
        .filter(|o| !o.status.is_terminal())
        .filter(|o| o.direction == side.entry_direction() && !o.order_type.is_protective())
        .filter(|o| o.remaining_lots() > 0)
        .collect();
    candidates.sort_by(|a, b| {
        side.farthest_first(a.price, b.price)
            .then_with(|| a.order_id.cmp(&b.order_id))
    });

    for order in candidates {
        if outcome.freed >= excess {
            break;
        }
        match ctx.broker.cancel_order(&order.order_id).await {
            Ok(()) => {
                state.remove(&order.order_id);
                ctx.checkpoint(state);
                outcome.freed += order.remaining_lots();
                outcome.cancelled.push(order.order_id.clone());
                debug!(symbol = ctx.symbol, order_id = %order.order_id, price = order.price, "entry cut");
            }
            Err(e) => {
                warn!(symbol = ctx.symbol, order_id = %order.order_id, error = %e, "⚠️  Cut cancel failed");
            }
        }
    }

    if !outcome.cancelled.is_empty() {
        tokio::time::sleep(ctx.engine.post_cancel_delay()).await;
        info!(
            symbol = ctx.symbol,
            cancelled = outcome.cancelled.len(),
            freed = outcome.freed,
            "✂️  Cut to portfolio limit"
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Direction, OrderKind, OrderStatus};

    fn order(id: &str, direction: Direction, requested: u64, executed: u64, kind: OrderKind) -> BrokerOrder {
        BrokerOrder {
            order_id: id.to_string(),
            price: 100.0,
            lots_requested: requested,
            lots_executed: executed,
            status: OrderStatus::Live,
            direction,
            order_type: kind,
        }
    }

    #[test]
    fn test_pending_open_counts_entry_side_remaining() {
        let orders = vec![
            order("1", Direction::Buy, 3, 1, OrderKind::Limit),
            order("2", Direction::Buy, 2, 0, OrderKind::StopLoss),
            order("3", Direction::Sell, 5, 0, OrderKind::Limit),
            order("4", Direction::Buy, 1, 0, OrderKind::Limit),
        ];
        assert_eq!(pending_open(&orders, Side::Long), 3);
        assert_eq!(pending_open(&orders, Side::Short), 5);
    }

    #[test]
    fn test_view_arithmetic() {
        let view = PortfolioView { held: 3, pending_open: 1, ceiling: Some(5) };
        assert_eq!(view.headroom(), Some(2));
        assert_eq!(view.available(), Some(1));
        assert_eq!(view.excess(), 0);
        assert_eq!(view.cap(4), 1);

        let over = PortfolioView { held: 6, pending_open: 2, ceiling: Some(5) };
        assert_eq!(over.headroom(), Some(0));
        assert_eq!(over.excess(), 3);

        let open = PortfolioView { held: 100, pending_open: 50, ceiling: None };
        assert_eq!(open.headroom(), None);
        assert_eq!(open.cap(7), 7);
        assert_eq!(open.excess(), 0);
    }
}
