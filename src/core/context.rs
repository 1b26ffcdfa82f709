// Everything one symbol pass needs, bundled so helpers take a single argument

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::ledger::{OrderRecord, SymbolRuntimeState};
use super::price_guard;
use super::side::Side;
use super::types::{InstrumentMeta, OrderTag, Role};
use crate::clients::broker::{Broker, OrderRequest};
use crate::config::{EngineConfig, StrategyConfig};
use crate::error::{TradingError, TradingResult};
use crate::store::StateRepository;

pub struct SymbolContext<'a, B: Broker + ?Sized> {
    pub symbol: &'a str,
    pub broker: &'a B,
    pub strategy: &'a StrategyConfig,
    pub meta: &'a InstrumentMeta,
    pub engine: &'a EngineConfig,
    /// Written after every accepted placement and acknowledged cancel
    pub store: &'a dyn StateRepository,
    /// Clock reading for the whole pass
    pub now: DateTime<Utc>,
}

impl<'a, B: Broker + ?Sized> SymbolContext<'a, B> {
    pub fn side(&self) -> Side {
        self.strategy.side
    }

    pub fn ticker(&self) -> &str {
        &self.strategy.ticker
    }

    pub fn q(&self, price: f64) -> f64 {
        self.meta.quantize(price)
    }

    pub async fn market_price(&self) -> TradingResult<f64> {
        let price = self
            .broker
            .get_price(self.ticker())
            .await
            .map_err(|e| TradingError::data_unavailable(self.symbol, e))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(TradingError::data_unavailable(
                self.symbol,
                format!("bad market price {}", price),
            ));
        }
        Ok(self.q(price))
    }

    /// Save the state now so a restart resumes from here.
    ///
    /// A store failure is logged and surfaces again at the end-of-pass save.
    pub fn checkpoint(&self, state: &mut SymbolRuntimeState) -> bool {
        if !state.is_consistent() {
            error!(symbol = self.symbol, "❌ Ledger maps and order list disagree");
        }
        state.updated_at = Some(self.now);
        match self.store.save(state) {
            Ok(()) => true,
            Err(e) => {
                error!(symbol = self.symbol, error = %e, "❌ State checkpoint failed");
                false
            }
        }
    }

    /// Submit one order, track it on acceptance and checkpoint the state.
    ///
    /// `record_price` is the price kept in the ledger; for market orders it is
    /// the reference price the REOPEN and the level guard work from.
    /// Failures are logged and reported as `None`.
    pub async fn submit(
        &self,
        state: &mut SymbolRuntimeState,
        request: OrderRequest,
        role: Role,
        tag: OrderTag,
        record_price: f64,
    ) -> Option<OrderRecord> {
        if request.lots == 0 {
            return None;
        }
        match self.broker.place_order(&request).await {
            Ok(placed) => {
                let record = OrderRecord {
                    order_id: placed.order_id,
                    client_key: request.idempotency_key.clone(),
                    price: self.q(record_price),
                    lots: request.lots,
                    role,
                    tag,
                    placed_at: self.now,
                };
                info!(
                    symbol = self.symbol,
                    order_id = %record.order_id,
                    direction = %request.direction,
                    role = %role,
                    tag = tag.as_str(),
                    price = record.price,
                    lots = record.lots,
                    "✅ Order placed"
                );
                state.track(record.clone());
                self.checkpoint(state);
                Some(record)
            }
            Err(e) => {
                warn!(
                    symbol = self.symbol,
                    direction = %request.direction,
                    role = %role,
                    tag = tag.as_str(),
                    price = record_price,
                    lots = request.lots,
                    error = %e,
                    "⚠️  Order placement failed, deferred to a later pass"
                );
                None
            }
        }
    }

    /// Place a limit order at the first free level from `start`.
    ///
    /// Entries shift away from market, exits shift further out on the exit
    /// side, one `step_orders` at a time.
    pub async fn submit_at_free_level(
        &self,
        state: &mut SymbolRuntimeState,
        role: Role,
        tag: OrderTag,
        lots: u64,
        start: f64,
    ) -> Option<OrderRecord> {
        if lots == 0 {
            return None;
        }
        let side = self.side();
        let step = self.strategy.step_orders;
        let price = match role {
            Role::Entry => {
                price_guard::find_free_level(
                    self.broker,
                    self.ticker(),
                    state,
                    self.meta,
                    start,
                    self.engine.max_level_shifts,
                    |p| side.next_level_away_from_market(p, step),
                )
                .await
            }
            Role::Exit => {
                price_guard::find_free_level(
                    self.broker,
                    self.ticker(),
                    state,
                    self.meta,
                    start,
                    self.engine.max_level_shifts,
                    |p| side.next_exit_level(p, step),
                )
                .await
            }
        }?;
        let request = match role {
            Role::Entry => OrderRequest::entry_limit(side, self.ticker(), lots, price),
            Role::Exit => OrderRequest::exit_limit(side, self.ticker(), lots, price),
        };
        self.submit(state, request, role, tag, price).await
    }

    /// Cancel at the broker; the ledger forgets the order only on acknowledgement
    pub async fn cancel(&self, state: &mut SymbolRuntimeState, order_id: &str) -> bool {
        match self.broker.cancel_order(order_id).await {
            Ok(()) => {
                state.remove(order_id);
                self.checkpoint(state);
                info!(symbol = self.symbol, order_id, "🗑️  Order cancelled");
                true
            }
            Err(e) => {
                warn!(symbol = self.symbol, order_id, error = %e, "⚠️  Cancel failed, order stays tracked");
                false
            }
        }
    }
}
