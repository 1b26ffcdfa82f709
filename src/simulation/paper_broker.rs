// In-memory paper venue used for dry runs and tests
//
// Limit orders rest until a price update crosses them, market orders fill at
// the last price, and idempotency keys behave like the real gateway: a second
// submission with a known key is answered with a duplicate error.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::clients::broker::{
    Broker, BrokerError, BrokerResult, OrderPrice, OrderRequest, OrderState, PlacedOrder,
};
use crate::config::BrokerConfig;
use crate::core::types::{BrokerOrder, Direction, OrderKind, OrderStatus, TradingStatus};

#[derive(Debug, Clone)]
struct PaperOrder {
    order_id: String,
    ticker: String,
    direction: Direction,
    lots: u64,
    executed: u64,
    price: f64,
    kind: OrderKind,
    status: OrderStatus,
    executed_price: Option<f64>,
}

impl PaperOrder {
    fn crosses(&self, market: f64) -> bool {
        match self.direction {
            Direction::Buy => market <= self.price,
            Direction::Sell => market >= self.price,
        }
    }

    fn to_broker_order(&self) -> BrokerOrder {
        BrokerOrder {
            order_id: self.order_id.clone(),
            price: self.price,
            lots_requested: self.lots,
            lots_executed: self.executed,
            status: self.status,
            direction: self.direction,
            order_type: self.kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Position {
    lots: i64,
    avg_price: f64,
}

impl Position {
    fn apply(&mut self, direction: Direction, lots: u64, price: f64) {
        let delta = match direction {
            Direction::Buy => lots as i64,
            Direction::Sell => -(lots as i64),
        };
        let next = self.lots + delta;
        if next == 0 {
            self.avg_price = 0.0;
        } else if self.lots == 0 || self.lots.signum() != next.signum() {
            self.avg_price = price;
        } else if delta.signum() == self.lots.signum() {
            let old = self.lots.abs() as f64;
            let add = delta.abs() as f64;
            self.avg_price = (self.avg_price * old + price * add) / (old + add);
        }
        self.lots = next;
    }
}

#[derive(Debug, Default)]
struct PaperState {
    prices: HashMap<String, f64>,
    orders: BTreeMap<String, PaperOrder>,
    keys: HashMap<String, String>,
    positions: HashMap<String, Position>,
    statuses: HashMap<String, TradingStatus>,
    failures: HashMap<String, VecDeque<BrokerError>>,
    next_id: u64,
    submissions: usize,
    cancels: usize,
}

impl PaperState {
    fn take_failure(&mut self, operation: &str) -> BrokerResult<()> {
        match self.failures.get_mut(operation).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn halted(&self, ticker: &str) -> bool {
        self.statuses
            .get(ticker)
            .map(|s| !s.is_normal())
            .unwrap_or(false)
    }

    fn fill(&mut self, order_id: &str, price: f64) {
        let filled = match self.orders.get_mut(order_id) {
            Some(order) if order.status == OrderStatus::Live => {
                let remaining = order.lots - order.executed;
                order.status = OrderStatus::Filled;
                order.executed = order.lots;
                order.executed_price = Some(price);
                Some((order.ticker.clone(), order.direction, remaining))
            }
            _ => None,
        };
        if let Some((ticker, direction, lots)) = filled {
            self.positions
                .entry(ticker.clone())
                .or_default()
                .apply(direction, lots, price);
            debug!(ticker = %ticker, order_id, price, lots, "paper order filled");
        }
    }

    fn match_resting(&mut self, ticker: &str) {
        if self.halted(ticker) {
            return;
        }
        let Some(&market) = self.prices.get(ticker) else {
            return;
        };
        let crossed: Vec<(String, f64)> = self
            .orders
            .values()
            .filter(|o| o.ticker == ticker && o.status == OrderStatus::Live)
            .filter(|o| o.kind == OrderKind::Limit && o.crosses(market))
            .map(|o| (o.order_id.clone(), o.price))
            .collect();
        for (order_id, price) in crossed {
            self.fill(&order_id, price);
        }
    }
}

/// Paper venue with the same contract as the real gateway
#[derive(Debug, Default)]
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        let broker = Self::new();
        for (ticker, price) in &config.paper_prices {
            broker.set_price(ticker, *price);
        }
        broker
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move the market; resting limits crossed by the new price fill at their limit
    pub fn set_price(&self, ticker: &str, price: f64) {
        let mut state = self.lock();
        state.prices.insert(ticker.to_string(), price);
        state.match_resting(ticker);
    }

    /// Move the market without matching, like a gap across a halt
    pub fn gap_price(&self, ticker: &str, price: f64) {
        self.lock().prices.insert(ticker.to_string(), price);
    }

    pub fn set_trading_status(&self, ticker: &str, status: TradingStatus) {
        let mut state = self.lock();
        state.statuses.insert(ticker.to_string(), status);
        state.match_resting(ticker);
    }

    pub fn set_position(&self, ticker: &str, lots: i64, avg_price: f64) {
        self.lock()
            .positions
            .insert(ticker.to_string(), Position { lots, avg_price });
    }

    /// Rest an order that did not come from the engine
    pub fn place_external(
        &self,
        ticker: &str,
        direction: Direction,
        lots: u64,
        price: f64,
        kind: OrderKind,
    ) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let order_id = format!("EXT{:06}", state.next_id);
        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                order_id: order_id.clone(),
                ticker: ticker.to_string(),
                direction,
                lots,
                executed: 0,
                price,
                kind,
                status: OrderStatus::Live,
                executed_price: None,
            },
        );
        order_id
    }

    /// Force a resting order to fill at its own price
    pub fn fill_order(&self, order_id: &str) {
        let mut state = self.lock();
        let price = state.orders.get(order_id).map(|o| o.price);
        if let Some(price) = price {
            state.fill(order_id, price);
        }
    }

    /// Execute `lots` of a resting order at its own price; the rest stays live
    pub fn fill_partially(&self, order_id: &str, lots: u64) {
        let mut state = self.lock();
        let executed = match state.orders.get_mut(order_id) {
            Some(order) if order.status == OrderStatus::Live => {
                let lots = lots.min(order.lots - order.executed);
                order.executed += lots;
                Some((order.ticker.clone(), order.direction, lots, order.price))
            }
            _ => None,
        };
        if let Some((ticker, direction, lots, price)) = executed {
            state.positions.entry(ticker).or_default().apply(direction, lots, price);
        }
    }

    /// Queue `times` failures for the named operation
    pub fn fail_next(&self, operation: &str, error: BrokerError, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(operation.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    pub fn live_orders(&self, ticker: &str) -> Vec<BrokerOrder> {
        self.lock()
            .orders
            .values()
            .filter(|o| o.ticker == ticker && o.status == OrderStatus::Live)
            .map(PaperOrder::to_broker_order)
            .collect()
    }

    pub fn order(&self, order_id: &str) -> Option<BrokerOrder> {
        self.lock().orders.get(order_id).map(PaperOrder::to_broker_order)
    }

    pub fn held_lots(&self, ticker: &str) -> i64 {
        self.lock().positions.get(ticker).map(|p| p.lots).unwrap_or(0)
    }

    /// Accepted submissions, market and limit
    pub fn submissions(&self) -> usize {
        self.lock().submissions
    }

    pub fn cancels(&self) -> usize {
        self.lock().cancels
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn get_price(&self, ticker: &str) -> BrokerResult<f64> {
        let mut state = self.lock();
        state.take_failure("get_price")?;
        state
            .prices
            .get(ticker)
            .copied()
            .ok_or_else(|| BrokerError::NotFound(format!("no price for {}", ticker)))
    }

    async fn get_orders(&self, ticker: &str) -> BrokerResult<Vec<BrokerOrder>> {
        self.lock().take_failure("get_orders")?;
        Ok(self.live_orders(ticker))
    }

    async fn get_order_state(&self, order_id: &str) -> BrokerResult<OrderState> {
        let mut state = self.lock();
        state.take_failure("get_order_state")?;
        state
            .orders
            .get(order_id)
            .map(|o| OrderState {
                status: o.status,
                executed_price: o.executed_price,
            })
            .ok_or_else(|| BrokerError::NotFound(order_id.to_string()))
    }

    async fn place_order(&self, request: &OrderRequest) -> BrokerResult<PlacedOrder> {
        let mut state = self.lock();
        state.take_failure("place_order")?;

        if state.keys.contains_key(&request.idempotency_key) {
            return Err(BrokerError::Duplicate(request.idempotency_key.clone()));
        }
        if request.lots == 0 {
            return Err(BrokerError::Rejected("zero lots".to_string()));
        }
        if state.halted(&request.ticker) {
            return Err(BrokerError::Rejected(format!("{} is not trading", request.ticker)));
        }
        let market = state
            .prices
            .get(&request.ticker)
            .copied()
            .ok_or_else(|| BrokerError::Rejected(format!("no market for {}", request.ticker)))?;

        state.next_id += 1;
        state.submissions += 1;
        let order_id = format!("P{:06}", state.next_id);
        let (price, kind) = match request.price {
            OrderPrice::Limit(p) => (p, OrderKind::Limit),
            OrderPrice::Market => (market, OrderKind::Market),
        };
        let order = PaperOrder {
            order_id: order_id.clone(),
            ticker: request.ticker.clone(),
            direction: request.direction,
            lots: request.lots,
            executed: 0,
            price,
            kind,
            status: OrderStatus::Live,
            executed_price: None,
        };
        let immediate = kind == OrderKind::Market || order.crosses(market);
        state.orders.insert(order_id.clone(), order);
        state
            .keys
            .insert(request.idempotency_key.clone(), order_id.clone());

        if immediate {
            state.fill(&order_id, market);
        }

        info!(
            ticker = %request.ticker,
            order_id = %order_id,
            direction = %request.direction,
            lots = request.lots,
            price,
            "📝 Paper order accepted"
        );

        Ok(PlacedOrder {
            order_id,
            idempotency_key: request.idempotency_key.clone(),
        })
    }

    async fn order_by_key(&self, key: &str) -> BrokerResult<PlacedOrder> {
        let mut state = self.lock();
        state.take_failure("order_by_key")?;
        state
            .keys
            .get(key)
            .map(|order_id| PlacedOrder {
                order_id: order_id.clone(),
                idempotency_key: key.to_string(),
            })
            .ok_or_else(|| BrokerError::NotFound(format!("no order for key {}", key)))
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()> {
        let mut state = self.lock();
        state.take_failure("cancel_order")?;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::NotFound(order_id.to_string()))?;
        if order.status != OrderStatus::Live {
            return Err(BrokerError::Rejected(format!(
                "order {} is already {}",
                order_id, order.status
            )));
        }
        order.status = OrderStatus::Canceled;
        state.cancels += 1;
        Ok(())
    }

    async fn get_held_lots(&self, ticker: &str) -> BrokerResult<i64> {
        self.lock().take_failure("get_held_lots")?;
        Ok(self.held_lots(ticker))
    }

    async fn get_average_price(&self, ticker: &str) -> BrokerResult<Option<f64>> {
        let mut state = self.lock();
        state.take_failure("get_average_price")?;
        Ok(state
            .positions
            .get(ticker)
            .filter(|p| p.lots != 0)
            .map(|p| p.avg_price))
    }

    async fn get_trading_status(&self, ticker: &str) -> BrokerResult<TradingStatus> {
        let mut state = self.lock();
        state.take_failure("get_trading_status")?;
        Ok(state
            .statuses
            .get(ticker)
            .cloned()
            .unwrap_or(TradingStatus::Normal))
    }
}
