// Common test utilities and helpers
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use grid_executor::clients::OrderRequest;
use grid_executor::core::{InstrumentMeta, OrderRecord, OrderTag, Role};
use grid_executor::{
    Broker, Config, GridEngine, MemoryFillSink, MemoryStateStore, PaperBroker, RetryPolicy,
    RetryingBroker, Side, StateRepository, StrategyConfig, SymbolRuntimeState,
};

pub const TICKER: &str = "SBER";

pub type TestEngine = GridEngine<RetryingBroker<Arc<PaperBroker>>, Arc<MemoryStateStore>, Arc<MemoryFillSink>>;

/// Engine over a paper venue with handles kept for inspection
pub struct Harness {
    pub engine: TestEngine,
    pub paper: Arc<PaperBroker>,
    pub store: Arc<MemoryStateStore>,
    pub fills: Arc<MemoryFillSink>,
}

impl Harness {
    pub fn new(config: Config, price: f64) -> Self {
        let paper = Arc::new(PaperBroker::new());
        paper.set_price(TICKER, price);
        Self::with_parts(config, paper, Arc::new(MemoryStateStore::new()), Arc::new(MemoryFillSink::new()))
    }

    pub fn with_parts(
        config: Config,
        paper: Arc<PaperBroker>,
        store: Arc<MemoryStateStore>,
        fills: Arc<MemoryFillSink>,
    ) -> Self {
        let broker = RetryingBroker::new(Arc::clone(&paper), RetryPolicy::immediate(2));
        let engine = GridEngine::new(config, broker, Arc::clone(&store), Arc::clone(&fills));
        Self { engine, paper, store, fills }
    }

    /// Same venue, store and journal under a different configuration
    pub fn reconfigure(self, config: Config) -> Self {
        Self::with_parts(config, self.paper, self.store, self.fills)
    }

    pub fn state(&self) -> SymbolRuntimeState {
        self.store
            .load(TICKER)
            .expect("store readable")
            .expect("state saved")
    }

    pub fn entry_prices(&self) -> Vec<f64> {
        let mut prices: Vec<f64> = self.state().entries.values().map(|r| r.price).collect();
        prices.sort_by(|a, b| b.partial_cmp(a).unwrap());
        prices
    }

    pub fn exit_prices(&self) -> Vec<f64> {
        let mut prices: Vec<f64> = self.state().exits.values().map(|r| r.price).collect();
        prices.sort_by(|a, b| a.partial_cmp(b).unwrap());
        prices
    }
}

pub fn instrument() -> InstrumentMeta {
    InstrumentMeta {
        instrument_id: "BBG004730N88".to_string(),
        price_step: 0.01,
        lot_size: 10,
        decimals: 2,
    }
}

/// size 1, step 1.0, three levels, take profit 2.0
pub fn strategy(side: Side) -> StrategyConfig {
    StrategyConfig {
        ticker: TICKER.to_string(),
        side,
        market: "MOEX".to_string(),
        size: 1,
        step_orders: 1.0,
        grid_level_count: 3,
        take_profit: 2.0,
        stop_loss: None,
        sell_trigger: None,
        portfolio_limit: None,
        enabled: true,
    }
}

pub fn config_with(strategy: StrategyConfig) -> Config {
    let mut config = Config::default();
    config.engine = config.engine.without_delays();
    config.instruments = BTreeMap::from([(TICKER.to_string(), instrument())]);
    config.symbols = BTreeMap::from([(TICKER.to_string(), strategy)]);
    config
}

/// 2024-03-04 at the given UTC time; venue time is three hours ahead
pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, second).unwrap()
}

/// 12:00 UTC, well clear of every pre-halt window
pub fn midday() -> DateTime<Utc> {
    at(12, 0, 0)
}

/// Rest a limit order at the paper venue and track it in `state`
pub async fn track_limit(
    paper: &PaperBroker,
    state: &mut SymbolRuntimeState,
    side: Side,
    role: Role,
    price: f64,
) -> String {
    let request = match role {
        Role::Entry => OrderRequest::entry_limit(side, TICKER, 1, price),
        Role::Exit => OrderRequest::exit_limit(side, TICKER, 1, price),
    };
    let placed = paper.place_order(&request).await.expect("paper accepts order");
    state.track(OrderRecord {
        order_id: placed.order_id.clone(),
        client_key: request.idempotency_key.clone(),
        price,
        lots: 1,
        role,
        tag: OrderTag::Grid,
        placed_at: midday(),
    });
    placed.order_id
}

/// Create a temporary directory for test databases
pub fn create_temp_db_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");
    (temp_dir, db_path)
}
