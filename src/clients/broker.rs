//! Broker capability interface consumed by the engine.
//!
//! Implementations translate these calls to a concrete venue. The engine never
//! sees wire formats, authentication or price quantization rules.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::core::side::Side;
use crate::core::types::{BrokerOrder, Direction, OrderStatus, TradingStatus};

/// Convenience alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Common error type returned by broker implementations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    /// Connection refused, reset or otherwise lost.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Venue or gateway temporarily unable to serve the request.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("authentication failed: {0}")]
    Unauthorized(String),
    /// Business rejection (margin, price band, lot size).
    #[error("order rejected: {0}")]
    Rejected(String),
    /// An order with this idempotency key already exists.
    #[error("duplicate submission for key {0}")]
    Duplicate(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BrokerError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Transport(_)
                | BrokerError::Timeout(_)
                | BrokerError::RateLimited(_)
                | BrokerError::Unavailable(_)
        )
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BrokerError::Timeout(err.to_string())
        } else if err.is_decode() {
            BrokerError::Serialization(err.to_string())
        } else {
            BrokerError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "price", rename_all = "lowercase")]
pub enum OrderPrice {
    Limit(f64),
    Market,
}

/// A new order submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub direction: Direction,
    pub lots: u64,
    pub price: OrderPrice,
    /// At most one order ever results from a given key
    pub idempotency_key: String,
}

impl OrderRequest {
    fn new(ticker: &str, direction: Direction, lots: u64, price: OrderPrice) -> Self {
        Self {
            ticker: ticker.to_string(),
            direction,
            lots,
            price,
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }

    pub fn entry_limit(side: Side, ticker: &str, lots: u64, price: f64) -> Self {
        Self::new(ticker, side.entry_direction(), lots, OrderPrice::Limit(price))
    }

    pub fn exit_limit(side: Side, ticker: &str, lots: u64, price: f64) -> Self {
        Self::new(ticker, side.exit_direction(), lots, OrderPrice::Limit(price))
    }

    pub fn entry_market(side: Side, ticker: &str, lots: u64) -> Self {
        Self::new(ticker, side.entry_direction(), lots, OrderPrice::Market)
    }

    pub fn exit_market(side: Side, ticker: &str, lots: u64) -> Self {
        Self::new(ticker, side.exit_direction(), lots, OrderPrice::Market)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    pub fn limit_price(&self) -> Option<f64> {
        match self.price {
            OrderPrice::Limit(p) => Some(p),
            OrderPrice::Market => None,
        }
    }
}

/// Broker acknowledgement of an accepted submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    pub idempotency_key: String,
}

/// Current status of one order, with the execution price once known
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    pub status: OrderStatus,
    #[serde(default)]
    pub executed_price: Option<f64>,
}

impl OrderState {
    pub fn new(status: OrderStatus) -> Self {
        Self { status, executed_price: None }
    }
}

/// Execution interface of a single brokerage account
#[async_trait]
pub trait Broker: Send + Sync {
    /// Human-friendly name used in logs
    fn name(&self) -> &str;

    /// Last traded price
    async fn get_price(&self, ticker: &str) -> BrokerResult<f64>;

    /// Working orders on the instrument
    async fn get_orders(&self, ticker: &str) -> BrokerResult<Vec<BrokerOrder>>;

    async fn get_order_state(&self, order_id: &str) -> BrokerResult<OrderState>;

    async fn place_order(&self, request: &OrderRequest) -> BrokerResult<PlacedOrder>;

    /// Look up the order created from an idempotency key
    async fn order_by_key(&self, key: &str) -> BrokerResult<PlacedOrder>;

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()>;

    /// Signed position in lots: positive long, negative short
    async fn get_held_lots(&self, ticker: &str) -> BrokerResult<i64>;

    /// Average position price, `None` when flat
    async fn get_average_price(&self, ticker: &str) -> BrokerResult<Option<f64>>;

    async fn get_trading_status(&self, ticker: &str) -> BrokerResult<TradingStatus>;
}

#[async_trait]
impl<T: Broker + ?Sized> Broker for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn get_price(&self, ticker: &str) -> BrokerResult<f64> {
        (**self).get_price(ticker).await
    }

    async fn get_orders(&self, ticker: &str) -> BrokerResult<Vec<BrokerOrder>> {
        (**self).get_orders(ticker).await
    }

    async fn get_order_state(&self, order_id: &str) -> BrokerResult<OrderState> {
        (**self).get_order_state(order_id).await
    }

    async fn place_order(&self, request: &OrderRequest) -> BrokerResult<PlacedOrder> {
        (**self).place_order(request).await
    }

    async fn order_by_key(&self, key: &str) -> BrokerResult<PlacedOrder> {
        (**self).order_by_key(key).await
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()> {
        (**self).cancel_order(order_id).await
    }

    async fn get_held_lots(&self, ticker: &str) -> BrokerResult<i64> {
        (**self).get_held_lots(ticker).await
    }

    async fn get_average_price(&self, ticker: &str) -> BrokerResult<Option<f64>> {
        (**self).get_average_price(ticker).await
    }

    async fn get_trading_status(&self, ticker: &str) -> BrokerResult<TradingStatus> {
        (**self).get_trading_status(ticker).await
    }
}
