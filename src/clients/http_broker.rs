//! HTTP/JSON client of the broker adapter gateway.
//!
//! The gateway owns the venue protocol; this client only maps the
//! [`Broker`] calls onto its REST endpoints and HTTP statuses onto
//! [`BrokerError`]. Retries are left to [`super::retry::RetryingBroker`].

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::broker::{Broker, BrokerError, BrokerResult, OrderRequest, OrderState, PlacedOrder};
use crate::config::BrokerConfig;
use crate::core::types::{BrokerOrder, Direction, OrderKind, OrderStatus, TradingStatus};

#[derive(Debug, Deserialize)]
struct PriceReply {
    price: f64,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    order_id: String,
    price: f64,
    lots_requested: u64,
    #[serde(default)]
    lots_executed: u64,
    /// Venue status code
    #[serde(default)]
    status: i64,
    direction: Direction,
    #[serde(default = "default_order_type")]
    order_type: OrderKind,
}

fn default_order_type() -> OrderKind {
    OrderKind::Limit
}

impl From<WireOrder> for BrokerOrder {
    fn from(w: WireOrder) -> Self {
        BrokerOrder {
            order_id: w.order_id,
            price: w.price,
            lots_requested: w.lots_requested,
            lots_executed: w.lots_executed,
            status: OrderStatus::from_code(w.status),
            direction: w.direction,
            order_type: w.order_type,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StateReply {
    status: i64,
    #[serde(default)]
    executed_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PlacedReply {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct KeyReply {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct PositionReply {
    lots: i64,
    #[serde(default)]
    average_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    trading: bool,
    #[serde(default)]
    code: Option<String>,
}

/// Map a non-success HTTP status onto the broker error taxonomy
pub fn status_error(status: StatusCode, body: &str, context: &str) -> BrokerError {
    let detail = if body.trim().is_empty() {
        format!("{} ({})", context, status)
    } else {
        format!("{} ({}): {}", context, status, body.trim())
    };
    match status.as_u16() {
        401 | 403 => BrokerError::Unauthorized(detail),
        404 => BrokerError::NotFound(detail),
        408 => BrokerError::Timeout(detail),
        409 => BrokerError::Duplicate(detail),
        429 => BrokerError::RateLimited(detail),
        400..=499 => BrokerError::Rejected(detail),
        _ => BrokerError::Unavailable(detail),
    }
}

pub struct HttpBroker {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpBroker {
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> BrokerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn from_config(config: &BrokerConfig) -> BrokerResult<Self> {
        Self::new(
            &config.base_url,
            config.api_token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> BrokerResult<Response> {
        let response = self.authorize(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body, context))
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder, context: &str) -> BrokerResult<T> {
        let response = self.send(builder, context).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::Serialization(format!("{}: {}", context, e)))
    }

    async fn position(&self, ticker: &str) -> BrokerResult<PositionReply> {
        let request = self.client.get(self.url(&format!("/v1/positions/{}", ticker)));
        self.fetch(request, "position").await
    }
}

#[async_trait]
impl Broker for HttpBroker {
    fn name(&self) -> &str {
        "http"
    }

    async fn get_price(&self, ticker: &str) -> BrokerResult<f64> {
        let request = self.client.get(self.url(&format!("/v1/price/{}", ticker)));
        let reply: PriceReply = self.fetch(request, "price").await?;
        Ok(reply.price)
    }

    async fn get_orders(&self, ticker: &str) -> BrokerResult<Vec<BrokerOrder>> {
        let request = self
            .client
            .get(self.url("/v1/orders"))
            .query(&[("ticker", ticker)]);
        let orders: Vec<WireOrder> = self.fetch(request, "orders").await?;
        Ok(orders.into_iter().map(BrokerOrder::from).collect())
    }

    async fn get_order_state(&self, order_id: &str) -> BrokerResult<OrderState> {
        let request = self.client.get(self.url(&format!("/v1/orders/{}", order_id)));
        let reply: StateReply = self.fetch(request, "order state").await?;
        Ok(OrderState {
            status: OrderStatus::from_code(reply.status),
            executed_price: reply.executed_price,
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> BrokerResult<PlacedOrder> {
        let builder = self
            .client
            .post(self.url("/v1/orders"))
            .json(request);
        debug!(
            ticker = %request.ticker,
            direction = %request.direction,
            lots = request.lots,
            key = %request.idempotency_key,
            "submitting order"
        );
        match self.fetch::<PlacedReply>(builder, "place order").await {
            Ok(reply) => Ok(PlacedOrder {
                order_id: reply.order_id,
                idempotency_key: request.idempotency_key.clone(),
            }),
            Err(BrokerError::Duplicate(_)) => Err(BrokerError::Duplicate(request.idempotency_key.clone())),
            Err(e) => Err(e),
        }
    }

    async fn order_by_key(&self, key: &str) -> BrokerResult<PlacedOrder> {
        let request = self.client.get(self.url(&format!("/v1/orders/by-key/{}", key)));
        let reply: KeyReply = self.fetch(request, "order by key").await?;
        Ok(PlacedOrder {
            order_id: reply.order_id,
            idempotency_key: key.to_string(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()> {
        let request = self.client.delete(self.url(&format!("/v1/orders/{}", order_id)));
        self.send(request, "cancel order").await?;
        Ok(())
    }

    async fn get_held_lots(&self, ticker: &str) -> BrokerResult<i64> {
        Ok(self.position(ticker).await?.lots)
    }

    async fn get_average_price(&self, ticker: &str) -> BrokerResult<Option<f64>> {
        let position = self.position(ticker).await?;
        Ok(position.average_price.filter(|_| position.lots != 0))
    }

    async fn get_trading_status(&self, ticker: &str) -> BrokerResult<TradingStatus> {
        let request = self.client.get(self.url(&format!("/v1/status/{}", ticker)));
        let reply: StatusReply = self.fetch(request, "trading status").await?;
        Ok(if reply.trading {
            TradingStatus::Normal
        } else {
            TradingStatus::Halted(reply.code.unwrap_or_else(|| "unknown".to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(StatusCode::CONFLICT, "", "x"), BrokerError::Duplicate(_)));
        assert!(matches!(status_error(StatusCode::NOT_FOUND, "", "x"), BrokerError::NotFound(_)));
        assert!(matches!(status_error(StatusCode::TOO_MANY_REQUESTS, "", "x"), BrokerError::RateLimited(_)));
        assert!(matches!(status_error(StatusCode::UNAUTHORIZED, "", "x"), BrokerError::Unauthorized(_)));
        assert!(matches!(status_error(StatusCode::UNPROCESSABLE_ENTITY, "margin", "x"), BrokerError::Rejected(_)));
        assert!(matches!(status_error(StatusCode::BAD_GATEWAY, "", "x"), BrokerError::Unavailable(_)));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "", "x").is_transient());
    }

    #[test]
    fn test_wire_order_defaults() {
        let raw = r#"{"order_id":"7","price":99.5,"lots_requested":2,"direction":"buy"}"#;
        let order: BrokerOrder = serde_json::from_str::<WireOrder>(raw).unwrap().into();
        assert_eq!(order.status, OrderStatus::Live);
        assert_eq!(order.order_type, OrderKind::Limit);
        assert_eq!(order.remaining_lots(), 2);
    }
}
