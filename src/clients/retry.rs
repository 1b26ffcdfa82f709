// Retry decorator for any broker: bounded exponential backoff with full jitter

use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use super::broker::{Broker, BrokerError, BrokerResult, OrderRequest, OrderState, PlacedOrder};
use crate::config::BrokerConfig;
use crate::core::types::{BrokerOrder, TradingStatus};

const MAX_SHIFT: u32 = 10;

/// Retry mechanism with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// No waiting between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Uniform in `[0, min(cap, base * 2^attempt)]`
    pub fn delay_for(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let base_ms = self.base_delay.as_millis().min(u128::from(u64::MAX)) as u64;
        let cap_ms = self.max_delay.as_millis().min(u128::from(u64::MAX)) as u64;
        let multiplier = 1u64.checked_shl(attempt.min(MAX_SHIFT)).unwrap_or(u64::MAX);
        let capped_ms = base_ms.saturating_mul(multiplier).min(cap_ms);
        if capped_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(0..=capped_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            5,                          // 5 retries
            Duration::from_secs(1),     // 1s base delay
            Duration::from_secs(16),    // 16s max delay
        )
    }
}

/// Wraps a broker so transient failures never reach the engine until the
/// retry budget is spent. Duplicate submissions resolve to the existing order.
pub struct RetryingBroker<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: Broker> RetryingBroker<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn call<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> BrokerResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = BrokerResult<T>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt, &mut rand::thread_rng());
                    warn!(
                        broker = self.inner.name(),
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "⚠️  Transient broker error, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<B: Broker> Broker for RetryingBroker<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_price(&self, ticker: &str) -> BrokerResult<f64> {
        self.call("get_price", || self.inner.get_price(ticker)).await
    }

    async fn get_orders(&self, ticker: &str) -> BrokerResult<Vec<BrokerOrder>> {
        self.call("get_orders", || self.inner.get_orders(ticker)).await
    }

    async fn get_order_state(&self, order_id: &str) -> BrokerResult<OrderState> {
        self.call("get_order_state", || self.inner.get_order_state(order_id)).await
    }

    async fn place_order(&self, request: &OrderRequest) -> BrokerResult<PlacedOrder> {
        match self.call("place_order", || self.inner.place_order(request)).await {
            Err(BrokerError::Duplicate(key)) => {
                info!(
                    ticker = %request.ticker,
                    key = %key,
                    "🔁 Duplicate submission, resolving existing order by key"
                );
                self.call("order_by_key", || self.inner.order_by_key(&request.idempotency_key))
                    .await
            }
            other => other,
        }
    }

    async fn order_by_key(&self, key: &str) -> BrokerResult<PlacedOrder> {
        self.call("order_by_key", || self.inner.order_by_key(key)).await
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()> {
        self.call("cancel_order", || self.inner.cancel_order(order_id)).await
    }

    async fn get_held_lots(&self, ticker: &str) -> BrokerResult<i64> {
        self.call("get_held_lots", || self.inner.get_held_lots(ticker)).await
    }

    async fn get_average_price(&self, ticker: &str) -> BrokerResult<Option<f64>> {
        self.call("get_average_price", || self.inner.get_average_price(ticker)).await
    }

    async fn get_trading_status(&self, ticker: &str) -> BrokerResult<TradingStatus> {
        self.call("get_trading_status", || self.inner.get_trading_status(ticker)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::side::Side;
    use crate::simulation::PaperBroker;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1000));
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..20 {
            let delay = policy.delay_for(attempt, &mut rng);
            assert!(delay <= Duration::from_millis(1000));
        }
        let first = policy.delay_for(0, &mut rng);
        assert!(first <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let paper = Arc::new(PaperBroker::new());
        paper.set_price("SBER", 100.0);
        paper.fail_next("get_price", BrokerError::Timeout("slow".into()), 2);

        let broker = RetryingBroker::new(Arc::clone(&paper), RetryPolicy::immediate(3));
        assert_eq!(broker.get_price("SBER").await.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let paper = Arc::new(PaperBroker::new());
        paper.set_price("SBER", 100.0);
        paper.fail_next("get_price", BrokerError::Unavailable("down".into()), 5);

        let broker = RetryingBroker::new(Arc::clone(&paper), RetryPolicy::immediate(2));
        let err = broker.get_price("SBER").await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_rejections_are_not_retried() {
        let paper = Arc::new(PaperBroker::new());
        paper.set_price("SBER", 100.0);
        paper.fail_next("place_order", BrokerError::Rejected("margin".into()), 1);

        let broker = RetryingBroker::new(Arc::clone(&paper), RetryPolicy::immediate(3));
        let req = OrderRequest::entry_limit(Side::Long, "SBER", 1, 99.0);
        assert!(matches!(broker.place_order(&req).await, Err(BrokerError::Rejected(_))));
        assert!(paper.live_orders("SBER").is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_resolves_to_existing_order() {
        let paper = Arc::new(PaperBroker::new());
        paper.set_price("SBER", 100.0);
        let broker = RetryingBroker::new(Arc::clone(&paper), RetryPolicy::immediate(3));

        let req = OrderRequest::entry_limit(Side::Long, "SBER", 1, 99.0).with_key("key-1");
        let first = broker.place_order(&req).await.unwrap();
        let second = broker.place_order(&req).await.unwrap();

        assert_eq!(first.order_id, second.order_id);
        assert_eq!(paper.live_orders("SBER").len(), 1);
    }
}
