// Broker clients

pub mod broker;
pub mod retry;
pub mod http_broker;

// Re-export client types
pub use broker::{Broker, BrokerError, BrokerResult, OrderPrice, OrderRequest, OrderState, PlacedOrder};
pub use retry::{RetryPolicy, RetryingBroker};
pub use http_broker::HttpBroker;
