// Fill notifications handed to the trade ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::side::Side;
use super::types::{OrderTag, Role};
use crate::error::TradingResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub role: Role,
    pub tag: OrderTag,
    pub lots: u64,
    pub price: f64,
    pub commission: f64,
    pub timestamp: DateTime<Utc>,
}

impl FillEvent {
    /// Commission is charged on notional: price * lots * lot_size * rate
    pub fn commission_for(price: f64, lots: u64, lot_size: u64, rate: f64) -> f64 {
        price * lots as f64 * lot_size as f64 * rate
    }
}

/// Consumer of fill notifications and operator reports
pub trait FillSink: Send + Sync {
    fn record_fill(&self, event: &FillEvent) -> TradingResult<()>;

    /// Free-form operation note, e.g. the stop report for a symbol
    fn record_operation(&self, _symbol: &str, _kind: &str, _message: &str) -> TradingResult<()> {
        Ok(())
    }
}

impl<T: FillSink + ?Sized> FillSink for Arc<T> {
    fn record_fill(&self, event: &FillEvent) -> TradingResult<()> {
        (**self).record_fill(event)
    }

    fn record_operation(&self, symbol: &str, kind: &str, message: &str) -> TradingResult<()> {
        (**self).record_operation(symbol, kind, message)
    }
}

/// Keeps fills in memory; used by dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryFillSink {
    fills: Mutex<Vec<FillEvent>>,
    operations: Mutex<Vec<(String, String, String)>>,
}

impl MemoryFillSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fills(&self) -> Vec<FillEvent> {
        self.fills
            .lock()
            .map(|f| f.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn operations(&self) -> Vec<(String, String, String)> {
        self.operations
            .lock()
            .map(|o| o.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl FillSink for MemoryFillSink {
    fn record_fill(&self, event: &FillEvent) -> TradingResult<()> {
        self.fills
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }

    fn record_operation(&self, symbol: &str, kind: &str, message: &str) -> TradingResult<()> {
        self.operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((symbol.to_string(), kind.to_string(), message.to_string()));
        Ok(())
    }
}
