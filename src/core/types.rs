// Common types shared by the engine, the broker clients and the state store

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order direction as the venue sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of an order inside a strategy ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Entry, // increases strategy-side exposure
    Exit,  // takes profit on an earlier entry
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Entry => "entry",
            Role::Exit => "exit",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker-reported order lifecycle status.
///
/// Venue codes: 1 = filled, 2 = rejected, 3 = canceled, 6 = expired.
/// Every other code means the order is still working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Live,
    Filled,
    Rejected,
    Canceled,
    Expired,
}

impl OrderStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => OrderStatus::Filled,
            2 => OrderStatus::Rejected,
            3 => OrderStatus::Canceled,
            6 => OrderStatus::Expired,
            _ => OrderStatus::Live,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            OrderStatus::Live => 0,
            OrderStatus::Filled => 1,
            OrderStatus::Rejected => 2,
            OrderStatus::Canceled => 3,
            OrderStatus::Expired => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Live)
    }

    /// Terminal without a fill
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected | OrderStatus::Canceled | OrderStatus::Expired
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderStatus::Live => "LIVE",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Expired => "EXPIRED",
        };
        f.write_str(label)
    }
}

/// Order type reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Limit,
    Market,
    StopLoss,
    TakeProfit,
    StopLimit,
    TrailingStop,
}

impl OrderKind {
    /// Protective orders never count as pending exposure
    pub fn is_protective(&self) -> bool {
        matches!(
            self,
            OrderKind::StopLoss | OrderKind::TakeProfit | OrderKind::StopLimit | OrderKind::TrailingStop
        )
    }
}

/// A working order as listed by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub order_id: String,
    pub price: f64,
    pub lots_requested: u64,
    pub lots_executed: u64,
    pub status: OrderStatus,
    pub direction: Direction,
    pub order_type: OrderKind,
}

impl BrokerOrder {
    pub fn remaining_lots(&self) -> u64 {
        self.lots_requested.saturating_sub(self.lots_executed)
    }
}

/// Venue trading status for an instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingStatus {
    Normal,
    Halted(String),
}

impl TradingStatus {
    pub fn is_normal(&self) -> bool {
        matches!(self, TradingStatus::Normal)
    }
}

/// Why an order exists in the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderTag {
    Market,      // base position opened at market
    Grid,        // initial ladder entry
    Layer,       // extra ladder layer added later
    Exit,        // take-profit after an entry fill
    Reopen,      // entry re-placed after an exit fill
    TopUp,       // entry refilling a thinned ladder
    SellTrigger, // independent sell-trigger ladder
    GapReseed,   // ladder rebuilt beyond a post-halt gap
    GapClose,    // exit closed at market after a gap
}

impl OrderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderTag::Market => "market",
            OrderTag::Grid => "grid",
            OrderTag::Layer => "layer",
            OrderTag::Exit => "exit",
            OrderTag::Reopen => "reopen",
            OrderTag::TopUp => "top_up",
            OrderTag::SellTrigger => "sell_trigger",
            OrderTag::GapReseed => "gap_reseed",
            OrderTag::GapClose => "gap_close",
        }
    }
}

/// Static instrument parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    pub instrument_id: String,
    pub price_step: f64,
    pub lot_size: u64,
    pub decimals: u32,
}

impl InstrumentMeta {
    /// Snap a price to the nearest tick and round to the instrument precision
    pub fn quantize(&self, price: f64) -> f64 {
        let ticks = (price / self.price_step).round();
        let factor = 10f64.powi(self.decimals as i32);
        (ticks * self.price_step * factor).round() / factor
    }

    /// True when two prices fall within one tick of each other
    pub fn same_level(&self, a: f64, b: f64) -> bool {
        (self.quantize(a) - self.quantize(b)).abs() <= self.price_step + 1e-9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> InstrumentMeta {
        InstrumentMeta {
            instrument_id: "TEST0001".to_string(),
            price_step: 0.01,
            lot_size: 10,
            decimals: 2,
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(OrderStatus::from_code(1), OrderStatus::Filled);
        assert_eq!(OrderStatus::from_code(2), OrderStatus::Rejected);
        assert_eq!(OrderStatus::from_code(3), OrderStatus::Canceled);
        assert_eq!(OrderStatus::from_code(6), OrderStatus::Expired);
        assert_eq!(OrderStatus::from_code(4), OrderStatus::Live);
        assert_eq!(OrderStatus::from_code(5), OrderStatus::Live);
        assert!(OrderStatus::Expired.is_dead());
        assert!(!OrderStatus::Filled.is_dead());
        assert!(OrderStatus::Filled.is_terminal());
    }

    #[test]
    fn test_quantize() {
        let m = meta();
        assert_eq!(m.quantize(100.004), 100.0);
        assert_eq!(m.quantize(99.996), 100.0);
        assert_eq!(m.quantize(101.017), 101.02);
    }

    #[test]
    fn test_same_level() {
        let m = meta();
        assert!(m.same_level(100.0, 100.01));
        assert!(!m.same_level(100.0, 100.02));
        assert!(!m.same_level(100.0, 99.0));
    }

    #[test]
    fn test_protective_kinds() {
        assert!(OrderKind::StopLoss.is_protective());
        assert!(OrderKind::TrailingStop.is_protective());
        assert!(!OrderKind::Limit.is_protective());
        assert!(!OrderKind::Market.is_protective());
    }

    #[test]
    fn test_remaining_lots() {
        let order = BrokerOrder {
            order_id: "1".to_string(),
            price: 10.0,
            lots_requested: 5,
            lots_executed: 2,
            status: OrderStatus::Live,
            direction: Direction::Buy,
            order_type: OrderKind::Limit,
        };
        assert_eq!(order.remaining_lots(), 3);
    }
}
