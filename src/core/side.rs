// Strategy side: every side-dependent price rule lives here

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "LONG", alias = "Long")]
    Long,
    #[serde(alias = "SHORT", alias = "Short")]
    Short,
}

impl Side {
    pub fn entry_direction(self) -> Direction {
        match self {
            Side::Long => Direction::Buy,
            Side::Short => Direction::Sell,
        }
    }

    pub fn exit_direction(self) -> Direction {
        match self {
            Side::Long => Direction::Sell,
            Side::Short => Direction::Buy,
        }
    }

    /// One grid step deeper into the entry side of the book
    pub fn next_level_away_from_market(self, price: f64, step: f64) -> f64 {
        match self {
            Side::Long => price - step,
            Side::Short => price + step,
        }
    }

    pub fn next_level_toward_market(self, price: f64, step: f64) -> f64 {
        match self {
            Side::Long => price + step,
            Side::Short => price - step,
        }
    }

    /// One step further out on the exit side of the book
    pub fn next_exit_level(self, price: f64, step: f64) -> f64 {
        self.next_level_toward_market(price, step)
    }

    /// Take-profit price for an entry at `entry_price`
    pub fn exit_price(self, entry_price: f64, take_profit: f64) -> f64 {
        match self {
            Side::Long => entry_price + take_profit,
            Side::Short => entry_price - take_profit,
        }
    }

    /// REOPEN price after an exit filled at `exit_price`
    pub fn entry_from_exit(self, exit_price: f64, take_profit: f64) -> f64 {
        match self {
            Side::Long => exit_price - take_profit,
            Side::Short => exit_price + take_profit,
        }
    }

    /// An exit resting at `exit_price` would already have traded at `market`
    pub fn exit_crossed(self, exit_price: f64, market: f64) -> bool {
        match self {
            Side::Long => market >= exit_price,
            Side::Short => market <= exit_price,
        }
    }

    /// An entry at `entry_price` would execute immediately at `market`
    pub fn entry_marketable(self, entry_price: f64, market: f64) -> bool {
        match self {
            Side::Long => market <= entry_price,
            Side::Short => market >= entry_price,
        }
    }

    /// Broker positions are signed; the strategy only cares about its own side
    pub fn held_from_signed(self, signed_lots: i64) -> u64 {
        match self {
            Side::Long => signed_lots.max(0) as u64,
            Side::Short => signed_lots.checked_neg().map_or(i64::MAX, |n| n.max(0)) as u64,
        }
    }

    /// Orders entries so the one farthest from market comes first
    pub fn farthest_first(self, a: f64, b: f64) -> Ordering {
        match self {
            Side::Long => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            Side::Short => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_pricing() {
        let side = Side::Long;
        assert_eq!(side.next_level_away_from_market(100.0, 1.0), 99.0);
        assert_eq!(side.next_level_toward_market(99.0, 1.0), 100.0);
        assert_eq!(side.exit_price(100.0, 2.0), 102.0);
        assert_eq!(side.entry_from_exit(102.0, 2.0), 100.0);
        assert!(side.exit_crossed(102.0, 103.0));
        assert!(!side.exit_crossed(102.0, 101.0));
        assert!(side.entry_marketable(99.0, 98.5));
        assert!(!side.entry_marketable(99.0, 100.0));
    }

    #[test]
    fn test_short_pricing() {
        let side = Side::Short;
        assert_eq!(side.next_level_away_from_market(100.0, 1.0), 101.0);
        assert_eq!(side.exit_price(100.0, 2.0), 98.0);
        assert_eq!(side.entry_from_exit(98.0, 2.0), 100.0);
        assert!(side.exit_crossed(98.0, 97.5));
        assert!(side.entry_marketable(101.0, 101.5));
        assert_eq!(side.entry_direction(), Direction::Sell);
        assert_eq!(side.exit_direction(), Direction::Buy);
    }

    #[test]
    fn test_held_from_signed() {
        assert_eq!(Side::Long.held_from_signed(5), 5);
        assert_eq!(Side::Long.held_from_signed(-5), 0);
        assert_eq!(Side::Short.held_from_signed(-3), 3);
        assert_eq!(Side::Short.held_from_signed(2), 0);
        assert_eq!(Side::Short.held_from_signed(i64::MIN), i64::MAX as u64);
        assert_eq!(Side::Long.held_from_signed(i64::MIN), 0);
    }

    #[test]
    fn test_farthest_first() {
        let mut long = vec![99.0, 97.0, 98.0];
        long.sort_by(|a, b| Side::Long.farthest_first(*a, *b));
        assert_eq!(long, vec![97.0, 98.0, 99.0]);

        let mut short = vec![101.0, 103.0, 102.0];
        short.sort_by(|a, b| Side::Short.farthest_first(*a, *b));
        assert_eq!(short, vec![103.0, 102.0, 101.0]);
    }

    #[test]
    fn test_side_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            side: Side,
        }
        let w: Wrapper = toml::from_str("side = \"LONG\"").unwrap();
        assert_eq!(w.side, Side::Long);
        let w: Wrapper = toml::from_str("side = \"short\"").unwrap();
        assert_eq!(w.side, Side::Short);
    }
}
