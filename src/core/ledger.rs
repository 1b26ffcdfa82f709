// Per-symbol order ledger and runtime state

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::session::WindowKind;
use super::side::Side;
use super::types::{InstrumentMeta, OrderTag, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SymbolStatus {
    #[default]
    #[serde(rename = "OFF")]
    Off, // no ladder yet, next pass opens one
    #[serde(rename = "ON")]
    On,
}

/// One accepted order the engine is tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub client_key: String,
    pub price: f64,
    pub lots: u64,
    pub role: Role,
    pub tag: OrderTag,
    pub placed_at: DateTime<Utc>,
}

/// An order cancelled ahead of a trading halt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotOrder {
    pub role: Role,
    pub price: f64,
    pub lots: u64,
    pub tag: OrderTag,
    pub order_id: String,
    pub client_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearingSnapshot {
    pub kind: WindowKind,
    pub taken_at: DateTime<Utc>,
    pub restore_at: DateTime<Utc>,
    pub orders: Vec<SnapshotOrder>,
}

/// A filled entry still waiting for its exit order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnprotectedPosition {
    pub entry_price: f64,
    pub lots: u64,
    pub side: Side,
    pub suggested_exit: f64,
    pub deferred_at: DateTime<Utc>,
}

/// Everything the engine knows about one symbol between passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRuntimeState {
    pub symbol: String,
    #[serde(default)]
    pub status: SymbolStatus,
    #[serde(default)]
    pub entries: BTreeMap<String, OrderRecord>,
    #[serde(default)]
    pub exits: BTreeMap<String, OrderRecord>,
    /// Flat list mirroring both maps, in placement order
    #[serde(default)]
    pub orders: Vec<String>,
    #[serde(default)]
    pub live_held_same_side: u64,
    #[serde(default, alias = "positions_no_tp")]
    pub unprotected: BTreeMap<String, UnprotectedPosition>,
    #[serde(default)]
    pub clearing_flags: BTreeMap<WindowKind, NaiveDate>,
    #[serde(default)]
    pub snapshot: Option<ClearingSnapshot>,
    #[serde(default)]
    pub last_fill_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_layer_price: Option<f64>,
    #[serde(default)]
    pub layer_gate_until: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub trading_normal: bool,
    #[serde(default)]
    pub last_status_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resume_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool { true }

impl SymbolRuntimeState {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            status: SymbolStatus::Off,
            entries: BTreeMap::new(),
            exits: BTreeMap::new(),
            orders: Vec::new(),
            live_held_same_side: 0,
            unprotected: BTreeMap::new(),
            clearing_flags: BTreeMap::new(),
            snapshot: None,
            last_fill_at: None,
            last_layer_price: None,
            layer_gate_until: None,
            trading_normal: true,
            last_status_check: None,
            resume_until: None,
            updated_at: None,
        }
    }

    /// Start tracking an accepted order; a known id is left untouched
    pub fn track(&mut self, record: OrderRecord) {
        if self.contains(&record.order_id) {
            return;
        }
        self.orders.push(record.order_id.clone());
        match record.role {
            Role::Entry => self.entries.insert(record.order_id.clone(), record),
            Role::Exit => self.exits.insert(record.order_id.clone(), record),
        };
    }

    /// Drop an order from both maps and the flat list in one step
    pub fn remove(&mut self, order_id: &str) -> Option<OrderRecord> {
        let removed = self
            .entries
            .remove(order_id)
            .or_else(|| self.exits.remove(order_id));
        self.orders.retain(|id| id != order_id);
        removed
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.entries.contains_key(order_id) || self.exits.contains_key(order_id)
    }

    pub fn get(&self, order_id: &str) -> Option<&OrderRecord> {
        self.entries.get(order_id).or_else(|| self.exits.get(order_id))
    }

    /// Entries first, then exits
    pub fn records(&self) -> impl Iterator<Item = &OrderRecord> {
        self.entries.values().chain(self.exits.values())
    }

    pub fn order_count(&self) -> usize {
        self.entries.len() + self.exits.len()
    }

    /// Any tracked order within one tick of `price`
    pub fn level_occupied(&self, meta: &InstrumentMeta, price: f64) -> bool {
        self.records().any(|r| meta.same_level(r.price, price))
    }

    pub fn exit_lots(&self) -> u64 {
        self.exits.values().map(|r| r.lots).sum()
    }

    /// Prices of the independent sell-trigger ladder
    pub fn sell_trigger_levels(&self) -> Vec<f64> {
        self.exits
            .values()
            .filter(|r| r.tag == OrderTag::SellTrigger)
            .map(|r| r.price)
            .collect()
    }

    /// Forget the ladder so the next pass builds a fresh one.
    /// Held lots and the unprotected map survive.
    pub fn reset_for_rebuild(&mut self) {
        self.entries.clear();
        self.exits.clear();
        self.orders.clear();
        self.status = SymbolStatus::Off;
        self.last_layer_price = None;
        self.layer_gate_until = None;
    }

    /// Flat list and maps agree, and no id sits in both maps
    pub fn is_consistent(&self) -> bool {
        let in_both = self.entries.keys().any(|id| self.exits.contains_key(id));
        let list_matches = self.orders.len() == self.order_count()
            && self.orders.iter().all(|id| self.contains(id));
        !in_both && list_matches
    }

    /// Human-readable list of positions left without an exit order
    pub fn unprotected_report(&self, now: DateTime<Utc>) -> String {
        if self.unprotected.is_empty() {
            return format!("{}: stopped, no positions without take-profit", self.symbol);
        }
        let mut lines = vec![format!(
            "{}: stopped with {} position(s) without take-profit:",
            self.symbol,
            self.unprotected.len()
        )];
        for (order_id, pos) in &self.unprotected {
            let age = (now - pos.deferred_at).num_seconds().max(0);
            lines.push(format!(
                "  • {}: entry={}, lots={}, side={}, exit={}, age={}h {}m {}s",
                order_id,
                pos.entry_price,
                pos.lots,
                pos.side,
                pos.suggested_exit,
                age / 3600,
                age % 3600 / 60,
                age % 60
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, price: f64, role: Role) -> OrderRecord {
        OrderRecord {
            order_id: id.to_string(),
            client_key: format!("key-{}", id),
            price,
            lots: 1,
            role,
            tag: OrderTag::Grid,
            placed_at: Utc::now(),
        }
    }

    fn meta() -> InstrumentMeta {
        InstrumentMeta {
            instrument_id: "X".to_string(),
            price_step: 0.01,
            lot_size: 1,
            decimals: 2,
        }
    }

    #[test]
    fn test_track_and_remove_keep_structures_in_sync() {
        let mut state = SymbolRuntimeState::new("SBER");
        state.track(record("1", 99.0, Role::Entry));
        state.track(record("2", 102.0, Role::Exit));
        state.track(record("1", 99.0, Role::Entry));
        assert_eq!(state.orders.len(), 2);
        assert!(state.is_consistent());

        let removed = state.remove("2").unwrap();
        assert_eq!(removed.role, Role::Exit);
        assert!(state.exits.is_empty());
        assert_eq!(state.orders, vec!["1".to_string()]);
        assert!(state.is_consistent());
        assert!(state.remove("2").is_none());
    }

    #[test]
    fn test_level_occupied_within_one_tick() {
        let mut state = SymbolRuntimeState::new("SBER");
        state.track(record("1", 99.0, Role::Entry));
        let m = meta();
        assert!(state.level_occupied(&m, 99.0));
        assert!(state.level_occupied(&m, 99.01));
        assert!(!state.level_occupied(&m, 98.98));
        assert!(!state.level_occupied(&m, 98.0));
    }

    #[test]
    fn test_reset_preserves_position_bookkeeping() {
        let mut state = SymbolRuntimeState::new("SBER");
        state.status = SymbolStatus::On;
        state.live_held_same_side = 3;
        state.track(record("1", 102.0, Role::Exit));
        state.unprotected.insert(
            "9".to_string(),
            UnprotectedPosition {
                entry_price: 100.0,
                lots: 1,
                side: Side::Long,
                suggested_exit: 102.0,
                deferred_at: Utc::now(),
            },
        );

        state.reset_for_rebuild();
        assert_eq!(state.status, SymbolStatus::Off);
        assert_eq!(state.order_count(), 0);
        assert_eq!(state.live_held_same_side, 3);
        assert_eq!(state.unprotected.len(), 1);
    }

    #[test]
    fn test_report_lists_unprotected() {
        let mut state = SymbolRuntimeState::new("SBER");
        let now = Utc::now();
        assert!(state.unprotected_report(now).contains("no positions"));

        state.unprotected.insert(
            "42".to_string(),
            UnprotectedPosition {
                entry_price: 100.0,
                lots: 2,
                side: Side::Long,
                suggested_exit: 102.0,
                deferred_at: now - chrono::Duration::seconds(3725),
            },
        );
        let report = state.unprotected_report(now);
        assert!(report.contains("42"));
        assert!(report.contains("1h 2m 5s"));
    }

    #[test]
    fn test_state_json_accepts_legacy_field() {
        let json = r#"{"symbol":"SBER","status":"ON","positions_no_tp":{}}"#;
        let state: SymbolRuntimeState = serde_json::from_str(json).unwrap();
        assert_eq!(state.status, SymbolStatus::On);
        assert!(state.trading_normal);
    }
}
