//! Fill journal: every fill the engine observes, plus operator notes

use chrono::{DateTime, Utc};
use rusqlite::{params, Result as SqlResult, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::Database;
use crate::core::fills::{FillEvent, FillSink};
use crate::error::TradingResult;

/// A fill as stored in `trade_fills`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFill {
    pub id: i64,
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub role: String,
    pub tag: String,
    pub lots: i64,
    pub price: f64,
    pub commission: f64,
    pub filled_at: String,
}

impl StoredFill {
    fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(StoredFill {
            id: row.get(0)?,
            order_id: row.get(1)?,
            symbol: row.get(2)?,
            side: row.get(3)?,
            role: row.get(4)?,
            tag: row.get(5)?,
            lots: row.get(6)?,
            price: row.get(7)?,
            commission: row.get(8)?,
            filled_at: row.get(9)?,
        })
    }

    pub fn filled_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.filled_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillStats {
    pub fills: i64,
    pub entry_lots: i64,
    pub exit_lots: i64,
    pub total_commission: f64,
}

/// SQLite-backed [`FillSink`]
#[derive(Clone)]
pub struct FillJournal {
    db: Database,
}

impl FillJournal {
    pub fn open<P: AsRef<Path>>(path: P) -> TradingResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_database(Database::new(path)?)
    }

    pub fn in_memory() -> TradingResult<Self> {
        Self::with_database(Database::new_in_memory()?)
    }

    pub fn with_database(db: Database) -> TradingResult<Self> {
        db.run_migrations()?;
        Ok(Self { db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Fills for one symbol, oldest first
    pub fn fills_for_symbol(&self, symbol: &str) -> TradingResult<Vec<StoredFill>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, order_id, symbol, side, role, tag, lots, price, commission, filled_at
             FROM trade_fills WHERE symbol = ?1 ORDER BY filled_at, id",
        )?;
        let fills = stmt
            .query_map(params![symbol], |row| StoredFill::from_row(row))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(fills)
    }

    pub fn count_fills(&self) -> TradingResult<i64> {
        let count = self
            .db
            .lock()
            .query_row("SELECT COUNT(*) FROM trade_fills", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn stats_for_symbol(&self, symbol: &str) -> TradingResult<FillStats> {
        let stats = self.db.lock().query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN role = 'entry' THEN lots ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN role = 'exit' THEN lots ELSE 0 END), 0),
                COALESCE(SUM(commission), 0.0)
             FROM trade_fills WHERE symbol = ?1",
            params![symbol],
            |row| {
                Ok(FillStats {
                    fills: row.get(0)?,
                    entry_lots: row.get(1)?,
                    exit_lots: row.get(2)?,
                    total_commission: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Operator notes for one symbol as `(kind, message)`, oldest first
    pub fn operations_for_symbol(&self, symbol: &str) -> TradingResult<Vec<(String, String)>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT kind, message FROM operations WHERE symbol = ?1 ORDER BY id",
        )?;
        let operations = stmt
            .query_map(params![symbol], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(operations)
    }
}

impl FillSink for FillJournal {
    /// Recording the same order twice keeps the first row
    fn record_fill(&self, event: &FillEvent) -> TradingResult<()> {
        let inserted = self.db.lock().execute(
            "INSERT OR IGNORE INTO trade_fills (
                order_id, symbol, side, role, tag, lots, price, commission, filled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.order_id,
                event.symbol,
                event.side.as_str(),
                event.role.as_str(),
                event.tag.as_str(),
                event.lots as i64,
                event.price,
                event.commission,
                event.timestamp.to_rfc3339(),
            ],
        )?;
        debug!(order_id = %event.order_id, inserted, "fill journaled");
        Ok(())
    }

    fn record_operation(&self, symbol: &str, kind: &str, message: &str) -> TradingResult<()> {
        self.db.lock().execute(
            "INSERT INTO operations (symbol, kind, message) VALUES (?1, ?2, ?3)",
            params![symbol, kind, message],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::side::Side;
    use crate::core::types::{OrderTag, Role};

    fn event(order_id: &str, role: Role, lots: u64, price: f64) -> FillEvent {
        FillEvent {
            order_id: order_id.to_string(),
            symbol: "SBER".to_string(),
            side: Side::Long,
            role,
            tag: OrderTag::Grid,
            lots,
            price,
            commission: FillEvent::commission_for(price, lots, 10, 0.00035),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_query_fills() {
        let journal = FillJournal::in_memory().unwrap();
        journal.record_fill(&event("1", Role::Entry, 2, 100.0)).unwrap();
        journal.record_fill(&event("2", Role::Exit, 1, 102.0)).unwrap();
        journal.record_fill(&event("1", Role::Entry, 2, 100.0)).unwrap();

        assert_eq!(journal.count_fills().unwrap(), 2);
        let fills = journal.fills_for_symbol("SBER").unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].role, "entry");
        assert!(fills[0].filled_at().is_some());

        let stats = journal.stats_for_symbol("SBER").unwrap();
        assert_eq!(stats.entry_lots, 2);
        assert_eq!(stats.exit_lots, 1);
        assert!(stats.total_commission > 0.0);
    }

    #[test]
    fn test_operations_journal() {
        let journal = FillJournal::in_memory().unwrap();
        journal.record_operation("SBER", "stop_report", "no positions").unwrap();
        let ops = journal.operations_for_symbol("SBER").unwrap();
        assert_eq!(ops, vec![("stop_report".to_string(), "no positions".to_string())]);
        assert!(journal.operations_for_symbol("GAZP").unwrap().is_empty());
    }
}
