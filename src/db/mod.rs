//! SQLite layer for the fill journal

use rusqlite::{Connection, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod fills;

pub use fills::{FillJournal, FillStats, StoredFill};

/// Shared SQLite connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file
    pub fn new<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection; a poisoned lock still hands the connection out
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run migrations to set up or update the schema
    pub fn run_migrations(&self) -> SqlResult<()> {
        let migration_sql = include_str!("migrations/V1__trade_fills.sql");
        self.lock().execute_batch(migration_sql)
    }

    /// Check database health
    pub fn health_check(&self) -> SqlResult<bool> {
        let result: i32 = self.lock().query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(result == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_creation() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.health_check().unwrap());
    }

    #[test]
    fn test_migrations_are_repeatable() {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        db.run_migrations().unwrap();

        let count: i32 = db
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('trade_fills', 'operations')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
