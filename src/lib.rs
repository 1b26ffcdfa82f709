// Grid Executor Library
//
// Multi-symbol grid trading execution engine driven against a broker interface

pub mod core;
pub mod clients;
pub mod config;
pub mod db;          // SQLite fill journal
pub mod error;       // Unified error handling
pub mod simulation;  // Paper broker
pub mod store;       // Per-symbol runtime state persistence

// Re-export core engine types
pub use core::{
    GridEngine, Side, SweepReport, SymbolRuntimeState, SymbolStatus, ShutdownSignal,
    FillEvent, FillSink, MemoryFillSink, SessionSchedule, WindowKind,
};

// Re-export error types
pub use error::{ErrorKind, TradingError, TradingResult};

// Re-export client types
pub use clients::{Broker, BrokerError, HttpBroker, RetryPolicy, RetryingBroker};

// Re-export configuration
pub use config::{BrokerConfig, BrokerKind, Config, ConfigError, EngineConfig, LoggingConfig, StrategyConfig};

// Re-export persistence
pub use db::{Database, FillJournal};
pub use store::{JsonStateStore, MemoryStateStore, StateRepository};

pub use simulation::PaperBroker;
