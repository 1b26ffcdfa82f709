// Core execution logic: per-symbol state, grid placement and the sweep loop

pub mod types;
pub mod side;
pub mod ledger;
pub mod fills;
pub mod session;
pub mod context;
pub mod price_guard;
pub mod portfolio;
pub mod grid_builder;
pub mod sell_trigger;
pub mod shutdown;
pub mod engine;

// Re-export commonly used types
pub use types::{BrokerOrder, Direction, InstrumentMeta, OrderKind, OrderStatus, OrderTag, Role, TradingStatus};
pub use side::Side;
pub use ledger::{ClearingSnapshot, OrderRecord, SnapshotOrder, SymbolRuntimeState, SymbolStatus, UnprotectedPosition};
pub use fills::{FillEvent, FillSink, MemoryFillSink};
pub use session::{RestoreOutcome, SessionSchedule, WindowKind};
pub use context::SymbolContext;
pub use portfolio::{CutOutcome, PortfolioView};
pub use shutdown::ShutdownSignal;
pub use engine::{GridEngine, SweepReport};
