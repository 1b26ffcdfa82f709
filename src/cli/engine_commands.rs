// Engine command implementations
use std::sync::Arc;
use tracing::{info, warn};

use grid_executor::clients::{Broker, HttpBroker, RetryPolicy, RetryingBroker};
use grid_executor::core::SymbolStatus;
use grid_executor::{
    BrokerKind, Config, FillJournal, FillSink, GridEngine, JsonStateStore, MemoryFillSink,
    MemoryStateStore, PaperBroker, StateRepository, TradingResult,
};

type SharedEngine = GridEngine<RetryingBroker<Arc<dyn Broker>>, Arc<dyn StateRepository>, Arc<dyn FillSink>>;

fn build_broker(config: &Config, dry_run: bool) -> TradingResult<RetryingBroker<Arc<dyn Broker>>> {
    let inner: Arc<dyn Broker> = match (config.broker.kind, dry_run) {
        (BrokerKind::Http, false) => Arc::new(HttpBroker::from_config(&config.broker)?),
        _ => Arc::new(PaperBroker::from_config(&config.broker)),
    };
    Ok(RetryingBroker::new(inner, RetryPolicy::from_config(&config.broker)))
}

fn build_engine(config: Config, config_path: &str, dry_run: bool) -> TradingResult<SharedEngine> {
    let broker = build_broker(&config, dry_run)?;
    let (store, fills): (Arc<dyn StateRepository>, Arc<dyn FillSink>) = if dry_run {
        (Arc::new(MemoryStateStore::new()), Arc::new(MemoryFillSink::new()))
    } else {
        (
            Arc::new(JsonStateStore::new(&config.engine.state_dir)?),
            Arc::new(FillJournal::open(&config.engine.db_path)?),
        )
    };
    Ok(GridEngine::new(config, broker, store, fills).with_config_path(config_path))
}

pub async fn run_engine(config: Config, config_path: &str, once: bool, dry_run: bool) -> TradingResult<()> {
    if dry_run {
        info!("🧪 DRY RUN mode (paper broker, nothing persisted)");
    } else if config.broker.kind == BrokerKind::Http {
        info!("🚀 LIVE mode via {}", config.broker.base_url);
        warn!("⚠️  Real orders will be placed!");
    } else {
        info!("📝 Paper broker, state in {}", config.engine.state_dir);
    }

    let mut engine = build_engine(config, config_path, dry_run)?;

    if once {
        let report = engine.sweep().await;
        info!(
            processed = report.processed,
            failed = report.failed,
            stopped = report.stopped,
            "✅ Sweep complete"
        );
        return Ok(());
    }

    engine.shutdown_signal().listen_for_ctrl_c();
    engine.run().await
}

pub fn show_status(config: &Config, symbol: Option<&str>) -> TradingResult<()> {
    let store = JsonStateStore::new(&config.engine.state_dir)?;
    let states = store.load_all()?;
    let journal = if std::path::Path::new(&config.engine.db_path).exists() {
        Some(FillJournal::open(&config.engine.db_path)?)
    } else {
        None
    };

    info!("📊 Symbol Status");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut shown = 0;
    for (name, state) in &states {
        if symbol.is_some_and(|s| s != name) {
            continue;
        }
        shown += 1;
        let status = match state.status {
            SymbolStatus::On => "ON",
            SymbolStatus::Off => "OFF",
        };
        let configured = config.symbols.get(name).map_or("not configured", |s| {
            if s.enabled { "enabled" } else { "disabled" }
        });
        info!("{} [{}] ({})", name, status, configured);
        info!(
            "   Entries: {}  Exits: {}  Held: {}",
            state.entries.len(),
            state.exits.len(),
            state.live_held_same_side
        );
        if !state.unprotected.is_empty() {
            warn!("   ⚠️  Unprotected positions: {}", state.unprotected.len());
        }
        if let Some(snapshot) = &state.snapshot {
            info!(
                "   ⏸️  {} snapshot with {} orders, restore at {}",
                snapshot.kind,
                snapshot.orders.len(),
                snapshot.restore_at
            );
        }
        if let Some(updated) = state.updated_at {
            info!("   Updated: {}", updated);
        }
        if let Some(journal) = &journal {
            let stats = journal.stats_for_symbol(name)?;
            info!(
                "   Fills: {} (entry lots {}, exit lots {}, commission {:.2})",
                stats.fills, stats.entry_lots, stats.exit_lots, stats.total_commission
            );
            if let Some(last) = journal.fills_for_symbol(name)?.last() {
                info!(
                    "   Last fill: {} {} {} x{} @ {} ({})",
                    last.role, last.tag, last.order_id, last.lots, last.price, last.filled_at
                );
            }
        }
    }

    if shown == 0 {
        info!("  No runtime state found in {}", config.engine.state_dir);
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    Ok(())
}

pub fn check_config(config: &Config) {
    info!("✅ Configuration is valid");
    info!("   Broker: {:?}", config.broker.kind);
    info!("   Session offset: UTC{:+}", config.session.utc_offset_hours);
    for (name, strategy) in &config.symbols {
        info!(
            "   {} {} size={} step={} levels={} tp={} limit={} {}",
            name,
            strategy.side,
            strategy.size,
            strategy.step_orders,
            strategy.grid_level_count,
            strategy.take_profit,
            strategy
                .portfolio_limit
                .map_or_else(|| "none".to_string(), |l| l.to_string()),
            if strategy.enabled { "ON" } else { "OFF" }
        );
    }
}
