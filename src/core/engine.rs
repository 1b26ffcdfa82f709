//! Reconciliation loop.
//!
//! One pass per enabled symbol per sweep, strictly sequential. Each pass runs
//! the same fixed phases: session boundary, trading status, portfolio limit,
//! sell trigger, then the OFF/ON dispatch. Broker failures inside a phase are
//! logged and left for the next pass; only storage and configuration problems
//! escape a symbol, and even those never stop the other symbols.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::context::SymbolContext;
use super::fills::{FillEvent, FillSink};
use super::grid_builder;
use super::ledger::{OrderRecord, SymbolRuntimeState, SymbolStatus, UnprotectedPosition};
use super::portfolio::{self, PortfolioView};
use super::sell_trigger;
use super::session::{self, SessionSchedule};
use super::shutdown::ShutdownSignal;
use super::types::{OrderStatus, Role};
use crate::clients::broker::{Broker, OrderState};
use crate::config::{Config, StrategyConfig};
use crate::error::{TradingError, TradingResult};
use crate::store::StateRepository;

/// What one sweep over the configured symbols did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub failed: usize,
    pub stopped: usize,
    pub interrupted: bool,
}

pub struct GridEngine<B, R, F> {
    broker: B,
    store: R,
    fills: F,
    config: Config,
    schedule: SessionSchedule,
    config_path: Option<PathBuf>,
    shutdown: ShutdownSignal,
}

impl<B: Broker, R: StateRepository, F: FillSink> GridEngine<B, R, F> {
    pub fn new(config: Config, broker: B, store: R, fills: F) -> Self {
        let schedule = SessionSchedule::from_config(&config.session);
        Self {
            broker,
            store,
            fills,
            config,
            schedule,
            config_path: None,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Re-read this file before every sweep
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn fills(&self) -> &F {
        &self.fills
    }

    /// Swap in the configuration on disk; a bad file keeps the current one
    pub fn reload_config(&mut self) -> bool {
        let Some(path) = self.config_path.as_ref() else {
            return false;
        };
        match Config::from_file(path) {
            Ok(config) => {
                self.schedule = SessionSchedule::from_config(&config.session);
                self.config = config;
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "⚠️  Config reload failed, keeping previous configuration");
                false
            }
        }
    }

    /// Sweep until shutdown is requested
    pub async fn run(&mut self) -> TradingResult<()> {
        info!(
            broker = self.broker.name(),
            symbols = self.config.enabled_symbols().count(),
            "🚀 Grid executor started - press Ctrl+C to stop"
        );
        while !self.shutdown.is_shutting_down() {
            self.reload_config();
            let report = self.sweep().await;
            debug!(?report, "sweep finished");
            sleep(self.config.engine.idle_sweep_delay()).await;
        }
        info!("👋 Grid executor stopped");
        Ok(())
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// One pass over every configured symbol with a fixed clock reading
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for (symbol, strategy) in &self.config.symbols {
            if self.shutdown.is_shutting_down() {
                report.interrupted = true;
                break;
            }

            if !strategy.enabled {
                match self.stop_symbol(symbol, now) {
                    Ok(true) => report.stopped += 1,
                    Ok(false) => {}
                    Err(e) => error!(symbol = %symbol, error = %e, "❌ Failed to stop symbol"),
                }
                continue;
            }

            match self.process_symbol(symbol, strategy, now).await {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        symbol = %symbol,
                        kind = ?e.kind(),
                        category = e.category(),
                        error = %e,
                        "❌ Symbol pass failed"
                    );
                    sleep(self.config.engine.error_cooldown()).await;
                }
            }
            sleep(self.config.engine.symbol_delay()).await;
        }
        report
    }

    /// Report positions left without exits, then forget the symbol.
    /// Resting orders are left alone.
    fn stop_symbol(&self, symbol: &str, now: DateTime<Utc>) -> TradingResult<bool> {
        let Some(state) = self.store.load(symbol)? else {
            return Ok(false);
        };
        let report = state.unprotected_report(now);
        if state.unprotected.is_empty() {
            info!(symbol, "⏹️  {}", report);
        } else {
            warn!(symbol, "⏹️  {}", report);
        }
        if let Err(e) = self.fills.record_operation(symbol, "stop_report", &report) {
            warn!(symbol, error = %e, "⚠️  Stop report not journaled");
        }
        self.store.delete(symbol)?;
        Ok(true)
    }

    /// One full pass for one symbol; the state is saved whatever happens
    pub async fn process_symbol(
        &self,
        symbol: &str,
        strategy: &StrategyConfig,
        now: DateTime<Utc>,
    ) -> TradingResult<()> {
        let meta = self
            .config
            .instrument(&strategy.ticker)
            .ok_or_else(|| TradingError::MissingInstrument(strategy.ticker.clone()))?;
        let mut state = self
            .store
            .load(symbol)?
            .unwrap_or_else(|| SymbolRuntimeState::new(symbol));

        let ctx = SymbolContext {
            symbol,
            broker: &self.broker,
            strategy,
            meta,
            engine: &self.config.engine,
            store: &self.store,
            now,
        };

        let result = self.run_phases(&ctx, &mut state).await;
        self.persist(&mut state, now)?;
        result
    }

    async fn run_phases(
        &self,
        ctx: &SymbolContext<'_, B>,
        state: &mut SymbolRuntimeState,
    ) -> TradingResult<()> {
        // 1. Session boundary
        if let Some(kind) = self.schedule.pre_halt_window(ctx.now, &state.clearing_flags) {
            session::take_snapshot(ctx, state, &self.schedule, kind).await?;
            return Ok(());
        }
        if state.snapshot.is_some() {
            let outcome = session::restore_snapshot(ctx, state).await?;
            debug!(symbol = ctx.symbol, ?outcome, "snapshot restore attempt");
            if outcome.is_restored() {
                self.persist(state, ctx.now)?;
                let cut = portfolio::cut_to_limit(ctx, state).await.map(|_| ());
                self.tolerate(ctx, "cut_to_limit", cut)?;
            }
            return Ok(());
        }

        // 2. Trading status
        if !self.trading_allowed(ctx, state).await {
            return Ok(());
        }

        // 3. Portfolio ceiling
        let cut = portfolio::cut_to_limit(ctx, state).await.map(|_| ());
        self.tolerate(ctx, "cut_to_limit", cut)?;
        self.persist(state, ctx.now)?;

        // 4. Sell trigger
        let sell = sell_trigger::evaluate(ctx, state).await.map(|_| ());
        self.tolerate(ctx, "sell_trigger", sell)?;

        // 5. Dispatch
        let dispatch = match state.status {
            SymbolStatus::Off => grid_builder::open_grid(ctx, state).await.map(|_| ()),
            SymbolStatus::On => self.reconcile_on(ctx, state).await,
        };
        self.tolerate(ctx, "dispatch", dispatch)
    }

    /// Broker-side trouble skips the step; anything else escapes the symbol
    fn tolerate(
        &self,
        ctx: &SymbolContext<'_, B>,
        step: &str,
        result: TradingResult<()>,
    ) -> TradingResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() => {
                warn!(symbol = ctx.symbol, step, kind = ?e.kind(), error = %e, "⚠️  Step skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Throttled venue status check with a short cooldown after a resume
    async fn trading_allowed(&self, ctx: &SymbolContext<'_, B>, state: &mut SymbolRuntimeState) -> bool {
        let interval = ChronoDuration::seconds(self.config.engine.status_check_interval_secs as i64);
        let due = !state.trading_normal
            || state
                .last_status_check
                .map_or(true, |checked| ctx.now - checked >= interval);

        if due {
            match ctx.broker.get_trading_status(ctx.ticker()).await {
                Ok(status) if status.is_normal() => {
                    if !state.trading_normal {
                        state.trading_normal = true;
                        state.resume_until = Some(
                            ctx.now + ChronoDuration::seconds(self.config.engine.resume_cooldown_secs as i64),
                        );
                        info!(symbol = ctx.symbol, "▶️  Trading resumed");
                    }
                }
                Ok(status) => {
                    if state.trading_normal {
                        warn!(symbol = ctx.symbol, ?status, "⏸️  Trading halted, placements paused");
                    }
                    state.trading_normal = false;
                }
                Err(e) => warn!(symbol = ctx.symbol, error = %e, "⚠️  Trading status unavailable"),
            }
            state.last_status_check = Some(ctx.now);
        }

        if !state.trading_normal {
            return false;
        }
        match state.resume_until {
            Some(until) if ctx.now < until => {
                debug!(symbol = ctx.symbol, until = %until, "resume cooldown");
                false
            }
            Some(_) => {
                state.resume_until = None;
                true
            }
            None => true,
        }
    }

    async fn order_state(&self, ctx: &SymbolContext<'_, B>, order_id: &str) -> Option<OrderState> {
        match ctx.broker.get_order_state(order_id).await {
            Ok(order_state) => Some(order_state),
            Err(e) => {
                warn!(symbol = ctx.symbol, order_id, error = %e, "⚠️  Order state unavailable");
                None
            }
        }
    }

    /// ON branch: collect terminal orders, protect fills, REOPEN after exits,
    /// then regrid, or top up the ladder and maybe add a layer.
    async fn reconcile_on(
        &self,
        ctx: &SymbolContext<'_, B>,
        state: &mut SymbolRuntimeState,
    ) -> TradingResult<()> {
        let side = ctx.side();
        // Everything the pass depends on is read before the ledger changes
        let market = ctx.market_price().await?;
        let live = ctx
            .broker
            .get_orders(ctx.ticker())
            .await
            .map_err(|e| TradingError::data_unavailable(ctx.symbol, e))?;
        let view = PortfolioView {
            held: portfolio::held(ctx).await?,
            pending_open: portfolio::pending_open(&live, side),
            ceiling: ctx.strategy.portfolio_limit,
        };
        let live_ids: HashSet<&str> = live
            .iter()
            .filter(|o| !o.status.is_terminal())
            .map(|o| o.order_id.as_str())
            .collect();
        let gone: Vec<String> = state
            .orders
            .iter()
            .filter(|id| !live_ids.contains(id.as_str()))
            .cloned()
            .collect();

        if !state.unprotected.is_empty() {
            grid_builder::retry_unprotected(ctx, state, market).await;
        }

        // Each terminal order is booked and checkpointed on its own. A filled
        // entry stays parked as unprotected until its exit is recorded.
        let mut filled_entries = Vec::new();
        let mut filled_exits = Vec::new();
        for order_id in gone {
            let Some(order_state) = self.order_state(ctx, &order_id).await else {
                continue;
            };
            match order_state.status {
                OrderStatus::Filled => {
                    let Some(record) = state.remove(&order_id) else {
                        continue;
                    };
                    match record.role {
                        Role::Entry => {
                            state.live_held_same_side += record.lots;
                            state.unprotected.insert(
                                record.order_id.clone(),
                                UnprotectedPosition {
                                    entry_price: order_state.executed_price.unwrap_or(record.price),
                                    lots: record.lots,
                                    side,
                                    suggested_exit: ctx.q(side.exit_price(market, ctx.strategy.take_profit)),
                                    deferred_at: ctx.now,
                                },
                            );
                        }
                        Role::Exit => {
                            state.live_held_same_side = state.live_held_same_side.saturating_sub(record.lots);
                        }
                    }
                    state.last_fill_at = Some(ctx.now);
                    self.emit_fill(ctx, &record, order_state.executed_price);
                    ctx.checkpoint(state);
                    match record.role {
                        Role::Entry => filled_entries.push(record),
                        Role::Exit => filled_exits.push(record),
                    }
                }
                status if status.is_dead() => {
                    if let Some(record) = state.remove(&order_id) {
                        ctx.checkpoint(state);
                        info!(
                            symbol = ctx.symbol,
                            order_id = %order_id,
                            role = %record.role,
                            %status,
                            "Order ended without a fill"
                        );
                    }
                }
                _ => {}
            }
        }

        if !filled_entries.is_empty() {
            grid_builder::place_exit_batch(ctx, state, &filled_entries, market).await;
        }
        if !filled_exits.is_empty() {
            let mut budget = view.available();
            for exit in &filled_exits {
                grid_builder::place_reopen(ctx, state, exit, &mut budget).await;
            }
        }
        self.persist(state, ctx.now)?;

        if state.entries.is_empty() {
            if let Some(last_fill) = state.last_fill_at {
                let settle = ChronoDuration::seconds(self.config.engine.fill_settle_secs as i64);
                if ctx.now - last_fill < settle {
                    debug!(symbol = ctx.symbol, "recent fill, regrid postponed");
                    return Ok(());
                }
            }
            self.regrid(ctx, state, market).await?;
            return Ok(());
        }

        grid_builder::top_up_entries(ctx, state).await?;
        if state.exits.is_empty() {
            let moved = state
                .last_layer_price
                .map_or(true, |p| (market - p).abs() + 1e-9 >= ctx.strategy.step_orders);
            let gate_open = state.layer_gate_until.map_or(true, |until| ctx.now >= until);
            if moved && gate_open {
                grid_builder::add_layer(ctx, state, market).await?;
            }
        }
        Ok(())
    }

    /// Cancel the whole ladder so the next pass opens a fresh one.
    ///
    /// Cancelled exits become unprotected positions and get new exits when
    /// the grid reopens; each is parked before its cancel so the checkpoint
    /// after the acknowledgement carries both. Any failed cancel aborts the
    /// regrid.
    async fn regrid(
        &self,
        ctx: &SymbolContext<'_, B>,
        state: &mut SymbolRuntimeState,
        market: f64,
    ) -> TradingResult<bool> {
        if !state.exits.is_empty() {
            let view = portfolio::view(ctx).await?;
            if view.headroom() == Some(0) {
                debug!(symbol = ctx.symbol, held = view.held, "no headroom, exits kept in place");
                return Ok(false);
            }
        }

        let side = ctx.side();
        let take_profit = ctx.strategy.take_profit;
        let records: Vec<OrderRecord> = state.records().cloned().collect();
        let mut cancelled = 0;
        let mut failed = 0;
        for record in records {
            let parked = record.role == Role::Exit;
            if parked {
                state.unprotected.insert(
                    record.order_id.clone(),
                    UnprotectedPosition {
                        entry_price: ctx.q(side.entry_from_exit(record.price, take_profit)),
                        lots: record.lots,
                        side,
                        suggested_exit: ctx.q(side.exit_price(market, take_profit)),
                        deferred_at: ctx.now,
                    },
                );
            }
            if ctx.cancel(state, &record.order_id).await {
                cancelled += 1;
            } else {
                if parked {
                    state.unprotected.remove(&record.order_id);
                }
                failed += 1;
            }
        }
        if cancelled > 0 {
            sleep(ctx.engine.post_cancel_delay()).await;
        }
        if failed > 0 {
            warn!(symbol = ctx.symbol, failed, "⚠️  Regrid aborted, cancels will be retried");
            return Ok(false);
        }

        state.reset_for_rebuild();
        info!(
            symbol = ctx.symbol,
            cancelled,
            unprotected = state.unprotected.len(),
            held = state.live_held_same_side,
            "🔄 Ladder reset, rebuilding on the next pass"
        );
        Ok(true)
    }

    fn emit_fill(&self, ctx: &SymbolContext<'_, B>, record: &OrderRecord, executed_price: Option<f64>) {
        let price = executed_price.unwrap_or(record.price);
        let event = FillEvent {
            order_id: record.order_id.clone(),
            symbol: ctx.symbol.to_string(),
            side: ctx.side(),
            role: record.role,
            tag: record.tag,
            lots: record.lots,
            price,
            commission: FillEvent::commission_for(
                price,
                record.lots,
                ctx.meta.lot_size,
                self.config.engine.commission_rate,
            ),
            timestamp: ctx.now,
        };
        info!(
            symbol = ctx.symbol,
            order_id = %event.order_id,
            role = %event.role,
            tag = event.tag.as_str(),
            price,
            lots = event.lots,
            "💰 Fill"
        );
        if let Err(e) = self.fills.record_fill(&event) {
            warn!(symbol = ctx.symbol, order_id = %event.order_id, error = %e, "⚠️  Fill not journaled");
        }
    }

    fn persist(&self, state: &mut SymbolRuntimeState, now: DateTime<Utc>) -> TradingResult<()> {
        if !state.is_consistent() {
            error!(symbol = %state.symbol, "❌ Ledger maps and order list disagree");
        }
        state.updated_at = Some(now);
        self.store.save(state)
    }
}
