//! Session-boundary manager.
//!
//! The venue halts trading three times a day. Shortly before each halt the
//! ladder is cancelled and remembered in a [`ClearingSnapshot`]; once trading
//! resumes the snapshot is replayed against the new market price, closing
//! exits the gap ran through and rebuilding entries the gap made marketable.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context::SymbolContext;
use super::grid_builder;
use super::ledger::{ClearingSnapshot, OrderRecord, SnapshotOrder, SymbolRuntimeState};
use super::portfolio;
use super::types::{OrderTag, Role};
use crate::clients::broker::{Broker, OrderRequest};
use crate::config::{SessionConfig, SessionWindowConfig};
use crate::error::TradingResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Midday,
    Evening,
    Overnight,
}

impl WindowKind {
    pub const ALL: [WindowKind; 3] = [WindowKind::Midday, WindowKind::Evening, WindowKind::Overnight];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Midday => "midday",
            WindowKind::Evening => "evening",
            WindowKind::Overnight => "overnight",
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daily halt windows resolved against the venue's UTC offset
#[derive(Debug, Clone)]
pub struct SessionSchedule {
    offset: FixedOffset,
    windows: [(WindowKind, SessionWindowConfig); 3],
}

impl SessionSchedule {
    pub fn from_config(config: &SessionConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        Self {
            offset,
            windows: [
                (WindowKind::Midday, config.midday),
                (WindowKind::Evening, config.evening),
                (WindowKind::Overnight, config.overnight),
            ],
        }
    }

    fn window(&self, kind: WindowKind) -> &SessionWindowConfig {
        // The array is built in `ALL` order
        &self.windows[kind as usize].1
    }

    /// Calendar date at the venue
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// The pre-halt window `now` falls in, unless it was already handled today
    pub fn pre_halt_window(
        &self,
        now: DateTime<Utc>,
        flags: &BTreeMap<WindowKind, NaiveDate>,
    ) -> Option<WindowKind> {
        let local = now.with_timezone(&self.offset);
        let today = local.date_naive();
        let time = local.time();
        self.windows
            .iter()
            .find(|(kind, window)| {
                time >= window.snapshot_from
                    && time < window.snapshot_until
                    && flags.get(kind) != Some(&today)
            })
            .map(|(kind, _)| *kind)
    }

    /// When trading resumes after the `kind` halt that starts around `now`
    pub fn restore_time(&self, kind: WindowKind, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = self.window(kind);
        let mut date = self.local_date(now);
        if window.restore_at < window.snapshot_from {
            date = date.succ_opt().unwrap_or(date);
        }
        let local = date.and_time(window.restore_at);
        Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(self.offset.local_minus_utc()))))
    }
}

/// Deterministic key for a replayed order, so a retried restore can never
/// produce a second order
pub fn restore_key(original_key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, original_key.as_bytes()).to_string()
}

/// Cancel every tracked order and remember the acknowledged ones.
///
/// Returns how many orders went into the snapshot.
pub async fn take_snapshot<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
    schedule: &SessionSchedule,
    kind: WindowKind,
) -> TradingResult<usize> {
    let restore_at = schedule.restore_time(kind, ctx.now);
    state.clearing_flags.insert(kind, schedule.local_date(ctx.now));

    if let Some(pending) = state.snapshot.as_mut() {
        if restore_at > pending.restore_at {
            pending.restore_at = restore_at;
        }
        info!(
            symbol = ctx.symbol,
            window = %kind,
            restore_at = %pending.restore_at,
            "⏸️  Snapshot still pending, restore postponed"
        );
        return Ok(0);
    }

    // Each order joins the snapshot before its cancel, so the checkpoint
    // taken on acknowledgement already remembers it
    state.snapshot = Some(ClearingSnapshot {
        kind,
        taken_at: ctx.now,
        restore_at,
        orders: Vec::new(),
    });
    let records: Vec<OrderRecord> = state.records().cloned().collect();
    for record in records {
        if let Some(snapshot) = state.snapshot.as_mut() {
            snapshot.orders.push(SnapshotOrder {
                role: record.role,
                price: record.price,
                lots: record.lots,
                tag: record.tag,
                order_id: record.order_id.clone(),
                client_key: record.client_key.clone(),
            });
        }
        if !ctx.cancel(state, &record.order_id).await {
            if let Some(snapshot) = state.snapshot.as_mut() {
                snapshot.orders.pop();
            }
        }
    }

    let taken = state.snapshot.as_ref().map_or(0, |s| s.orders.len());
    if taken > 0 {
        tokio::time::sleep(ctx.engine.post_cancel_delay()).await;
    } else {
        state.snapshot = None;
    }

    info!(
        symbol = ctx.symbol,
        window = %kind,
        orders = taken,
        still_tracked = state.order_count(),
        restore_at = %restore_at,
        "📸 Pre-halt snapshot taken"
    );
    Ok(taken)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    NoSnapshot,
    /// Restore time not reached yet
    NotYet,
    /// Venue status or price unavailable, try next pass
    Deferred,
    /// Snapshot had nothing in it
    Discarded,
    /// Nothing could be placed; snapshot kept
    Retained,
    Restored {
        resubmitted: usize,
        closed: usize,
        reseeded: usize,
    },
}

impl RestoreOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, RestoreOutcome::Restored { .. })
    }
}

/// Replay the pending snapshot once trading is back.
pub async fn restore_snapshot<B: Broker + ?Sized>(
    ctx: &SymbolContext<'_, B>,
    state: &mut SymbolRuntimeState,
) -> TradingResult<RestoreOutcome> {
    let Some(snapshot) = state.snapshot.clone() else {
        return Ok(RestoreOutcome::NoSnapshot);
    };
    if ctx.now < snapshot.restore_at {
        debug!(symbol = ctx.symbol, restore_at = %snapshot.restore_at, "waiting for restore time");
        return Ok(RestoreOutcome::NotYet);
    }

    match ctx.broker.get_trading_status(ctx.ticker()).await {
        Ok(status) if status.is_normal() => {}
        Ok(status) => {
            info!(symbol = ctx.symbol, ?status, "⏸️  Venue not trading yet, restore deferred");
            return Ok(RestoreOutcome::Deferred);
        }
        Err(e) => {
            warn!(symbol = ctx.symbol, error = %e, "⚠️  Trading status unavailable, restore deferred");
            return Ok(RestoreOutcome::Deferred);
        }
    }

    if snapshot.orders.is_empty() {
        state.snapshot = None;
        return Ok(RestoreOutcome::Discarded);
    }

    let market = match ctx.market_price().await {
        Ok(price) => price,
        Err(e) => {
            warn!(symbol = ctx.symbol, error = %e, "⚠️  No market price, restore deferred");
            return Ok(RestoreOutcome::Deferred);
        }
    };
    let side = ctx.side();

    let mut crossed: Vec<&SnapshotOrder> = Vec::new();
    let mut marketable = 0usize;
    let mut resting: Vec<&SnapshotOrder> = Vec::new();
    for order in &snapshot.orders {
        match order.role {
            Role::Exit if side.exit_crossed(order.price, market) => crossed.push(order),
            Role::Entry if side.entry_marketable(order.price, market) => marketable += 1,
            _ => resting.push(order),
        }
    }

    // Deepest-in-the-money exit first: long high to low, short low to high
    crossed.sort_by(|a, b| side.farthest_first(b.price, a.price));

    let mut closed = 0;
    for order in crossed {
        let key = restore_key(&order.client_key);
        let request = OrderRequest::exit_market(side, ctx.ticker(), order.lots).with_key(key);
        if ctx
            .submit(state, request, Role::Exit, OrderTag::GapClose, order.price)
            .await
            .is_some()
        {
            closed += 1;
        }
    }

    let mut resubmitted = 0;
    for order in resting {
        let key = restore_key(&order.client_key);
        let request = match order.role {
            Role::Entry => OrderRequest::entry_limit(side, ctx.ticker(), order.lots, order.price),
            Role::Exit => OrderRequest::exit_limit(side, ctx.ticker(), order.lots, order.price),
        }
        .with_key(key);
        if ctx
            .submit(state, request, order.role, order.tag, order.price)
            .await
            .is_some()
        {
            resubmitted += 1;
        }
    }

    let mut reseeded = 0;
    if marketable > 0 {
        match portfolio::held(ctx).await {
            Ok(held) => {
                let slots = grid_builder::reseed_slots(ctx.strategy, held);
                info!(
                    symbol = ctx.symbol,
                    skipped = marketable,
                    slots,
                    market,
                    "🧱 Gap made entries marketable, reseeding beyond market"
                );
                reseeded = grid_builder::reseed_beyond_market(ctx, state, market, slots).await;
            }
            Err(e) => warn!(symbol = ctx.symbol, error = %e, "⚠️  Held lots unavailable, reseed skipped"),
        }
    }

    let restored = resubmitted + closed + reseeded;
    if restored == 0 {
        warn!(symbol = ctx.symbol, "⚠️  Nothing restored, snapshot kept for the next pass");
        return Ok(RestoreOutcome::Retained);
    }

    state.snapshot = None;
    info!(
        symbol = ctx.symbol,
        resubmitted,
        closed,
        reseeded,
        market,
        "▶️  Ladder restored after halt"
    );
    Ok(RestoreOutcome::Restored {
        resubmitted,
        closed,
        reseeded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn schedule() -> SessionSchedule {
        SessionSchedule::from_config(&SessionConfig::default())
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_windows_in_venue_time() {
        let s = schedule();
        let flags = BTreeMap::new();
        // 10:58 UTC is 13:58 at UTC+3
        assert_eq!(s.pre_halt_window(utc(2024, 3, 4, 10, 58), &flags), Some(WindowKind::Midday));
        assert_eq!(s.pre_halt_window(utc(2024, 3, 4, 11, 0), &flags), None);
        assert_eq!(s.pre_halt_window(utc(2024, 3, 4, 15, 43), &flags), Some(WindowKind::Evening));
        assert_eq!(s.pre_halt_window(utc(2024, 3, 4, 20, 44), &flags), Some(WindowKind::Overnight));
        assert_eq!(s.pre_halt_window(utc(2024, 3, 4, 12, 0), &flags), None);
    }

    #[test]
    fn test_window_flag_is_per_day() {
        let s = schedule();
        let now = utc(2024, 3, 4, 10, 58);
        let mut flags = BTreeMap::new();
        flags.insert(WindowKind::Midday, s.local_date(now));
        assert_eq!(s.pre_halt_window(now, &flags), None);

        let next_day = utc(2024, 3, 5, 10, 58);
        assert_eq!(s.pre_halt_window(next_day, &flags), Some(WindowKind::Midday));
    }

    #[test]
    fn test_restore_times() {
        let s = schedule();
        assert_eq!(
            s.restore_time(WindowKind::Midday, utc(2024, 3, 4, 10, 58)),
            utc(2024, 3, 4, 11, 5)
        );
        assert_eq!(
            s.restore_time(WindowKind::Evening, utc(2024, 3, 4, 15, 43)),
            utc(2024, 3, 4, 16, 0)
        );
        // 23:44 local on the 4th restores at 09:03 local on the 5th
        assert_eq!(
            s.restore_time(WindowKind::Overnight, utc(2024, 3, 4, 20, 44)),
            utc(2024, 3, 5, 6, 3)
        );
    }

    #[test]
    fn test_custom_offset() {
        let config = SessionConfig {
            utc_offset_hours: 0,
            ..SessionConfig::default()
        };
        let s = SessionSchedule::from_config(&config);
        assert_eq!(s.pre_halt_window(utc(2024, 3, 4, 13, 58), &BTreeMap::new()), Some(WindowKind::Midday));
        assert_eq!(config.midday.restore_at, NaiveTime::from_hms_opt(14, 5, 0).unwrap());
    }

    #[test]
    fn test_restore_key_is_stable() {
        assert_eq!(restore_key("abc"), restore_key("abc"));
        assert_ne!(restore_key("abc"), restore_key("abd"));
        assert_ne!(restore_key("abc"), "abc");
    }
}
