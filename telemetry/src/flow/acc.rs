//! Per-flow stats accumulator
//!
//! An accumulator is created on the first sample of a flow and lives across
//! observation windows. Counters are last-write-wins within a window; the
//! window close derives report counters and snapshots the baseline for
//! relative reporting. External components (DPI plugins) can pin an
//! accumulator across windows through the explicit refcount — garbage
//! collection only removes flows that are idle past their TTL, unreferenced
//! and not active in the current window.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Duration, Utc};

use crate::flow::{Direction, FlowCounters, FlowKey, Originator};
use crate::report::{ReportKey, SharedReportKey};

/// Accumulator state within the current observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccState {
    #[default]
    Inactive,
    WindowActive,
    WindowReset,
}

/// Stats accumulator for one tracked flow.
pub struct Accumulator {
    /// Canonical copy of the flow key.
    pub key: FlowKey,
    /// Report view shared with enqueued window stats.
    pub fkey: SharedReportKey,
    /// Baseline for relative reporting.
    pub first_counters: FlowCounters,
    /// Current accumulated counters.
    pub counters: FlowCounters,
    /// Counters derived at the last window close.
    pub report_counters: FlowCounters,
    pub state: AccState,
    pub last_updated: DateTime<Utc>,
    /// Force inclusion in the next window close.
    pub report: bool,
    pub direction: Direction,
    pub originator: Originator,
    pub flow_marker: u32,
    pub ct_zone: u16,
    refcnt: u32,
    /// The opposite direction of the same connection, when paired up.
    rev_acc: Weak<RefCell<Accumulator>>,
    plugin_ctx: BTreeMap<String, Box<dyn Any>>,
}

/// Shared handle to a live accumulator.
///
/// Holding the handle alone does not pin the flow; callers that need the
/// accumulator to survive garbage collection must [`Accumulator::retain`] it.
pub type AccHandle = Rc<RefCell<Accumulator>>;

impl Accumulator {
    pub fn new(key: &FlowKey, now: DateTime<Utc>) -> AccHandle {
        let acc = Accumulator {
            key: key.clone(),
            fkey: Rc::new(RefCell::new(ReportKey::from_flow_key(key, now))),
            first_counters: FlowCounters::default(),
            counters: FlowCounters::default(),
            report_counters: FlowCounters::default(),
            state: AccState::Inactive,
            last_updated: now,
            report: false,
            direction: key.direction,
            originator: key.originator,
            flow_marker: key.flow_marker,
            ct_zone: key.ct_zone,
            refcnt: 0,
            rev_acc: Weak::new(),
            plugin_ctx: BTreeMap::new(),
        };
        Rc::new(RefCell::new(acc))
    }

    /// Pair this accumulator with the opposite direction of the connection.
    /// The link is weak: it never keeps the peer alive past its own GC.
    pub fn set_reverse(&mut self, rev: &AccHandle) {
        self.rev_acc = Rc::downgrade(rev);
    }

    pub fn reverse(&self) -> Option<AccHandle> {
        self.rev_acc.upgrade()
    }

    /// Pin the accumulator across windows.
    pub fn retain(&mut self) {
        self.refcnt += 1;
    }

    /// Drop one pin. Release without a matching retain is a logic error.
    pub fn release(&mut self) {
        debug_assert!(self.refcnt > 0, "accumulator released more than retained");
        self.refcnt = self.refcnt.saturating_sub(1);
    }

    pub fn refcnt(&self) -> u32 {
        self.refcnt
    }

    pub fn is_active(&self) -> bool {
        self.state == AccState::WindowActive || self.report
    }

    /// Idle past the TTL, regardless of references.
    pub fn expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.last_updated) >= ttl
    }

    // Plugin scratch space. Values are dropped (running their destructors)
    // when cleared, replaced, or when the accumulator goes away.

    pub fn set_plugin_ctx(&mut self, plugin: &str, ctx: Box<dyn Any>) {
        self.plugin_ctx.insert(plugin.to_string(), ctx);
    }

    pub fn plugin_ctx(&self, plugin: &str) -> Option<&(dyn Any)> {
        self.plugin_ctx.get(plugin).map(|b| b.as_ref())
    }

    pub fn plugin_ctx_mut(&mut self, plugin: &str) -> Option<&mut (dyn Any + 'static)> {
        self.plugin_ctx.get_mut(plugin).map(|b| b.as_mut())
    }

    pub fn clear_plugin_ctx(&mut self, plugin: &str) -> bool {
        self.plugin_ctx.remove(plugin).is_some()
    }
}
