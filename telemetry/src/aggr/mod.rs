//! Flow metadata aggregator
//!
//! Tracks per-flow accumulators in a two-level tree (ethernet pair on top,
//! ethertype or transport tuple below, plus a flat tuple tree for flows with
//! no MAC information) and turns them into bounded windowed reports. The
//! window close walk derives report counters, folds L2 children into their
//! pair accumulator and garbage-collects idle flows in one pass.

pub mod merge;
pub mod zone;

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::flow::acc::{AccHandle, AccState, Accumulator};
use crate::flow::{EthPairKey, FlowCounters, FlowKey, MacAddr, TupleKey};
use crate::report::{FlowStatsEntry, NodeInfo, ObservationWindow, Uplink};
use crate::report::wire;

/// Counter semantics of emitted reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportType {
    #[default]
    Absolute,
    Relative,
}

pub type CollectFilter = Box<dyn Fn(&FlowKey, Option<&str>) -> bool>;
pub type ReportFilter = Box<dyn Fn(&Accumulator) -> bool>;
pub type NeighLookup = Box<dyn Fn(IpAddr) -> Option<MacAddr>>;
pub type AccHook = Box<dyn FnMut(&mut Accumulator)>;
pub type ReportEmitter = Box<dyn FnMut(&str, &[u8]) -> bool>;

/// Optional integration points. All of them default to absent; a missing
/// hook is a no-op (filters admit everything).
#[derive(Default)]
pub struct AggrHooks {
    /// Runs before any state mutation on both the native sample path and the
    /// peer merge path; rejecting drops the sample silently.
    pub collect_filter: Option<CollectFilter>,
    /// Runs when placing a closed accumulator into a window.
    pub report_filter: Option<ReportFilter>,
    /// IP to MAC resolution for peer-merged keys.
    pub neigh_lookup: Option<NeighLookup>,
    pub on_acc_create: Option<AccHook>,
    pub on_acc_destroy: Option<AccHook>,
    pub on_acc_report: Option<AccHook>,
    /// Transport for serialized reports.
    pub emit: Option<ReportEmitter>,
}

/// Aggregator initialization parameters.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub node: NodeInfo,
    /// Max observation windows per report.
    pub num_windows: usize,
    /// Max flow entries per window.
    pub max_reports_per_window: usize,
    /// How long an inactive accumulator is kept around, seconds.
    pub acc_ttl_secs: i64,
    pub report_type: ReportType,
    /// Report every L2 child flow instead of only the pair aggregate.
    pub report_all_samples: bool,
    /// Conntrack zone this aggregator collects; `u16::MAX` collects all
    /// zones and enables cross-zone merging upstream.
    pub ct_zone: u16,
}

struct EthPair {
    /// Aggregate accumulator of the pair's L2 children.
    pair_stats: AccHandle,
    ethertype_flows: BTreeMap<u16, AccHandle>,
    five_tuple_flows: BTreeMap<TupleKey, AccHandle>,
}

pub struct Aggregator {
    node: NodeInfo,
    num_windows: usize,
    max_reports_per_window: usize,
    acc_ttl: Duration,
    report_type: ReportType,
    report_all_samples: bool,
    ct_zone: u16,

    eth_pairs: BTreeMap<EthPairKey, EthPair>,
    five_tuple_flows: BTreeMap<TupleKey, AccHandle>,

    windows: Vec<ObservationWindow>,
    windows_cur_idx: usize,
    active_accs: usize,
    total_flows: usize,
    held_flows: usize,
    total_report_flows: usize,
    uplink: Option<Uplink>,

    pub hooks: AggrHooks,
}

struct WalkCtx<'a> {
    window: Option<&'a mut ObservationWindow>,
    report_type: ReportType,
    report_all_samples: bool,
    ttl: Duration,
    now: DateTime<Utc>,
    hooks: &'a mut AggrHooks,
    total_flows: &'a mut usize,
    held_flows: &'a mut usize,
    total_report_flows: &'a mut usize,
}

/// Derive report counters and advance the relative baseline.
///
/// In relative mode each field subtracts the previous baseline only when the
/// counter moved forward; a counter that went backwards (datapath restart)
/// reports its raw restarted value.
fn close_counters(report_type: ReportType, acc: &mut Accumulator) {
    acc.report_counters = acc.counters;
    if report_type == ReportType::Relative {
        if acc.report_counters.bytes >= acc.first_counters.bytes {
            acc.report_counters.bytes -= acc.first_counters.bytes;
        }
        if acc.report_counters.packets >= acc.first_counters.packets {
            acc.report_counters.packets -= acc.first_counters.packets;
        }
    }
    acc.first_counters = acc.counters;
}

/// Fold an L2 child into the pair aggregate, net of what the child already
/// reported. Saturating math guards against counter wrap and resets.
fn fold_eth_acc(pair_acc: &mut Accumulator, child: &Accumulator) {
    let delta_bytes = child.counters.bytes.saturating_sub(child.first_counters.bytes);
    let delta_packets = child
        .counters
        .packets
        .saturating_sub(child.first_counters.packets);
    pair_acc.counters.bytes = pair_acc.counters.bytes.saturating_add(delta_bytes);
    pair_acc.counters.packets = pair_acc.counters.packets.saturating_add(delta_packets);
}

/// Place a closed accumulator's report counters into the current window.
///
/// Filter rejections and a full window are not errors: the flow's attributes
/// are re-flagged for the next window and, on overflow, the drop is counted.
fn enqueue_sample(ctx: &mut WalkCtx<'_>, acc: &mut Accumulator) -> bool {
    let window = match ctx.window.as_deref_mut() {
        Some(w) => w,
        None => return false,
    };

    if let Some(filter) = ctx.hooks.report_filter.as_ref() {
        if !filter(acc) {
            acc.fkey.borrow_mut().state.report_attrs = true;
            return false;
        }
    }

    if window.is_full() {
        acc.fkey.borrow_mut().state.report_attrs = true;
        window.dropped_stats += 1;
        return false;
    }

    window.stats.push(FlowStatsEntry {
        fkey: acc.fkey.clone(),
        counters: acc.report_counters,
    });
    *ctx.total_report_flows += 1;
    if let Some(cb) = ctx.hooks.on_acc_report.as_mut() {
        cb(acc);
    }
    true
}

/// Close, enqueue and garbage-collect every accumulator of one tuple tree.
fn walk_tuple_tree<K: Ord + Clone>(tree: &mut BTreeMap<K, AccHandle>, ctx: &mut WalkCtx<'_>) {
    let mut removals: Vec<K> = Vec::new();

    for (tree_key, handle) in tree.iter() {
        let mut acc = handle.borrow_mut();
        let active = acc.is_active();
        if active {
            close_counters(ctx.report_type, &mut acc);
            enqueue_sample(ctx, &mut acc);
            acc.state = AccState::WindowReset;
        }
        acc.report = false;

        let retire = acc.expired(ctx.now, ctx.ttl);
        let refd = acc.refcnt() != 0;
        if retire && refd {
            *ctx.held_flows += 1;
        }
        let keep = active || !(retire && !refd);
        if !keep {
            removals.push(tree_key.clone());
        }
    }

    for key in removals {
        if let Some(handle) = tree.remove(&key) {
            if let Some(cb) = ctx.hooks.on_acc_destroy.as_mut() {
                cb(&mut handle.borrow_mut());
            }
            *ctx.total_flows -= 1;
        }
    }
}

/// Same walk for the L2 children of an eth pair, folding every active child
/// into the pair aggregate and closing the aggregate itself afterwards.
fn walk_eth_pair(pair: &mut EthPair, ctx: &mut WalkCtx<'_>) {
    let mut removals: Vec<u16> = Vec::new();

    for (ethertype, handle) in pair.ethertype_flows.iter() {
        let mut acc = handle.borrow_mut();
        let active = acc.is_active();
        if active {
            {
                let mut pair_acc = pair.pair_stats.borrow_mut();
                pair_acc.state = AccState::WindowActive;
                fold_eth_acc(&mut pair_acc, &acc);
            }
            close_counters(ctx.report_type, &mut acc);
            if ctx.report_all_samples {
                enqueue_sample(ctx, &mut acc);
            }
            acc.state = AccState::WindowReset;
        }
        acc.report = false;

        let retire = acc.expired(ctx.now, ctx.ttl);
        let refd = acc.refcnt() != 0;
        if retire && refd {
            *ctx.held_flows += 1;
        }
        let keep = active || !(retire && !refd);
        if !keep {
            removals.push(*ethertype);
        }
    }

    for ethertype in removals {
        if let Some(handle) = pair.ethertype_flows.remove(&ethertype) {
            if let Some(cb) = ctx.hooks.on_acc_destroy.as_mut() {
                cb(&mut handle.borrow_mut());
            }
            *ctx.total_flows -= 1;
        }
    }

    let mut pair_acc = pair.pair_stats.borrow_mut();
    if pair_acc.state == AccState::WindowActive {
        close_counters(ctx.report_type, &mut pair_acc);
        enqueue_sample(ctx, &mut pair_acc);
        pair_acc.state = AccState::WindowReset;
    }

    walk_tuple_tree(&mut pair.five_tuple_flows, ctx);
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Aggregator {
        Aggregator {
            node: config.node,
            num_windows: config.num_windows.max(1),
            max_reports_per_window: config.max_reports_per_window,
            acc_ttl: Duration::seconds(config.acc_ttl_secs),
            report_type: config.report_type,
            report_all_samples: config.report_all_samples,
            ct_zone: config.ct_zone,
            eth_pairs: BTreeMap::new(),
            five_tuple_flows: BTreeMap::new(),
            windows: Vec::new(),
            windows_cur_idx: 0,
            active_accs: 0,
            total_flows: 0,
            held_flows: 0,
            total_report_flows: 0,
            uplink: None,
            hooks: AggrHooks::default(),
        }
    }

    pub fn ct_zone(&self) -> u16 {
        self.ct_zone
    }

    pub fn total_flows(&self) -> usize {
        self.total_flows
    }

    /// Inactive-past-TTL flows still pinned by a reference, as of the last
    /// window close.
    pub fn held_flows(&self) -> usize {
        self.held_flows
    }

    pub fn active_flow_count(&self) -> usize {
        self.active_accs
    }

    pub fn total_report_flows(&self) -> usize {
        self.total_report_flows
    }

    pub fn total_eth_pairs(&self) -> usize {
        self.eth_pairs.len()
    }

    pub(crate) fn bump_active_accs(&mut self) {
        self.active_accs += 1;
    }

    /// Key the pair aggregate is created from: L2 identity only, so a pair
    /// report never carries one random child's transport details.
    fn pair_level_key(key: &FlowKey) -> FlowKey {
        let mut pair_key = key.clone();
        pair_key.ufid = None;
        pair_key.ip = None;
        pair_key.ip_id = 0;
        pair_key.tcp_flags = 0;
        pair_key
    }

    fn new_acc(hooks: &mut AggrHooks, key: &FlowKey, now: DateTime<Utc>) -> AccHandle {
        let handle = Accumulator::new(key, now);
        if let Some(cb) = hooks.on_acc_create.as_mut() {
            cb(&mut handle.borrow_mut());
        }
        handle
    }

    /// Look up the accumulator for a key, creating the whole path (eth pair
    /// included) on first sight.
    pub fn lookup_acc(&mut self, key: &FlowKey, now: DateTime<Utc>) -> AccHandle {
        if !key.has_eth_info() {
            let tkey = key.tuple_key();
            if let Some(handle) = self.five_tuple_flows.get(&tkey) {
                return handle.clone();
            }
            let handle = Self::new_acc(&mut self.hooks, key, now);
            self.total_flows += 1;
            self.five_tuple_flows.insert(tkey, handle.clone());
            return handle;
        }

        let pair_key = key.eth_pair_key();
        if !self.eth_pairs.contains_key(&pair_key) {
            let pair_stats = Self::new_acc(&mut self.hooks, &Self::pair_level_key(key), now);
            self.eth_pairs.insert(
                pair_key,
                EthPair {
                    pair_stats,
                    ethertype_flows: BTreeMap::new(),
                    five_tuple_flows: BTreeMap::new(),
                },
            );
        }

        if let Some(pair) = self.eth_pairs.get(&pair_key) {
            let found = if key.is_eth_only() {
                pair.ethertype_flows.get(&key.ethertype).cloned()
            } else {
                pair.five_tuple_flows.get(&key.tuple_key()).cloned()
            };
            if let Some(handle) = found {
                return handle;
            }
        }

        let handle = Self::new_acc(&mut self.hooks, key, now);
        self.total_flows += 1;
        if let Some(pair) = self.eth_pairs.get_mut(&pair_key) {
            if key.is_eth_only() {
                pair.ethertype_flows.insert(key.ethertype, handle.clone());
            } else {
                pair.five_tuple_flows.insert(key.tuple_key(), handle.clone());
            }
        }
        handle
    }

    /// Look up without creating.
    pub fn find_acc(&self, key: &FlowKey) -> Option<AccHandle> {
        if key.has_eth_info() {
            let pair = self.eth_pairs.get(&key.eth_pair_key())?;
            if key.is_eth_only() {
                pair.ethertype_flows.get(&key.ethertype).cloned()
            } else {
                pair.five_tuple_flows.get(&key.tuple_key()).cloned()
            }
        } else {
            self.five_tuple_flows.get(&key.tuple_key()).cloned()
        }
    }

    /// Feed one sampled data point into the current window.
    ///
    /// A collect-filter rejection is a silent no-op, reported as success to
    /// the caller.
    pub fn add_sample(
        &mut self,
        key: &FlowKey,
        counters: FlowCounters,
        now: DateTime<Utc>,
    ) -> bool {
        self.add_sample_named(key, counters, None, now)
    }

    /// `add_sample` with an application name for the collect filter.
    pub fn add_sample_named(
        &mut self,
        key: &FlowKey,
        counters: FlowCounters,
        app_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(filter) = self.hooks.collect_filter.as_ref() {
            if !filter(key, app_name) {
                return true;
            }
        }

        let handle = self.lookup_acc(key, now);
        let mut acc = handle.borrow_mut();
        if acc.state != AccState::WindowActive {
            self.active_accs += 1;
        }
        acc.counters = counters;
        acc.state = AccState::WindowActive;
        acc.last_updated = now;
        acc.fkey.borrow_mut().state.last_obs = now;
        true
    }

    /// Record the uplink the next closed window was observed on.
    pub fn add_uplink(&mut self, if_type: &str, changed: bool) {
        self.uplink = Some(Uplink {
            if_type: if_type.to_string(),
            changed,
        });
    }

    /// Open the next observation window. Fails when the report already holds
    /// the configured number of windows.
    pub fn activate_window(&mut self, now: DateTime<Utc>) -> bool {
        if self.windows_cur_idx >= self.num_windows {
            return false;
        }
        if self.windows.len() == self.windows_cur_idx {
            self.windows.push(ObservationWindow::new(
                now,
                self.max_reports_per_window,
            ));
        }
        true
    }

    /// Close the active window: derive report counters for every active
    /// accumulator, enqueue them, and garbage-collect idle flows.
    pub fn close_active_window(&mut self, now: DateTime<Utc>) -> bool {
        if self.windows_cur_idx >= self.windows.len() {
            return false;
        }

        self.held_flows = 0;

        {
            let window = &mut self.windows[self.windows_cur_idx];
            window.ended_at = Some(now);
            window.uplink = self.uplink.clone();

            let mut ctx = WalkCtx {
                window: Some(window),
                report_type: self.report_type,
                report_all_samples: self.report_all_samples,
                ttl: self.acc_ttl,
                now,
                hooks: &mut self.hooks,
                total_flows: &mut self.total_flows,
                held_flows: &mut self.held_flows,
                total_report_flows: &mut self.total_report_flows,
            };

            for pair in self.eth_pairs.values_mut() {
                walk_eth_pair(pair, &mut ctx);
            }
            walk_tuple_tree(&mut self.five_tuple_flows, &mut ctx);
        }

        debug!(
            window = self.windows_cur_idx,
            flows = self.total_flows,
            held = self.held_flows,
            reported = self.total_report_flows,
            "closed observation window"
        );

        self.windows_cur_idx += 1;
        self.active_accs = 0;
        true
    }

    /// Build the wire report for everything closed so far.
    pub fn build_report(&self, now: DateTime<Utc>) -> wire::FlowReport {
        wire::FlowReport {
            reported_at: Some(now.timestamp() as u64),
            node_info: Some(wire::NodeInfo {
                node_id: Some(self.node.node_id.clone()),
                location_id: Some(self.node.location_id.clone()),
            }),
            observation_windows: self.windows[..self.windows_cur_idx]
                .iter()
                .map(wire::window_to_wire)
                .collect(),
        }
    }

    /// Serialize and emit the report, then reset the window state.
    ///
    /// Emission failure leaves the windows untouched so the next attempt can
    /// retry; attribute flags are only cleared once the report went out.
    pub fn send_report(&mut self, topic: &str, now: DateTime<Utc>) -> bool {
        if self.windows_cur_idx == 0 {
            return false;
        }
        let payload = self.build_report(now).encode_to_bytes();

        let sent = match self.hooks.emit.as_mut() {
            Some(emit) => emit(topic, &payload),
            None => {
                warn!("no report emitter configured");
                false
            }
        };
        if !sent {
            return false;
        }

        // attrs were delivered; stop repeating them
        for window in &self.windows[..self.windows_cur_idx] {
            for entry in &window.stats {
                entry.fkey.borrow_mut().state.report_attrs = false;
            }
        }

        self.reset();
        true
    }

    /// Drop the report windows and cursors. Accumulator trees are untouched.
    pub fn reset(&mut self) {
        self.windows.clear();
        self.windows_cur_idx = 0;
        self.active_accs = 0;
        self.total_report_flows = 0;
    }

    #[cfg(test)]
    pub(crate) fn window(&self, idx: usize) -> &ObservationWindow {
        &self.windows[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Direction, IpTuple, Originator};
    use std::cell::Cell;
    use std::rc::Rc;

    fn aggr(report_type: ReportType) -> Aggregator {
        Aggregator::new(AggregatorConfig {
            node: NodeInfo {
                node_id: "node-1".into(),
                location_id: "loc-1".into(),
            },
            num_windows: 4,
            max_reports_per_window: 16,
            acc_ttl_secs: 120,
            report_type,
            report_all_samples: true,
            ct_zone: 0,
        })
    }

    fn eth_key(smac: [u8; 6]) -> FlowKey {
        FlowKey {
            ufid: None,
            smac: Some(MacAddr::new(smac)),
            dmac: Some(MacAddr::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01])),
            vlan_id: 0,
            ethertype: 0x0800,
            ip: None,
            ip_id: 0,
            tcp_flags: 0,
            fstart: false,
            fend: false,
            direction: Direction::Unset,
            originator: Originator::Unknown,
            flow_marker: 0,
            ct_zone: 0,
            rx_idx: 0,
            tx_idx: 0,
        }
    }

    fn tuple_key() -> FlowKey {
        let mut key = eth_key([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        key.ip = Some(IpTuple {
            src_ip: "192.168.1.2".parse().unwrap(),
            dst_ip: "10.0.0.1".parse().unwrap(),
            proto: 6,
            sport: 40000,
            dport: 443,
        });
        key
    }

    fn window_counters(aggr: &Aggregator, widx: usize) -> Vec<FlowCounters> {
        aggr.window(widx).stats.iter().map(|e| e.counters).collect()
    }

    #[test]
    fn test_two_samples_same_key_relative_then_next_window() {
        let mut aggr = aggr(ReportType::Relative);
        let key = eth_key([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let now = Utc::now();

        assert!(aggr.activate_window(now));
        assert!(aggr.add_sample(&key, FlowCounters::new(10, 10_000), now));
        assert!(aggr.add_sample(&key, FlowCounters::new(30, 30_000), now));
        assert_eq!(aggr.active_flow_count(), 1);
        assert!(aggr.close_active_window(now));

        // first report carries the absolute numbers: relative to a zero base
        let c = window_counters(&aggr, 0);
        // eth-only child plus the pair aggregate
        assert_eq!(c.len(), 2);
        assert!(c.iter().all(|c| c.bytes == 30_000 && c.packets == 30));

        assert!(aggr.activate_window(now));
        assert!(aggr.add_sample(&key, FlowCounters::new(50, 50_000), now));
        assert!(aggr.close_active_window(now));

        let c = window_counters(&aggr, 1);
        assert_eq!(c.len(), 2);
        assert!(c.iter().all(|c| c.bytes == 20_000 && c.packets == 20));
    }

    #[test]
    fn test_two_samples_same_key_absolute() {
        let mut aggr = aggr(ReportType::Absolute);
        let key = eth_key([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let now = Utc::now();

        aggr.activate_window(now);
        aggr.add_sample(&key, FlowCounters::new(10, 10_000), now);
        aggr.add_sample(&key, FlowCounters::new(30, 30_000), now);
        aggr.close_active_window(now);

        aggr.activate_window(now);
        aggr.add_sample(&key, FlowCounters::new(50, 50_000), now);
        aggr.close_active_window(now);

        let c = window_counters(&aggr, 1);
        assert!(c.iter().any(|c| c.bytes == 50_000 && c.packets == 50));
    }

    #[test]
    fn test_relative_counter_reset() {
        let mut aggr = aggr(ReportType::Relative);
        let key = tuple_key();
        let now = Utc::now();

        aggr.activate_window(now);
        aggr.add_sample(&key, FlowCounters::new(10, 10_000), now);
        aggr.close_active_window(now);

        aggr.activate_window(now);
        aggr.add_sample(&key, FlowCounters::new(5, 5_000), now);
        aggr.close_active_window(now);

        // counters went backwards: the restarted value is reported as-is
        let c = window_counters(&aggr, 1);
        assert_eq!(c, vec![FlowCounters::new(5, 5_000)]);
    }

    #[test]
    fn test_window_overflow_drops_and_flags() {
        let mut aggr = Aggregator::new(AggregatorConfig {
            node: NodeInfo::default(),
            num_windows: 1,
            max_reports_per_window: 1,
            acc_ttl_secs: 120,
            report_type: ReportType::Absolute,
            report_all_samples: true,
            ct_zone: 0,
        });
        let now = Utc::now();
        let key_a = tuple_key();
        let mut key_b = tuple_key();
        key_b.ip.as_mut().unwrap().dport = 8443;

        aggr.activate_window(now);
        aggr.add_sample(&key_a, FlowCounters::new(1, 100), now);
        aggr.add_sample(&key_b, FlowCounters::new(2, 200), now);
        aggr.close_active_window(now);

        let window = aggr.window(0);
        assert_eq!(window.stats.len(), 1);
        assert_eq!(window.dropped_stats, 1);
        // the walk visits key_a (dport 443) first, so key_b overflowed and
        // is marked to carry its attributes next time
        let dropped = aggr.find_acc(&key_b).unwrap();
        assert!(dropped.borrow().fkey.borrow().state.report_attrs);
    }

    #[test]
    fn test_report_filter_defers_attrs() {
        let mut aggr = aggr(ReportType::Absolute);
        aggr.hooks.report_filter = Some(Box::new(|_| false));
        let key = tuple_key();
        let now = Utc::now();

        aggr.activate_window(now);
        aggr.add_sample(&key, FlowCounters::new(1, 100), now);
        aggr.close_active_window(now);

        assert!(aggr.window(0).stats.is_empty());
        let acc = aggr.find_acc(&key).unwrap();
        assert!(acc.borrow().fkey.borrow().state.report_attrs);
        // filter rejections are not drops
        assert_eq!(aggr.window(0).dropped_stats, 0);
    }

    #[test]
    fn test_collect_filter_is_silent_noop() {
        let mut aggr = aggr(ReportType::Absolute);
        aggr.hooks.collect_filter = Some(Box::new(|_, _| false));
        let now = Utc::now();
        assert!(aggr.add_sample(&tuple_key(), FlowCounters::new(1, 1), now));
        assert_eq!(aggr.total_flows(), 0);
    }

    #[test]
    fn test_ttl_gc_and_held_flows() {
        let mut aggr = aggr(ReportType::Absolute);
        let now = Utc::now();
        let key_gone = tuple_key();
        let mut key_held = tuple_key();
        key_held.ip.as_mut().unwrap().dport = 8443;

        aggr.activate_window(now);
        aggr.add_sample(&key_gone, FlowCounters::new(1, 100), now);
        aggr.add_sample(&key_held, FlowCounters::new(1, 100), now);
        let held = aggr.find_acc(&key_held).unwrap();
        held.borrow_mut().retain();
        aggr.close_active_window(now);
        assert_eq!(aggr.total_flows(), 2);

        // both idle well past the ttl
        let later = now + Duration::seconds(300);
        aggr.activate_window(later);
        aggr.close_active_window(later);

        assert!(aggr.find_acc(&key_gone).is_none());
        assert!(aggr.find_acc(&key_held).is_some());
        assert_eq!(aggr.total_flows(), 1);
        assert_eq!(aggr.held_flows(), 1);

        // released, the held flow goes on the next close
        held.borrow_mut().release();
        aggr.activate_window(later);
        aggr.close_active_window(later);
        assert!(aggr.find_acc(&key_held).is_none());
        assert_eq!(aggr.total_flows(), 0);
        assert_eq!(aggr.held_flows(), 0);
    }

    #[test]
    fn test_active_window_gc_skips_active_flows() {
        let mut aggr = aggr(ReportType::Absolute);
        let now = Utc::now();
        let key = tuple_key();

        aggr.activate_window(now);
        aggr.add_sample(&key, FlowCounters::new(1, 100), now);
        // sampled long ago but active in this window: must survive
        let late = now + Duration::seconds(500);
        aggr.close_active_window(late);
        assert!(aggr.find_acc(&key).is_some());
    }

    #[test]
    fn test_eth_pair_fold_nets_out_reported_counters() {
        let mut aggr = aggr(ReportType::Absolute);
        let key = eth_key([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let now = Utc::now();

        aggr.activate_window(now);
        aggr.add_sample(&key, FlowCounters::new(10, 1_000), now);
        aggr.close_active_window(now);

        aggr.activate_window(now);
        aggr.add_sample(&key, FlowCounters::new(15, 1_500), now);
        aggr.close_active_window(now);

        // pair aggregate accumulated 1000 + (1500 - 1000)
        let pair_entries: Vec<FlowCounters> = aggr
            .window(1)
            .stats
            .iter()
            .filter(|e| e.fkey.borrow().ethertype == 0x0800)
            .map(|e| e.counters)
            .collect();
        assert!(pair_entries.iter().any(|c| c.bytes == 1_500));
    }

    #[test]
    fn test_window_limit_exhausted() {
        let mut aggr = Aggregator::new(AggregatorConfig {
            node: NodeInfo::default(),
            num_windows: 1,
            max_reports_per_window: 8,
            acc_ttl_secs: 120,
            report_type: ReportType::Absolute,
            report_all_samples: true,
            ct_zone: 0,
        });
        let now = Utc::now();
        assert!(aggr.activate_window(now));
        assert!(aggr.close_active_window(now));
        assert!(!aggr.activate_window(now));
        assert!(!aggr.close_active_window(now));
    }

    #[test]
    fn test_send_report_resets_and_clears_attr_flags() {
        let mut aggr = aggr(ReportType::Absolute);
        let sent = Rc::new(Cell::new(0u32));
        let sent_in = sent.clone();
        aggr.hooks.emit = Some(Box::new(move |topic, payload| {
            assert_eq!(topic, "dev-test/flows");
            assert!(!payload.is_empty());
            sent_in.set(sent_in.get() + 1);
            true
        }));

        let key = tuple_key();
        let now = Utc::now();
        aggr.activate_window(now);
        aggr.add_sample(&key, FlowCounters::new(1, 100), now);
        aggr.close_active_window(now);

        let acc = aggr.find_acc(&key).unwrap();
        assert!(aggr.send_report("dev-test/flows", now));
        assert_eq!(sent.get(), 1);
        assert_eq!(aggr.total_report_flows(), 0);
        assert!(!acc.borrow().fkey.borrow().state.report_attrs);

        // nothing closed, nothing to send
        assert!(!aggr.send_report("dev-test/flows", now));
    }

    #[test]
    fn test_send_report_failure_keeps_windows() {
        let mut aggr = aggr(ReportType::Absolute);
        aggr.hooks.emit = Some(Box::new(|_, _| false));
        let now = Utc::now();
        aggr.activate_window(now);
        aggr.add_sample(&tuple_key(), FlowCounters::new(1, 100), now);
        aggr.close_active_window(now);

        assert!(!aggr.send_report("t", now));
        assert_eq!(aggr.total_report_flows(), 1);
        assert_eq!(aggr.build_report(now).observation_windows.len(), 1);
    }

    #[test]
    fn test_acc_callbacks_fire() {
        let created = Rc::new(Cell::new(0u32));
        let destroyed = Rc::new(Cell::new(0u32));
        let mut aggr = aggr(ReportType::Absolute);
        let c = created.clone();
        aggr.hooks.on_acc_create = Some(Box::new(move |_| c.set(c.get() + 1)));
        let d = destroyed.clone();
        aggr.hooks.on_acc_destroy = Some(Box::new(move |_| d.set(d.get() + 1)));

        let now = Utc::now();
        aggr.activate_window(now);
        aggr.add_sample(&tuple_key(), FlowCounters::new(1, 100), now);
        // pair aggregate + tuple child
        assert_eq!(created.get(), 2);
        aggr.close_active_window(now);

        let later = now + Duration::seconds(300);
        aggr.activate_window(later);
        aggr.close_active_window(later);
        assert_eq!(destroyed.get(), 1);
    }
}
