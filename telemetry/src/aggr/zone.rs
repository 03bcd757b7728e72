//! Conntrack zone merging
//!
//! When the collector runs in wildcard-zone mode (`ct_zone == u16::MAX`) the
//! same connection can show up once per zone with diverging counters. A
//! transient tracker keyed by layer-3 identity reconciles each collected
//! batch: the sample whose packets and bytes are both larger wins, an
//! asymmetric comparison upgrades the older sample, and flows that only ever
//! appeared in zone 1 are dropped from the batch entirely.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use tracing::trace;

use crate::flow::FlowSample;

/// Zone id marking a tracker entry as merged across zones.
pub const ZONE_MERGED: u16 = u16::MAX;

/// Zone whose exclusive flows are discarded after the merge.
const SECONDARY_ONLY_ZONE: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Layer3Key {
    src_ip: IpAddr,
    dst_ip: IpAddr,
    proto: u8,
    sport: u16,
    dport: u16,
}

fn layer3_key(sample: &FlowSample) -> Option<Layer3Key> {
    let t = sample.key.ip?;
    Some(Layer3Key {
        src_ip: t.src_ip,
        dst_ip: t.dst_ip,
        proto: t.proto,
        sport: t.sport,
        dport: t.dport,
    })
}

#[derive(Debug)]
struct Tracked {
    /// Index of the first sample seen for this layer-3 identity.
    idx: usize,
    zone_id: u16,
}

/// Transient per-batch tracker. Built during collection, consumed by
/// [`ZoneMerge::finish`]; nothing survives across batches.
#[derive(Debug, Default)]
pub struct ZoneMerge {
    tracker: BTreeMap<Layer3Key, Tracked>,
}

impl ZoneMerge {
    pub fn new() -> ZoneMerge {
        ZoneMerge::default()
    }

    /// Track `samples[idx]`. Samples without layer-3 identity pass through
    /// untracked.
    pub fn track(&mut self, samples: &mut [FlowSample], idx: usize) {
        let key = match layer3_key(&samples[idx]) {
            Some(k) => k,
            None => return,
        };
        let zone = samples[idx].key.ct_zone;

        match self.tracker.get_mut(&key) {
            None => {
                self.tracker.insert(key, Tracked { idx, zone_id: zone });
            }
            Some(entry) => {
                let stored = samples[entry.idx].counters;
                let incoming = samples[idx].counters;
                if incoming.packets > stored.packets && incoming.bytes > stored.bytes {
                    samples[entry.idx].counters = incoming;
                } else if incoming.packets < stored.packets && incoming.bytes < stored.bytes {
                    samples[idx].counters = stored;
                }
                entry.zone_id = ZONE_MERGED;
            }
        }
    }

    /// Drop every sample whose tracker entry stayed in the
    /// secondary-only zone, then discard the tracker.
    pub fn finish(self, samples: &mut Vec<FlowSample>) {
        let drop_idx: BTreeSet<usize> = self
            .tracker
            .values()
            .filter(|t| t.zone_id == SECONDARY_ONLY_ZONE)
            .map(|t| t.idx)
            .collect();
        if drop_idx.is_empty() {
            return;
        }
        trace!(dropped = drop_idx.len(), "dropping secondary-zone-only flows");

        let mut i = 0;
        samples.retain(|_| {
            let keep = !drop_idx.contains(&i);
            i += 1;
            keep
        });
    }
}

/// Reconcile one collected batch in place.
pub fn merge_zones(samples: &mut Vec<FlowSample>) {
    let mut zm = ZoneMerge::new();
    for idx in 0..samples.len() {
        zm.track(samples, idx);
    }
    zm.finish(samples);
}
