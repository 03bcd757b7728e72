//! Peer report merge
//!
//! A separate process (out-of-band enrichment, a DPI sidecar) serializes its
//! own flow report and sends it over; this module folds the report's tags and
//! vendor data into the local accumulator tree. Only vendors not yet recorded
//! on a flow are added — existing entries are preserved verbatim. Merged
//! flows are marked for inclusion in the next window close.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::aggr::Aggregator;
use crate::flow::acc::AccState;
use crate::flow::{FlowKey, IpTuple};
use crate::report::wire;
use crate::report::{FlowTag, ReportKey, VendorData, VendorKv, VendorValue};

fn merge_tags(fkey: &mut ReportKey, pb: &wire::FlowKey) {
    for pb_tag in &pb.flow_tags {
        let vendor = match pb_tag.vendor.as_deref() {
            Some(v) if !v.is_empty() => v,
            _ => continue,
        };
        if fkey.has_tag_vendor(vendor) {
            continue;
        }
        fkey.tags.push(FlowTag {
            vendor: vendor.to_string(),
            app_name: pb_tag.app_name.clone(),
            tags: pb_tag.app_tags.clone(),
        });
    }
}

fn merge_vendor_data(fkey: &mut ReportKey, pb: &wire::FlowKey) {
    for pb_vd in &pb.vendor_data {
        let vendor = match pb_vd.vendor.as_deref() {
            Some(v) if !v.is_empty() => v,
            _ => continue,
        };
        if fkey.has_vendor_data(vendor) {
            continue;
        }
        let kv_pairs = pb_vd
            .vendor_kv_pair
            .iter()
            .filter_map(|pb_kv| {
                let key = pb_kv.key.clone()?;
                let value = if let Some(s) = &pb_kv.val_str {
                    VendorValue::Str(s.clone())
                } else if let Some(v) = pb_kv.val_u32 {
                    VendorValue::U32(v)
                } else if let Some(v) = pb_kv.val_u64 {
                    VendorValue::U64(v)
                } else {
                    return None;
                };
                Some(VendorKv { key, value })
            })
            .collect();
        fkey.vendor_data.push(VendorData {
            vendor: vendor.to_string(),
            kv_pairs,
        });
    }
}

impl Aggregator {
    /// Translate a wire key into a lookup key.
    ///
    /// IPs are parsed by content (the address family is not explicit on the
    /// wire). A source address that parses in neither family degrades the
    /// key to ethernet-only; a destination that does not match the source's
    /// family rejects the whole key. When a neighbor table is wired up, the
    /// MACs carried on the wire are replaced by its answers.
    fn key_from_wire(&self, pb: &wire::FlowKey) -> Option<FlowKey> {
        let smac = match pb.src_mac.as_deref() {
            Some(s) => Some(s.parse().ok()?),
            None => None,
        };
        let dmac = match pb.dst_mac.as_deref() {
            Some(s) => Some(s.parse().ok()?),
            None => None,
        };

        let mut key = FlowKey {
            ufid: None,
            smac,
            dmac,
            vlan_id: pb.vlan_id.unwrap_or(0) as u16,
            ethertype: pb.ethertype.unwrap_or(0) as u16,
            ip: None,
            ip_id: 0,
            tcp_flags: 0,
            fstart: false,
            fend: false,
            direction: Default::default(),
            originator: Default::default(),
            flow_marker: 0,
            ct_zone: 0,
            rx_idx: 0,
            tx_idx: 0,
        };

        let (src_str, dst_str) = match (pb.src_ip.as_deref(), pb.dst_ip.as_deref()) {
            (Some(s), Some(d)) => (s, d),
            _ => return Some(key),
        };

        let src_ip: IpAddr = match src_str.parse() {
            Ok(ip) => ip,
            Err(_) => return Some(key),
        };
        let dst_ip: IpAddr = dst_str.parse().ok()?;
        if src_ip.is_ipv4() != dst_ip.is_ipv4() {
            return None;
        }

        key.ip = Some(IpTuple {
            src_ip,
            dst_ip,
            proto: pb.ip_protocol.unwrap_or(0) as u8,
            sport: pb.tpt_src_port.unwrap_or(0) as u16,
            dport: pb.tpt_dst_port.unwrap_or(0) as u16,
        });

        if let Some(lookup) = self.hooks.neigh_lookup.as_ref() {
            key.smac = lookup(src_ip);
            key.dmac = lookup(dst_ip);
        }

        Some(key)
    }

    fn merge_flow_key(&mut self, pb: &wire::FlowKey, now: DateTime<Utc>) -> bool {
        // nothing to enrich with
        if pb.flow_tags.is_empty() && pb.vendor_data.is_empty() {
            return false;
        }

        let key = match self.key_from_wire(pb) {
            Some(key) => key,
            None => {
                debug!("skipping peer flow key with unusable addressing");
                return false;
            }
        };

        if let Some(filter) = self.hooks.collect_filter.as_ref() {
            if !filter(&key, None) {
                trace!("collect filter rejected peer flow key");
                return false;
            }
        }

        let handle = self.lookup_acc(&key, now);
        let mut acc = handle.borrow_mut();
        {
            let mut fkey = acc.fkey.borrow_mut();
            merge_tags(&mut fkey, pb);
            merge_vendor_data(&mut fkey, pb);
            fkey.state.report_attrs = true;
        }
        if acc.state != AccState::WindowActive && !acc.report {
            self.bump_active_accs();
        }
        acc.report = true;
        true
    }

    /// Fold a serialized peer report into the aggregator.
    ///
    /// Returns the number of flow keys merged. Individual keys that fail
    /// translation are skipped; a report that does not decode at all is an
    /// error.
    pub fn update_from_peer(
        &mut self,
        buf: &[u8],
        now: DateTime<Utc>,
    ) -> Result<usize, prost::DecodeError> {
        let report = wire::FlowReport::decode_from_bytes(buf)?;
        let mut merged = 0;
        for window in &report.observation_windows {
            for stats in &window.flow_stats {
                if let Some(pb_key) = &stats.flow_key {
                    if self.merge_flow_key(pb_key, now) {
                        merged += 1;
                    }
                }
            }
        }
        debug!(merged, "merged peer flow report");
        Ok(merged)
    }
}
