//! Report-side flow representation
//!
//! Accumulators keep a second, report-oriented view of their key: addresses
//! pre-formatted as strings, plus the flow tags and vendor data contributed
//! by DPI plugins and peer processes. Window stats share this view through an
//! `Rc`, so enrichment that lands after a window was filled is still visible
//! when the report is serialized.

pub mod wire;

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::flow::{FlowCounters, FlowKey};

/// Identity of the reporting node.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub node_id: String,
    pub location_id: String,
}

/// One vendor's application tags for a flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowTag {
    pub vendor: String,
    pub app_name: Option<String>,
    pub tags: Vec<String>,
}

/// Typed value of a vendor key/value pair.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorValue {
    Str(String),
    U32(u32),
    U64(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VendorKv {
    pub key: String,
    pub value: VendorValue,
}

/// One vendor's opaque key/value payload for a flow.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorData {
    pub vendor: String,
    pub kv_pairs: Vec<VendorKv>,
}

/// Free-form report tag attached by enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTag {
    pub id: String,
    pub data: Vec<String>,
}

/// Mutable reporting state rider on a report key.
#[derive(Debug, Clone)]
pub struct KeyState {
    /// Carry tags/vendor data in the next report that includes this flow.
    pub report_attrs: bool,
    pub first_obs: DateTime<Utc>,
    pub last_obs: DateTime<Utc>,
}

/// String-formatted flow key used in reports.
#[derive(Debug, Clone)]
pub struct ReportKey {
    pub smac: Option<String>,
    pub dmac: Option<String>,
    pub vlan_id: u16,
    pub ethertype: u16,
    pub ip_version: u8,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub protocol: u8,
    pub sport: u16,
    pub dport: u16,
    pub tags: Vec<FlowTag>,
    pub vendor_data: Vec<VendorData>,
    pub report_tags: Vec<ReportTag>,
    pub state: KeyState,
}

pub type SharedReportKey = Rc<RefCell<ReportKey>>;

impl ReportKey {
    /// Derive the report view from a canonical flow key.
    pub fn from_flow_key(key: &FlowKey, now: DateTime<Utc>) -> ReportKey {
        let (src_ip, dst_ip, protocol, sport, dport) = match &key.ip {
            Some(t) => (
                Some(t.src_ip.to_string()),
                Some(t.dst_ip.to_string()),
                t.proto,
                t.sport,
                t.dport,
            ),
            None => (None, None, 0, 0, 0),
        };
        ReportKey {
            smac: key.smac.map(|m| m.to_string()),
            dmac: key.dmac.map(|m| m.to_string()),
            vlan_id: key.vlan_id,
            ethertype: key.ethertype,
            ip_version: key.ip_version(),
            src_ip,
            dst_ip,
            protocol,
            sport,
            dport,
            tags: Vec::new(),
            vendor_data: Vec::new(),
            report_tags: Vec::new(),
            state: KeyState {
                report_attrs: true,
                first_obs: now,
                last_obs: now,
            },
        }
    }

    pub fn has_tag_vendor(&self, vendor: &str) -> bool {
        self.tags.iter().any(|t| t.vendor == vendor)
    }

    pub fn has_vendor_data(&self, vendor: &str) -> bool {
        self.vendor_data.iter().any(|v| v.vendor == vendor)
    }
}

/// Uplink in use while a window was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Uplink {
    pub if_type: String,
    pub changed: bool,
}

/// One enqueued flow entry of an observation window.
///
/// The key is shared with the owning accumulator; windows never own keys.
#[derive(Debug, Clone)]
pub struct FlowStatsEntry {
    pub fkey: SharedReportKey,
    pub counters: FlowCounters,
}

/// Bounded per-interval report buffer.
#[derive(Debug)]
pub struct ObservationWindow {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stats: Vec<FlowStatsEntry>,
    /// Capacity; entries past it are dropped and counted.
    pub provisioned: usize,
    pub dropped_stats: u64,
    pub uplink: Option<Uplink>,
}

impl ObservationWindow {
    pub fn new(started_at: DateTime<Utc>, provisioned: usize) -> Self {
        Self {
            started_at,
            ended_at: None,
            stats: Vec::new(),
            provisioned,
            dropped_stats: 0,
            uplink: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.stats.len() >= self.provisioned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Direction, IpTuple, MacAddr, Originator};
    use std::net::IpAddr;

    fn key() -> FlowKey {
        FlowKey {
            ufid: None,
            smac: Some(MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])),
            dmac: Some(MacAddr::new([0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb])),
            vlan_id: 100,
            ethertype: 0x0800,
            ip: Some(IpTuple {
                src_ip: "192.168.1.10".parse::<IpAddr>().unwrap(),
                dst_ip: "2001:db8::1".parse::<IpAddr>().unwrap(),
                proto: 17,
                sport: 53430,
                dport: 53,
            }),
            ip_id: 0,
            tcp_flags: 0,
            fstart: false,
            fend: false,
            direction: Direction::Outbound,
            originator: Originator::Src,
            flow_marker: 0,
            ct_zone: 0,
            rx_idx: 0,
            tx_idx: 0,
        }
    }

    #[test]
    fn test_report_key_formats_addresses() {
        let rk = ReportKey::from_flow_key(&key(), Utc::now());
        assert_eq!(rk.smac.as_deref(), Some("00:11:22:33:44:55"));
        assert_eq!(rk.src_ip.as_deref(), Some("192.168.1.10"));
        assert_eq!(rk.dst_ip.as_deref(), Some("2001:db8::1"));
        assert_eq!(rk.protocol, 17);
        assert_eq!(rk.dport, 53);
        assert!(rk.state.report_attrs);
    }

    #[test]
    fn test_report_key_eth_only() {
        let mut k = key();
        k.ip = None;
        let rk = ReportKey::from_flow_key(&k, Utc::now());
        assert_eq!(rk.ip_version, 0);
        assert!(rk.src_ip.is_none());
        assert_eq!(rk.sport, 0);
    }

    #[test]
    fn test_window_capacity() {
        let w = ObservationWindow::new(Utc::now(), 2);
        assert!(!w.is_full());
        assert_eq!(w.provisioned, 2);
    }
}
