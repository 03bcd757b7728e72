//! Flow report wire format
//!
//! Prost message definitions for the report exchanged with the cloud and
//! with peer processes. The schema is small and frozen, so the messages are
//! maintained by hand instead of a protoc build step; field numbers are part
//! of the contract and must not be reused.

use prost::Message;

use crate::report;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeInfo {
    #[prost(string, optional, tag = "1")]
    pub node_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub location_id: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlowCounters {
    #[prost(uint64, optional, tag = "1")]
    pub packets_count: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub bytes_count: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlowTags {
    #[prost(string, optional, tag = "1")]
    pub vendor: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub app_name: Option<String>,
    #[prost(string, repeated, tag = "3")]
    pub app_tags: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VendorDataKvPair {
    #[prost(string, optional, tag = "1")]
    pub key: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub val_str: Option<String>,
    #[prost(uint32, optional, tag = "3")]
    pub val_u32: Option<u32>,
    #[prost(uint64, optional, tag = "4")]
    pub val_u64: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VendorData {
    #[prost(string, optional, tag = "1")]
    pub vendor: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub vendor_kv_pair: Vec<VendorDataKvPair>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataReport {
    #[prost(string, repeated, tag = "1")]
    pub data: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReportTag {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub data_report: Option<DataReport>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlowKey {
    #[prost(string, optional, tag = "1")]
    pub src_mac: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub dst_mac: Option<String>,
    #[prost(uint32, optional, tag = "3")]
    pub vlan_id: Option<u32>,
    #[prost(uint32, optional, tag = "4")]
    pub ethertype: Option<u32>,
    #[prost(string, optional, tag = "5")]
    pub src_ip: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub dst_ip: Option<String>,
    #[prost(uint32, optional, tag = "7")]
    pub ip_protocol: Option<u32>,
    #[prost(uint32, optional, tag = "8")]
    pub tpt_src_port: Option<u32>,
    #[prost(uint32, optional, tag = "9")]
    pub tpt_dst_port: Option<u32>,
    #[prost(message, repeated, tag = "10")]
    pub flow_tags: Vec<FlowTags>,
    #[prost(message, repeated, tag = "11")]
    pub vendor_data: Vec<VendorData>,
    #[prost(message, repeated, tag = "12")]
    pub report_tags: Vec<ReportTag>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlowStats {
    #[prost(message, optional, tag = "1")]
    pub flow_key: Option<FlowKey>,
    #[prost(message, optional, tag = "2")]
    pub flow_count: Option<FlowCounters>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObservationWindow {
    #[prost(uint64, optional, tag = "1")]
    pub started_at: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub ended_at: Option<u64>,
    #[prost(message, repeated, tag = "3")]
    pub flow_stats: Vec<FlowStats>,
    #[prost(uint64, optional, tag = "4")]
    pub dropped_flows: Option<u64>,
    #[prost(string, optional, tag = "5")]
    pub uplink_if_type: Option<String>,
    #[prost(bool, optional, tag = "6")]
    pub uplink_changed: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlowReport {
    #[prost(uint64, optional, tag = "1")]
    pub reported_at: Option<u64>,
    #[prost(message, optional, tag = "2")]
    pub node_info: Option<NodeInfo>,
    #[prost(message, repeated, tag = "3")]
    pub observation_windows: Vec<ObservationWindow>,
}

impl FlowReport {
    pub fn encode_to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn decode_from_bytes(buf: &[u8]) -> Result<FlowReport, prost::DecodeError> {
        FlowReport::decode(buf)
    }
}

fn tag_to_wire(tag: &report::FlowTag) -> FlowTags {
    FlowTags {
        vendor: Some(tag.vendor.clone()),
        app_name: tag.app_name.clone(),
        app_tags: tag.tags.clone(),
    }
}

fn vendor_data_to_wire(vd: &report::VendorData) -> VendorData {
    let kv = vd
        .kv_pairs
        .iter()
        .map(|pair| {
            let mut out = VendorDataKvPair {
                key: Some(pair.key.clone()),
                val_str: None,
                val_u32: None,
                val_u64: None,
            };
            match &pair.value {
                report::VendorValue::Str(v) => out.val_str = Some(v.clone()),
                report::VendorValue::U32(v) => out.val_u32 = Some(*v),
                report::VendorValue::U64(v) => out.val_u64 = Some(*v),
            }
            out
        })
        .collect();
    VendorData {
        vendor: Some(vd.vendor.clone()),
        vendor_kv_pair: kv,
    }
}

fn report_tag_to_wire(tag: &report::ReportTag) -> ReportTag {
    ReportTag {
        id: Some(tag.id.clone()),
        data_report: Some(DataReport {
            data: tag.data.clone(),
        }),
    }
}

/// Serialize one report key. Tags and vendor data ride along only when the
/// key's report-attrs flag asks for them.
pub fn report_key_to_wire(fkey: &report::ReportKey) -> FlowKey {
    let with_attrs = fkey.state.report_attrs;
    FlowKey {
        src_mac: fkey.smac.clone(),
        dst_mac: fkey.dmac.clone(),
        vlan_id: (fkey.vlan_id != 0).then_some(u32::from(fkey.vlan_id)),
        ethertype: Some(u32::from(fkey.ethertype)),
        src_ip: fkey.src_ip.clone(),
        dst_ip: fkey.dst_ip.clone(),
        ip_protocol: (fkey.ip_version != 0).then_some(u32::from(fkey.protocol)),
        tpt_src_port: (fkey.ip_version != 0).then_some(u32::from(fkey.sport)),
        tpt_dst_port: (fkey.ip_version != 0).then_some(u32::from(fkey.dport)),
        flow_tags: if with_attrs {
            fkey.tags.iter().map(tag_to_wire).collect()
        } else {
            Vec::new()
        },
        vendor_data: if with_attrs {
            fkey.vendor_data.iter().map(vendor_data_to_wire).collect()
        } else {
            Vec::new()
        },
        report_tags: if with_attrs {
            fkey.report_tags.iter().map(report_tag_to_wire).collect()
        } else {
            Vec::new()
        },
    }
}

pub fn counters_to_wire(counters: &crate::flow::FlowCounters) -> FlowCounters {
    FlowCounters {
        packets_count: Some(counters.packets),
        bytes_count: Some(counters.bytes),
    }
}

pub fn window_to_wire(window: &report::ObservationWindow) -> ObservationWindow {
    ObservationWindow {
        started_at: Some(window.started_at.timestamp() as u64),
        ended_at: window.ended_at.map(|t| t.timestamp() as u64),
        flow_stats: window
            .stats
            .iter()
            .map(|entry| FlowStats {
                flow_key: Some(report_key_to_wire(&entry.fkey.borrow())),
                flow_count: Some(counters_to_wire(&entry.counters)),
            })
            .collect(),
        dropped_flows: Some(window.dropped_stats),
        uplink_if_type: window.uplink.as_ref().map(|u| u.if_type.clone()),
        uplink_changed: window.uplink.as_ref().map(|u| u.changed),
    }
}
